//! Incremental Merkle tree mirroring the one kept by the deposit contract.
//!
//! The tree is used to build `Deposit` proofs for genesis and for tests. Its root with the deposit
//! count mixed in is the `deposit_root` of `Eth1Data`.

use anyhow::{ensure, Result};
use hashing::ZERO_HASHES;
use ssz::{mix_in_length, ContiguousVector, SszHash as _, H256};
use thiserror::Error;
use typenum::Unsigned as _;
use types::phase0::{
    consts::{DepositContractTreeDepth, DepositProofLength},
    containers::DepositData,
    primitives::DepositIndex,
};

const DEPTH: usize = DepositContractTreeDepth::USIZE;
const MAX_DEPOSITS: DepositIndex = 1 << DEPTH;

#[derive(Clone, Default, Debug)]
pub struct DepositTree {
    // `levels[height]` contains the nodes at `height` that have at least one nonzero leaf below.
    // Missing nodes are roots of zero subtrees.
    levels: Vec<Vec<H256>>,
    deposit_count: DepositIndex,
}

impl DepositTree {
    #[must_use]
    pub const fn deposit_count(&self) -> DepositIndex {
        self.deposit_count
    }

    /// Appends the deposit with the next index.
    pub fn push(&mut self, index: DepositIndex, data: DepositData) -> Result<()> {
        self.validate_index(index)?;

        if self.levels.is_empty() {
            self.levels.resize_with(DEPTH + 1, Vec::new);
        }

        let mut position = usize::try_from(index)?;
        let mut node = data.hash_tree_root();

        for (height, level) in self.levels.iter_mut().enumerate() {
            if let Some(existing) = level.get_mut(position) {
                *existing = node;
            } else {
                level.push(node);
            }

            if height == DEPTH {
                break;
            }

            node = if position % 2 == 0 {
                hashing::hash_256_256(node, ZERO_HASHES[height])
            } else {
                hashing::hash_256_256(level[position - 1], node)
            };

            position /= 2;
        }

        self.deposit_count += 1;

        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> H256 {
        let root = self
            .levels
            .get(DEPTH)
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(ZERO_HASHES[DEPTH]);

        mix_in_length(root, self.leaf_count())
    }

    /// Builds a proof of inclusion of the deposit at `index` in the tree as it is now.
    ///
    /// The last node is the deposit count, as required by `process_deposit`.
    pub fn proof(&self, index: DepositIndex) -> Result<ContiguousVector<H256, DepositProofLength>> {
        ensure!(
            index < self.deposit_count,
            Error::IndexOutOfBounds {
                index,
                deposit_count: self.deposit_count,
            },
        );

        let mut position = usize::try_from(index)?;
        let mut proof = Vec::with_capacity(DepositProofLength::USIZE);

        for (height, level) in self.levels.iter().take(DEPTH).enumerate() {
            let sibling = level
                .get(position ^ 1)
                .copied()
                .unwrap_or(ZERO_HASHES[height]);

            proof.push(sibling);
            position /= 2;
        }

        proof.push(length_chunk(self.deposit_count));

        proof.try_into().map_err(Into::into)
    }

    fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or_default()
    }

    fn validate_index(&self, index: DepositIndex) -> Result<()> {
        ensure!(index < MAX_DEPOSITS, Error::Full { index });

        let expected = self.deposit_count;
        let actual = index;

        ensure!(
            actual == expected,
            Error::UnexpectedIndex { expected, actual },
        );

        Ok(())
    }
}

fn length_chunk(length: DepositIndex) -> H256 {
    let mut chunk = H256::zero();
    chunk[..size_of::<DepositIndex>()].copy_from_slice(&length.to_le_bytes());
    chunk
}

#[derive(Debug, Error)]
enum Error {
    #[error("attempted to add deposit with index {index} to full deposit tree")]
    Full { index: DepositIndex },
    #[error("expected deposit with index {expected}, received deposit with index {actual}")]
    UnexpectedIndex {
        expected: DepositIndex,
        actual: DepositIndex,
    },
    #[error("deposit index {index} is out of bounds (deposit_count: {deposit_count})")]
    IndexOutOfBounds {
        index: DepositIndex,
        deposit_count: DepositIndex,
    },
}
