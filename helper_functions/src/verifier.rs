#![expect(clippy::module_name_repetitions)]

use anyhow::{ensure, Result};
use bls::{
    AggregatePublicKey, AggregateSignature, CachedPublicKey, PublicKey, Signature, SignatureBytes,
};
use derive_more::Constructor;
use enumset::{EnumSet, EnumSetType};
use rayon::iter::{IntoParallelRefIterator as _, ParallelIterator as _};
use static_assertions::assert_not_impl_any;
use tap::TryConv as _;
use types::{phase0::primitives::H256, phase1::consts::NO_SIGNATURE};

use crate::error::{Error, SignatureKind};

pub trait Verifier {
    const IS_NULL: bool;

    fn reserve(&mut self, additional: usize);

    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        cached_public_key: &CachedPublicKey,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    /// Verifies a signature aggregated from signatures over the same message.
    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    /// Verifies a signature aggregated from signatures over distinct messages.
    ///
    /// `messages` and `public_keys` are paired up by position.
    fn verify_aggregate_of_distinct_messages(
        &mut self,
        messages: &[H256],
        signature_bytes: SignatureBytes,
        public_keys: &[PublicKey],
        signature_kind: SignatureKind,
    ) -> Result<()>;

    /// Like [`Verifier::verify_aggregate_of_distinct_messages`], but an empty set of signers is
    /// valid if the signature is [`NO_SIGNATURE`].
    ///
    /// The check for an empty set is done even by [`NullVerifier`] because it is not
    /// cryptographic.
    fn verify_optional_aggregate(
        &mut self,
        messages: &[H256],
        signature_bytes: SignatureBytes,
        public_keys: &[PublicKey],
        signature_kind: SignatureKind,
    ) -> Result<()> {
        if public_keys.is_empty() {
            ensure!(
                signature_bytes == NO_SIGNATURE,
                Error::SignatureInvalid(signature_kind),
            );

            return Ok(());
        }

        self.verify_aggregate_of_distinct_messages(
            messages,
            signature_bytes,
            public_keys,
            signature_kind,
        )
    }

    fn extend(
        &mut self,
        triples: impl IntoIterator<Item = Triple>,
        signature_kind: SignatureKind,
    ) -> Result<()>;

    fn finish(&self) -> Result<()>;

    fn has_option(&self, option: VerifierOption) -> bool;
}

impl<V: Verifier> Verifier for &mut V {
    const IS_NULL: bool = V::IS_NULL;

    #[inline]
    fn reserve(&mut self, additional: usize) {
        (*self).reserve(additional)
    }

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        cached_public_key: &CachedPublicKey,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_singular(message, signature_bytes, cached_public_key, signature_kind)
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_aggregate(message, signature_bytes, public_keys, signature_kind)
    }

    #[inline]
    fn verify_aggregate_of_distinct_messages(
        &mut self,
        messages: &[H256],
        signature_bytes: SignatureBytes,
        public_keys: &[PublicKey],
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).verify_aggregate_of_distinct_messages(
            messages,
            signature_bytes,
            public_keys,
            signature_kind,
        )
    }

    #[inline]
    fn extend(
        &mut self,
        triples: impl IntoIterator<Item = Triple>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        (*self).extend(triples, signature_kind)
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        (**self).finish()
    }

    #[inline]
    fn has_option(&self, option: VerifierOption) -> bool {
        (**self).has_option(option)
    }
}

pub struct NullVerifier;

impl Verifier for NullVerifier {
    const IS_NULL: bool = true;

    #[inline]
    fn reserve(&mut self, _additional: usize) {}

    #[inline]
    fn verify_singular(
        &mut self,
        _message: H256,
        _signature_bytes: SignatureBytes,
        _cached_public_key: &CachedPublicKey,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        _message: H256,
        _signature_bytes: SignatureBytes,
        _public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn verify_aggregate_of_distinct_messages(
        &mut self,
        _messages: &[H256],
        _signature_bytes: SignatureBytes,
        _public_keys: &[PublicKey],
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn extend(
        &mut self,
        _triples: impl IntoIterator<Item = Triple>,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn has_option(&self, _option: VerifierOption) -> bool {
        false
    }
}

pub struct SingleVerifier;

impl Verifier for SingleVerifier {
    const IS_NULL: bool = false;

    #[inline]
    fn reserve(&mut self, _additional: usize) {}

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        cached_public_key: &CachedPublicKey,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_key = *cached_public_key.decompress()?;
        let triple = Triple::new(message, signature_bytes, public_key);
        self.extend(core::iter::once(triple), signature_kind)
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        // `Signature::fast_aggregate_verify` is faster than aggregating public keys first.
        ensure!(
            signature_bytes
                .try_conv::<AggregateSignature>()?
                .fast_aggregate_verify(message, public_keys),
            Error::SignatureInvalid(signature_kind),
        );

        Ok(())
    }

    #[inline]
    fn verify_aggregate_of_distinct_messages(
        &mut self,
        messages: &[H256],
        signature_bytes: SignatureBytes,
        public_keys: &[PublicKey],
        signature_kind: SignatureKind,
    ) -> Result<()> {
        ensure!(
            signature_bytes
                .try_conv::<AggregateSignature>()?
                .aggregate_verify(messages.iter().map(H256::as_bytes), public_keys),
            Error::SignatureInvalid(signature_kind),
        );

        Ok(())
    }

    #[inline]
    fn extend(
        &mut self,
        triples: impl IntoIterator<Item = Triple>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        for triple in triples {
            let Triple {
                message,
                signature_bytes,
                public_key,
            } = triple;

            let signature = Signature::try_from(signature_bytes)?;

            ensure!(
                signature.verify(message, &public_key),
                Error::SignatureInvalid(signature_kind),
            );
        }

        Ok(())
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn has_option(&self, _option: VerifierOption) -> bool {
        false
    }
}

/// Collects signatures and verifies all of them at once in [`Verifier::finish`].
///
/// Aggregates over distinct messages cannot be batched and are verified immediately.
#[derive(Default)]
pub struct MultiVerifier {
    triples: Vec<Triple>,
    options: EnumSet<VerifierOption>,
}

impl Verifier for MultiVerifier {
    const IS_NULL: bool = false;

    #[inline]
    fn reserve(&mut self, additional: usize) {
        self.triples.reserve_exact(additional);
    }

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        cached_public_key: &CachedPublicKey,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        let public_key = *cached_public_key.decompress()?;
        let triple = Triple::new(message, signature_bytes, public_key);
        self.triples.push(triple);
        Ok(())
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        let triple = Triple::aggregate(message, signature_bytes, public_keys, signature_kind)?;
        self.triples.push(triple);
        Ok(())
    }

    #[inline]
    fn verify_aggregate_of_distinct_messages(
        &mut self,
        messages: &[H256],
        signature_bytes: SignatureBytes,
        public_keys: &[PublicKey],
        signature_kind: SignatureKind,
    ) -> Result<()> {
        SingleVerifier.verify_aggregate_of_distinct_messages(
            messages,
            signature_bytes,
            public_keys,
            signature_kind,
        )
    }

    #[inline]
    fn extend(
        &mut self,
        triples: impl IntoIterator<Item = Triple>,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        self.triples.extend(triples);
        Ok(())
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        if self.triples.is_empty() {
            return Ok(());
        }

        let messages = self.triples.iter().map(|triple| triple.message.as_bytes());

        let signatures = self
            .triples
            .par_iter()
            .map(|triple| Signature::try_from(triple.signature_bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let public_keys = self.triples.iter().map(|triple| &triple.public_key);

        ensure!(
            Signature::multi_verify(messages, signatures.iter(), public_keys),
            Error::SignatureInvalid(SignatureKind::Multi),
        );

        Ok(())
    }

    #[inline]
    fn has_option(&self, option: VerifierOption) -> bool {
        self.options.contains(option)
    }
}

impl From<Vec<Triple>> for MultiVerifier {
    fn from(triples: Vec<Triple>) -> Self {
        Self {
            triples,
            ..Self::default()
        }
    }
}

impl MultiVerifier {
    pub fn new(options: impl IntoIterator<Item = VerifierOption>) -> Self {
        Self {
            options: EnumSet::from_iter(options),
            ..Self::default()
        }
    }
}

#[derive(Default, Constructor)]
pub struct Triple {
    message: H256,
    signature_bytes: SignatureBytes,
    public_key: PublicKey,
}

// `Triple` was originally an alias for a tuple and thus implemented `Copy`.
// The implicit copying nearly caused a bug by making code like this compile:
// ```
// let triple = Triple::default();
// validate(…, …, triple)?;
// Ok(triple)
// ```
assert_not_impl_any!(Triple: Copy);

impl Triple {
    /// Replaces the signers of an aggregate with a single aggregate public key.
    pub fn aggregate<'keys>(
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        signature_kind: SignatureKind,
    ) -> Result<Self> {
        let public_key = AggregatePublicKey::aggregate_nonempty(public_keys)
            .map_err(|_| Error::SignatureInvalid(signature_kind))?;

        Ok(Self::new(message, signature_bytes, public_key))
    }
}

/// Captures a single aggregate so that attestations can be validated in parallel and their
/// signatures batched afterwards.
impl Verifier for Triple {
    const IS_NULL: bool = false;

    #[inline]
    fn reserve(&mut self, _additional: usize) {}

    #[inline]
    fn verify_singular(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        cached_public_key: &CachedPublicKey,
        _signature_kind: SignatureKind,
    ) -> Result<()> {
        *self = Self::new(message, signature_bytes, *cached_public_key.decompress()?);
        Ok(())
    }

    #[inline]
    fn verify_aggregate<'keys>(
        &mut self,
        message: H256,
        signature_bytes: SignatureBytes,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        *self = Self::aggregate(message, signature_bytes, public_keys, signature_kind)?;
        Ok(())
    }

    #[inline]
    fn verify_aggregate_of_distinct_messages(
        &mut self,
        messages: &[H256],
        signature_bytes: SignatureBytes,
        public_keys: &[PublicKey],
        signature_kind: SignatureKind,
    ) -> Result<()> {
        SingleVerifier.verify_aggregate_of_distinct_messages(
            messages,
            signature_bytes,
            public_keys,
            signature_kind,
        )
    }

    #[inline]
    fn extend(
        &mut self,
        triples: impl IntoIterator<Item = Self>,
        signature_kind: SignatureKind,
    ) -> Result<()> {
        SingleVerifier.extend(triples, signature_kind)
    }

    #[inline]
    fn finish(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn has_option(&self, _option: VerifierOption) -> bool {
        false
    }
}

#[derive(Debug, EnumSetType)]
pub enum VerifierOption {
    SkipRandaoVerification,
}

#[cfg(test)]
mod tests {
    use bls::{SecretKey, SecretKeyBytes};
    use tap::Conv as _;

    use super::*;

    fn secret_key(byte: u8) -> Result<SecretKey> {
        Ok([byte; 32].conv::<SecretKeyBytes>().try_conv::<SecretKey>()?)
    }

    #[test]
    fn multi_verifier_finish_succeeds_with_0_signatures() -> Result<()> {
        MultiVerifier::default().finish()
    }

    #[test]
    fn multi_verifier_finish_succeeds_with_1_signature() -> Result<()> {
        let secret_key = secret_key(1)?;
        let public_key = secret_key.to_public_key().into();
        let message = H256::default();
        let signature = secret_key.sign(message).into();

        let mut verifier = MultiVerifier::default();
        verifier.verify_singular(message, signature, &public_key, SignatureKind::Block)?;
        verifier.finish()
    }

    #[test]
    fn multi_verifier_rejects_batch_with_wrong_message() -> Result<()> {
        let secret_key = secret_key(2)?;
        let public_key = secret_key.to_public_key().into();
        let signature = secret_key.sign(H256::repeat_byte(1)).into();

        let mut verifier = MultiVerifier::default();
        verifier.verify_singular(H256::zero(), signature, &public_key, SignatureKind::Block)?;

        assert!(verifier.finish().is_err());

        Ok(())
    }

    #[test]
    fn aggregate_of_same_message_is_verified_in_batch() -> Result<()> {
        let secret_keys = [secret_key(3)?, secret_key(4)?];
        let message = H256::repeat_byte(5);

        let public_keys = secret_keys.iter().map(SecretKey::to_public_key).collect::<Vec<_>>();

        let signature = AggregateSignature::aggregate(
            secret_keys.iter().map(|secret_key| secret_key.sign(message)),
        )
        .ok_or_else(|| anyhow::anyhow!("no signatures"))?;

        let mut verifier = MultiVerifier::default();

        verifier.verify_aggregate(
            message,
            signature.into(),
            &public_keys,
            SignatureKind::Attestation,
        )?;

        verifier.finish()
    }

    #[test]
    fn optional_aggregate_without_signers_requires_no_signature() {
        assert!(NullVerifier
            .verify_optional_aggregate(&[], NO_SIGNATURE, &[], SignatureKind::ShardProposals)
            .is_ok());

        assert!(NullVerifier
            .verify_optional_aggregate(
                &[],
                SignatureBytes::empty(),
                &[],
                SignatureKind::ShardProposals,
            )
            .is_err());
    }

    #[test]
    fn optional_aggregate_over_distinct_messages() -> Result<()> {
        let secret_keys = [secret_key(6)?, secret_key(7)?];
        let messages = [H256::repeat_byte(8), H256::repeat_byte(9)];

        let public_keys = secret_keys.iter().map(SecretKey::to_public_key).collect::<Vec<_>>();

        let signature = AggregateSignature::aggregate(
            secret_keys
                .iter()
                .zip(messages)
                .map(|(secret_key, message)| secret_key.sign(message)),
        )
        .ok_or_else(|| anyhow::anyhow!("no signatures"))?
        .into();

        SingleVerifier.verify_optional_aggregate(
            &messages,
            signature,
            &public_keys,
            SignatureKind::ShardProposals,
        )?;

        let swapped = [messages[1], messages[0]];

        assert!(SingleVerifier
            .verify_optional_aggregate(
                &swapped,
                signature,
                &public_keys,
                SignatureKind::ShardProposals,
            )
            .is_err());

        Ok(())
    }
}
