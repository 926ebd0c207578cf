use core::num::NonZeroU64;

use blst::{
    blst_scalar,
    min_pk::{AggregateSignature as RawAggregateSignature, Signature as RawSignature},
    BLST_ERROR,
};
use derive_more::From;
use itertools::Itertools as _;
use rand::Rng as _;

use crate::{
    consts::DOMAIN_SEPARATION_TAG, error::Error, public_key::PublicKey,
    signature_bytes::SignatureBytes,
};

const MULTI_VERIFY_RANDOM_BYTES: usize = size_of::<NonZeroU64>();
const MULTI_VERIFY_RANDOM_BITS: usize = MULTI_VERIFY_RANDOM_BYTES * 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug, From)]
pub struct Signature(RawSignature);

impl TryFrom<SignatureBytes> for Signature {
    type Error = Error;

    #[inline]
    fn try_from(bytes: SignatureBytes) -> Result<Self, Self::Error> {
        RawSignature::uncompress(bytes.as_bytes())
            .map(Self)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl From<Signature> for SignatureBytes {
    #[inline]
    fn from(signature: Signature) -> Self {
        Self(signature.0.compress())
    }
}

impl Signature {
    #[must_use]
    pub fn verify(&self, message: impl AsRef<[u8]>, public_key: &PublicKey) -> bool {
        let result = self.0.verify(
            true,
            message.as_ref(),
            DOMAIN_SEPARATION_TAG,
            &[],
            public_key.as_raw(),
            false,
        );

        result == BLST_ERROR::BLST_SUCCESS
    }

    /// Verifies a signature over one message by every key in `public_keys`.
    ///
    /// Returns `false` when `public_keys` is empty.
    #[must_use]
    pub fn fast_aggregate_verify<'keys>(
        &self,
        message: impl AsRef<[u8]>,
        public_keys: impl IntoIterator<Item = &'keys PublicKey>,
    ) -> bool {
        let public_keys = public_keys.into_iter().map(PublicKey::as_raw).collect_vec();

        if public_keys.is_empty() {
            return false;
        }

        let result = self.0.fast_aggregate_verify(
            true,
            message.as_ref(),
            DOMAIN_SEPARATION_TAG,
            public_keys.as_slice(),
        );

        result == BLST_ERROR::BLST_SUCCESS
    }

    /// Verifies a signature aggregated from signatures over distinct messages.
    ///
    /// `messages` and `public_keys` are paired up by position. Returns `false` when they are
    /// empty or have different lengths.
    #[must_use]
    pub fn aggregate_verify<'all>(
        &self,
        messages: impl IntoIterator<Item = &'all [u8]>,
        public_keys: impl IntoIterator<Item = &'all PublicKey>,
    ) -> bool {
        let messages = messages.into_iter().collect_vec();
        let public_keys = public_keys.into_iter().map(PublicKey::as_raw).collect_vec();

        if messages.is_empty() || messages.len() != public_keys.len() {
            return false;
        }

        let result = self.0.aggregate_verify(
            true,
            messages.as_slice(),
            DOMAIN_SEPARATION_TAG,
            public_keys.as_slice(),
            false,
        );

        result == BLST_ERROR::BLST_SUCCESS
    }

    pub fn aggregate_in_place(&mut self, other: Self) {
        let mut self_aggregate = RawAggregateSignature::from_signature(&self.0);
        let other_aggregate = RawAggregateSignature::from_signature(&other.0);
        self_aggregate.add_aggregate(&other_aggregate);
        self.0 = self_aggregate.to_signature();
    }

    #[must_use]
    pub fn aggregate(signatures: impl IntoIterator<Item = Self>) -> Option<Self> {
        signatures.into_iter().reduce(|mut aggregate, signature| {
            aggregate.aggregate_in_place(signature);
            aggregate
        })
    }

    /// Verifies many `(message, signature, public key)` triples at once.
    ///
    /// Each triple is weighted by a random scalar so that invalid signatures cannot cancel out.
    #[must_use]
    pub fn multi_verify<'all>(
        messages: impl IntoIterator<Item = &'all [u8]>,
        signatures: impl IntoIterator<Item = &'all Self>,
        public_keys: impl IntoIterator<Item = &'all PublicKey>,
    ) -> bool {
        let messages = messages.into_iter().collect_vec();
        let signatures = signatures.into_iter().map(|signature| &signature.0).collect_vec();
        let public_keys = public_keys.into_iter().map(PublicKey::as_raw).collect_vec();

        if signatures.is_empty() {
            return true;
        }

        // `ThreadRng` is cryptographically secure.
        let mut rng = rand::thread_rng();

        let randoms = core::iter::repeat_with(|| {
            let mut scalar = blst_scalar::default();
            let nonzero_bytes = rng.gen::<NonZeroU64>().get().to_le_bytes();
            scalar.b[..MULTI_VERIFY_RANDOM_BYTES].copy_from_slice(&nonzero_bytes);
            scalar
        })
        .take(signatures.len())
        .collect_vec();

        let result = RawSignature::verify_multiple_aggregate_signatures(
            messages.as_slice(),
            DOMAIN_SEPARATION_TAG,
            public_keys.as_slice(),
            false,
            signatures.as_slice(),
            true,
            randoms.as_slice(),
            MULTI_VERIFY_RANDOM_BITS,
        );

        result == BLST_ERROR::BLST_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{secret_key::SecretKey, secret_key_bytes::SecretKeyBytes};

    use super::*;

    const MESSAGE: &[u8] = b"foo";

    fn secret_key(byte: u8) -> Result<SecretKey> {
        Ok(SecretKey::try_from(SecretKeyBytes::from([byte; 32]))?)
    }

    #[test]
    fn signature_verify_succeeds_on_correct_triple() -> Result<()> {
        let secret_key = secret_key(1)?;
        let public_key = secret_key.to_public_key();
        let signature = secret_key.sign(MESSAGE);

        assert!(signature.verify(MESSAGE, &public_key));
        assert!(!signature.verify(b"bar", &public_key));

        Ok(())
    }

    #[test]
    fn signature_verify_fails_on_incorrect_public_key() -> Result<()> {
        let signature = secret_key(1)?.sign(MESSAGE);
        let other_public_key = secret_key(2)?.to_public_key();

        assert!(!signature.verify(MESSAGE, &other_public_key));

        Ok(())
    }

    #[test]
    fn signature_survives_compression() -> Result<()> {
        let signature = secret_key(3)?.sign(MESSAGE);
        let bytes = SignatureBytes::from(signature);

        assert_eq!(Signature::try_from(bytes)?, signature);

        Ok(())
    }

    #[test]
    fn empty_signature_bytes_decode_to_the_point_at_infinity() -> Result<()> {
        let infinity = Signature::try_from(SignatureBytes::empty())?;
        assert_eq!(SignatureBytes::from(infinity), SignatureBytes::empty());
        Ok(())
    }

    #[test]
    fn aggregate_signatures_verify_against_all_keys() -> Result<()> {
        let keys = [secret_key(1)?, secret_key(2)?, secret_key(3)?];
        let public_keys = keys.iter().map(SecretKey::to_public_key).collect_vec();

        let aggregate = Signature::aggregate(keys.iter().map(|key| key.sign(MESSAGE)))
            .expect("there are 3 signatures");

        assert!(aggregate.fast_aggregate_verify(MESSAGE, &public_keys));
        assert!(!aggregate.fast_aggregate_verify(MESSAGE, &public_keys[..2]));
        assert!(!aggregate.fast_aggregate_verify(MESSAGE, []));

        let messages: [&[u8]; 3] = [b"a", b"b", b"c"];

        let aggregate = Signature::aggregate(
            keys.iter()
                .zip(messages)
                .map(|(key, message)| key.sign(message)),
        )
        .expect("there are 3 signatures");

        assert!(aggregate.aggregate_verify(messages, &public_keys));
        assert!(!aggregate.aggregate_verify(messages.into_iter().rev(), &public_keys));

        Ok(())
    }

    #[test]
    fn multi_verify_detects_a_single_bad_signature() -> Result<()> {
        let keys = [secret_key(4)?, secret_key(5)?];
        let public_keys = keys.iter().map(SecretKey::to_public_key).collect_vec();
        let messages: [&[u8]; 2] = [b"x", b"y"];

        let good = [keys[0].sign(messages[0]), keys[1].sign(messages[1])];
        let bad = [keys[0].sign(messages[0]), keys[1].sign(messages[0])];

        assert!(Signature::multi_verify(messages, &good, &public_keys));
        assert!(!Signature::multi_verify(messages, &bad, &public_keys));

        Ok(())
    }
}
