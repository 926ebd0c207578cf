use blst::min_pk::SecretKey as RawSecretKey;

use crate::{
    consts::DOMAIN_SEPARATION_TAG, error::Error, public_key::PublicKey,
    secret_key_bytes::SecretKeyBytes, signature::Signature,
};

// `RawSecretKey` zeroizes itself on drop.
pub struct SecretKey(RawSecretKey);

impl TryFrom<SecretKeyBytes> for SecretKey {
    type Error = Error;

    #[inline]
    fn try_from(secret_key_bytes: SecretKeyBytes) -> Result<Self, Self::Error> {
        RawSecretKey::from_bytes(secret_key_bytes.as_ref())
            .map(Self)
            .map_err(|_| Error::InvalidSecretKey)
    }
}

impl SecretKey {
    #[inline]
    #[must_use]
    pub fn to_bytes(&self) -> SecretKeyBytes {
        SecretKeyBytes {
            bytes: self.0.to_bytes(),
        }
    }

    #[inline]
    #[must_use]
    pub fn to_public_key(&self) -> PublicKey {
        self.0.sk_to_pk().into()
    }

    #[inline]
    #[must_use]
    pub fn sign(&self, message: impl AsRef<[u8]>) -> Signature {
        self.0
            .sign(message.as_ref(), DOMAIN_SEPARATION_TAG, &[])
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_secret_key_is_rejected() {
        assert!(SecretKey::try_from(SecretKeyBytes::default()).is_err());
    }

    #[test]
    fn secret_key_round_trips_through_bytes() -> Result<(), Error> {
        let secret_key = SecretKey::try_from(SecretKeyBytes::from([7; 32]))?;
        let bytes = secret_key.to_bytes();
        assert_eq!(bytes.as_ref(), &[7; 32]);
        Ok(())
    }
}
