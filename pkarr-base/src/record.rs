//! Signed, sequenced records.

use bytes::Bytes;

use crate::{
    key::{PublicKey, SecretKey, Signature, SignatureError},
    signable::encode_signable,
};

/// A record value together with its sequence number and signature.
///
/// The signature covers [`encode_signable`] of the sequence number and value, and is only
/// meaningful together with the [`PublicKey`] the record is published under.  A
/// `SignedRecord` does not know that key itself: use [`SignedRecord::verify`] before
/// trusting a record received from somewhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRecord {
    seq: u64,
    value: Bytes,
    signature: Signature,
}

impl SignedRecord {
    /// Signs `value` at sequence number `seq`.
    pub fn sign(secret_key: &SecretKey, seq: u64, value: impl Into<Bytes>) -> Self {
        let value = value.into();
        let signature = secret_key.sign(&encode_signable(seq, &value, None));
        Self {
            seq,
            value,
            signature,
        }
    }

    /// Signs `value` at sequence number `seq` with a salt mixed into the signed bytes.
    ///
    /// The salt is not part of the record, a verifier needs to know it out of band.
    pub fn sign_salted(
        secret_key: &SecretKey,
        seq: u64,
        value: impl Into<Bytes>,
        salt: &[u8],
    ) -> Self {
        let value = value.into();
        let signature = secret_key.sign(&encode_signable(seq, &value, Some(salt)));
        Self {
            seq,
            value,
            signature,
        }
    }

    /// Assembles a record from its parts without checking the signature.
    pub fn from_parts(seq: u64, value: impl Into<Bytes>, signature: Signature) -> Self {
        Self {
            seq,
            value: value.into(),
            signature,
        }
    }

    /// The sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The opaque value bytes.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// The signature over the signable encoding.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Checks that this record was signed by the secret key belonging to `public_key`.
    pub fn verify(&self, public_key: &PublicKey) -> Result<(), SignatureError> {
        public_key.verify(&encode_signable(self.seq, &self.value, None), &self.signature)
    }

    /// Like [`Self::verify`], for records signed with [`Self::sign_salted`].
    pub fn verify_salted(&self, public_key: &PublicKey, salt: &[u8]) -> Result<(), SignatureError> {
        public_key.verify(
            &encode_signable(self.seq, &self.value, Some(salt)),
            &self.signature,
        )
    }
}

/// Verifies a signature given as raw bytes over `(seq, value)`.
///
/// Malformed input, such as a signature that is not exactly [`Signature::LENGTH`] bytes,
/// is reported as a [`SignatureError`] like any other mismatch.
pub fn verify_record(
    public_key: &PublicKey,
    seq: u64,
    value: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let signature = Signature::from_slice(signature)?;
    public_key.verify(&encode_signable(seq, value, None), &signature)
}
