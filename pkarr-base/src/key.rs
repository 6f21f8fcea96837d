//! Cryptographic key handling for pkarr records.

use std::{
    borrow::Borrow,
    cmp::{Ord, PartialOrd},
    fmt::{self, Debug, Display},
    hash::Hash,
    ops::Deref,
    str::FromStr,
};

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{SigningKey, VerifyingKey};
use nested_enum_utils::common_fields;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, ResultExt, Snafu, ensure};

/// A public key.
///
/// This is both the verifying key for a record's signature and the identifier the record
/// is stored under on a relay, see [`crate::SignedRecord`].
///
/// The key itself is stored as the `CompressedEdwards` y coordinate of the public key
/// It is verified to decompress into a valid key when created.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PublicKey(CompressedEdwardsY);

impl Borrow<[u8; 32]> for PublicKey {
    fn borrow(&self) -> &[u8; 32] {
        self.as_bytes()
    }
}

impl Deref for PublicKey {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.as_bytes().serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_str(&s).map_err(serde::de::Error::custom)
        } else {
            let data: [u8; 32] = serde::Deserialize::deserialize(deserializer)?;
            Self::try_from(data.as_ref()).map_err(serde::de::Error::custom)
        }
    }
}

impl PublicKey {
    /// The length of an ed25519 `PublicKey`, in bytes.
    pub const LENGTH: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

    /// Get this public key as a byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Construct a `PublicKey` from a slice of bytes.
    ///
    /// # Warning
    ///
    /// This will return a [`KeyParsingError`] if the bytes passed into this method do not
    /// represent a valid `ed25519_dalek` curve point. Will never fail for bytes return from
    /// [`Self::as_bytes`]. See [`VerifyingKey::from_bytes`] for details.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyParsingError> {
        let key = VerifyingKey::from_bytes(bytes)?;
        let y = CompressedEdwardsY(key.to_bytes());
        Ok(Self(y))
    }

    /// Verify a signature on a message with this public key.
    ///
    /// # Return
    ///
    /// Returns `Ok(())` if the signature is valid, and `Err` otherwise.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        let key = VerifyingKey::from_bytes(self.0.as_bytes()).map_err(|_| SignatureError::new())?;
        key.verify_strict(message, &signature.0)
            .map_err(|_| SignatureError::new())
    }

    /// Convert to a hex string limited to the first 5 bytes for a friendly string
    /// representation of the key.
    pub fn fmt_short(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.as_bytes()[..5])
    }

    /// Encodes this key in [z-base-32], the form pkarr uses in domain names.
    ///
    /// [z-base-32]: https://philzimmermann.com/docs/human-oriented-base-32-encoding.txt
    pub fn to_z32(&self) -> String {
        z32::encode(self.as_bytes())
    }

    /// Parses a key from its [z-base-32] encoding.
    ///
    /// [z-base-32]: https://philzimmermann.com/docs/human-oriented-base-32-encoding.txt
    pub fn from_z32(s: &str) -> Result<Self, KeyParsingError> {
        let bytes = z32::decode(s.as_bytes()).context(key_parsing_error::DecodeZ32Snafu)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| key_parsing_error::DecodeInvalidLengthSnafu.build())?;
        Self::from_bytes(&bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyParsingError;

    #[inline]
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let vk = VerifyingKey::try_from(bytes)?;
        Ok(Self(CompressedEdwardsY(vk.to_bytes())))
    }
}

impl TryFrom<&[u8; 32]> for PublicKey {
    type Error = KeyParsingError;

    #[inline]
    fn try_from(bytes: &[u8; 32]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// Lowercase hex, the form a key takes in a relay's `/pkarr/<key>` path.
impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&data_encoding::HEXLOWER.encode(self.as_bytes()))
    }
}

/// Error when deserialising a [`PublicKey`] or a [`SecretKey`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(module)]
pub enum KeyParsingError {
    /// Error when decoding hex.
    #[snafu(transparent)]
    Decode { source: data_encoding::DecodeError },
    /// Error when decoding z-base-32.
    #[snafu(display("invalid z-base-32 encoding"))]
    DecodeZ32 { source: z32::Z32Error },
    /// Error when decoding the public key.
    #[snafu(transparent)]
    Key { source: ed25519_dalek::SignatureError },
    /// The encoded information had the wrong length.
    #[snafu(display("invalid length"))]
    DecodeInvalidLength {},
}

/// Deserialises the [`PublicKey`] from its hex or z-base-32 encoding.
///
/// [`Display`] is capable of serialising the hex format.
impl FromStr for PublicKey {
    type Err = KeyParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == PublicKey::LENGTH * 2 {
            let bytes = decode_hex(s)?;
            Self::from_bytes(&bytes)
        } else {
            Self::from_z32(s)
        }
    }
}

/// A secret key, the caller's key pair.
///
/// The public half is always recoverable with [`SecretKey::public`].
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// Parses a 32 byte seed from hex.
impl FromStr for SecretKey {
    type Err = KeyParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        Ok(SecretKey::from(bytes))
    }
}

impl SecretKey {
    /// The length of the libsodium style secret key, seed followed by the public key.
    pub const KEYPAIR_LENGTH: usize = ed25519_dalek::KEYPAIR_LENGTH;

    /// The public key of this [`SecretKey`].
    pub fn public(&self) -> PublicKey {
        let key = self.0.verifying_key().to_bytes();
        PublicKey(CompressedEdwardsY(key))
    }

    /// Generate a new [`SecretKey`] with a randomness generator.
    ///
    /// ```rust
    /// // use the OsRng option for OS depedndent most secure RNG.
    /// let mut rng = rand::rngs::OsRng;
    /// let _key = pkarr_base::SecretKey::generate(&mut rng);
    /// ```
    pub fn generate<R: CryptoRngCore + ?Sized>(csprng: &mut R) -> Self {
        let secret = SigningKey::generate(csprng);
        Self(secret)
    }

    /// Sign the given message and return a digital signature
    pub fn sign(&self, msg: &[u8]) -> Signature {
        use ed25519_dalek::Signer;

        let sig = self.0.sign(msg);
        Signature(sig)
    }

    /// Convert this to the bytes representing the secret part.
    /// The public part can always be recovered.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Create a secret key from its byte representation, the 32 byte seed.
    ///
    /// The same seed always derives the same key pair.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = SigningKey::from_bytes(bytes);
        Self(secret)
    }

    /// Returns the 64 byte key pair: the seed followed by the public key.
    pub fn to_keypair_bytes(&self) -> [u8; Self::KEYPAIR_LENGTH] {
        self.0.to_keypair_bytes()
    }

    /// Parses a 64 byte key pair, rejecting it if the public half does not belong to the
    /// seed.
    pub fn from_keypair_bytes(bytes: &[u8; Self::KEYPAIR_LENGTH]) -> Result<Self, KeyParsingError> {
        let secret = SigningKey::from_keypair_bytes(bytes)?;
        Ok(Self(secret))
    }
}

impl From<[u8; 32]> for SecretKey {
    fn from(value: [u8; 32]) -> Self {
        Self::from_bytes(&value)
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = KeyParsingError;

    #[inline]
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let secret = SigningKey::try_from(bytes)?;
        Ok(Self(secret))
    }
}

/// Ed25519 signature.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Signature(ed25519_dalek::Signature);

impl Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Signature {
    /// The length of an ed25519 `Signature`, in bytes.
    pub const LENGTH: usize = ed25519_dalek::Signature::BYTE_SIZE;

    /// Return the inner byte array.
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        self.0.to_bytes()
    }

    /// Parse an Ed25519 signature from a byte array.
    pub fn from_bytes(bytes: &[u8; Self::LENGTH]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }

    /// Parse an Ed25519 signature from a byte slice of unchecked length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let bytes: &[u8; Self::LENGTH] = bytes.try_into().map_err(|_| SignatureError::new())?;
        Ok(Self::from_bytes(bytes))
    }
}

/// Verification of a signature failed.
#[derive(Debug, Snafu)]
#[snafu(display("Invalid signature"))]
pub struct SignatureError {
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
}

impl SignatureError {
    pub(crate) fn new() -> Self {
        SignatureSnafu.build()
    }
}

fn decode_hex(s: &str) -> Result<[u8; 32], KeyParsingError> {
    let mut bytes = [0u8; 32];
    let input = s.as_bytes();
    ensure!(
        data_encoding::HEXLOWER_PERMISSIVE.decode_len(input.len())? == bytes.len(),
        key_parsing_error::DecodeInvalidLengthSnafu
    );
    data_encoding::HEXLOWER_PERMISSIVE
        .decode_mut(input, &mut bytes)
        .map_err(|partial| partial.error)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use data_encoding::HEXLOWER;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_public_key_postcard() {
        let public_key =
            PublicKey::from_str("ae58ff8833241ac82d6ff7611046ed67b5072d142c588d0063e942d9a75502b6")
                .unwrap();
        let bytes = postcard::to_stdvec(&public_key).unwrap();
        let expected = HEXLOWER
            .decode(b"ae58ff8833241ac82d6ff7611046ed67b5072d142c588d0063e942d9a75502b6")
            .unwrap();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn public_key_json() {
        let key = PublicKey::from_bytes(&[0; 32]).unwrap();
        let s = serde_json::to_string(&key).unwrap();
        assert_eq!(
            s,
            "\"0000000000000000000000000000000000000000000000000000000000000000\""
        );
        let key2: PublicKey = serde_json::from_str(&s).unwrap();
        assert_eq!(key, key2);
    }

    #[test]
    fn test_from_str() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0u64);
        let key = SecretKey::generate(&mut rng);
        assert_eq!(
            SecretKey::from_str(&HEXLOWER.encode(&key.to_bytes()))
                .unwrap()
                .to_bytes(),
            key.to_bytes()
        );

        assert_eq!(
            PublicKey::from_str(&key.public().to_string()).unwrap(),
            key.public()
        );
        assert_eq!(
            PublicKey::from_str(&key.public().to_z32()).unwrap(),
            key.public()
        );
        assert_eq!(
            PublicKey::from_str(&key.public().to_string().to_uppercase()).unwrap(),
            key.public()
        );
    }

    #[test]
    fn test_regression_parse_public_key_panic() {
        assert!(PublicKey::from_str("foobarbaz").is_err());
        assert!(PublicKey::from_str("").is_err());
        assert!(PublicKey::from_z32("yy").is_err());
    }

    #[test]
    fn test_fmt_short() {
        let key = PublicKey::from_bytes(&[0; 32]).unwrap();
        assert_eq!(key.fmt_short(), "0000000000");
    }

    #[test]
    fn seeded_keypair_is_deterministic() {
        let a = SecretKey::from_bytes(&[7u8; 32]);
        let b = SecretKey::from_bytes(&[7u8; 32]);
        assert_eq!(a.public(), b.public());
        assert_eq!(a.to_keypair_bytes(), b.to_keypair_bytes());

        let c = SecretKey::from_bytes(&[8u8; 32]);
        assert_ne!(a.public(), c.public());
    }

    #[test]
    fn keypair_bytes_roundtrip() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1u64);
        let key = SecretKey::generate(&mut rng);
        let bytes = key.to_keypair_bytes();
        assert_eq!(&bytes[..32], &key.to_bytes());
        assert_eq!(&bytes[32..], key.public().as_bytes());

        let parsed = SecretKey::from_keypair_bytes(&bytes).unwrap();
        assert_eq!(parsed.public(), key.public());

        // a public half from another key is rejected
        let other = SecretKey::generate(&mut rng);
        let mut mixed = bytes;
        mixed[32..].copy_from_slice(other.public().as_bytes());
        assert!(SecretKey::from_keypair_bytes(&mixed).is_err());
    }

    #[test]
    fn signature_from_slice() {
        let key = SecretKey::from_bytes(&[1u8; 32]);
        let signature = key.sign(b"hello world");
        let bytes = signature.to_bytes();
        assert_eq!(Signature::from_slice(&bytes).unwrap(), signature);
        assert!(Signature::from_slice(&bytes[..63]).is_err());
        assert!(Signature::from_slice(&[]).is_err());
    }

    #[test]
    fn sign_and_verify() {
        let key = SecretKey::from_bytes(&[2u8; 32]);
        let signature = key.sign(b"hello world");
        key.public().verify(b"hello world", &signature).unwrap();
        assert!(key.public().verify(b"hello world!", &signature).is_err());

        let other = SecretKey::from_bytes(&[3u8; 32]);
        assert!(other.public().verify(b"hello world", &signature).is_err());
    }
}
