//! Encoding of application values into the opaque bytes of a record.

use std::{fmt, marker::PhantomData};

use bytes::Bytes;
use nested_enum_utils::common_fields;
use serde::{Serialize, de::DeserializeOwned};
use snafu::{Backtrace, ResultExt, Snafu};

/// Turns application values into record bytes and back.
///
/// Whatever a codec produces is signed and published as-is, and whatever a relay returns is
/// only passed to [`RecordCodec::decode`] after its signature was verified.
pub trait RecordCodec: fmt::Debug + Send + Sync + 'static {
    /// The application level value.
    type Value;

    /// Encodes a value into record bytes.
    fn encode(&self, value: &Self::Value) -> Result<Bytes, CodecError>;

    /// Decodes record bytes into a value.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError>;
}

/// Failure to encode or decode a record value.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum CodecError {
    #[snafu(display("failed to encode record value"))]
    Encode { source: serde_json::Error },
    #[snafu(display("failed to decode record value"))]
    Decode { source: serde_json::Error },
}

/// A [`RecordCodec`] storing values as JSON.
///
/// Any `serde` type works, the default of [`serde_json::Value`] accepts whatever JSON a
/// publisher chose to store.
pub struct JsonCodec<T = serde_json::Value> {
    _value: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a new JSON codec.
    pub fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> RecordCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Bytes, CodecError> {
        let bytes = serde_json::to_vec(value).context(EncodeSnafu)?;
        Ok(bytes.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).context(DecodeSnafu)
    }
}
