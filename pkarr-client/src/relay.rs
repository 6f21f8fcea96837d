//! Relay addresses and the JSON envelope records travel in.
//!
//! A relay exposes a record under `<relay>/pkarr/<hex public key>`:
//!
//! - `PUT` with a [`PutBody`] stores a record, answering `200` with a JSON acknowledgement.
//! - `GET` answers `200` with a [`GetBody`], or `404` if the relay knows no record for
//!   the key.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use data_encoding::{BASE64, HEXLOWER_PERMISSIVE};
use nested_enum_utils::common_fields;
use pkarr_base::{PublicKey, Signature, SignedRecord};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, ResultExt, Snafu, ensure};
use url::Url;

/// The address of a pkarr relay.
///
/// Parsed from a string, an address without a scheme is taken to be `https://`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{_0}")]
pub struct RelayUrl(Url);

impl fmt::Debug for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayUrl({})", self.0)
    }
}

/// Error parsing a [`RelayUrl`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum RelayUrlError {
    #[snafu(display("invalid relay address {addr:?}"))]
    InvalidUrl {
        addr: String,
        source: url::ParseError,
    },
    #[snafu(display("unsupported relay url scheme {scheme:?}"))]
    UnsupportedScheme { scheme: String },
    #[snafu(display("environment variable {name} is not valid unicode"))]
    InvalidEnv {
        name: &'static str,
        source: std::env::VarError,
    },
}

impl FromStr for RelayUrl {
    type Err = RelayUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let url = if s.contains("://") {
            Url::parse(s)
        } else {
            Url::parse(&format!("https://{s}"))
        }
        .context(InvalidUrlSnafu { addr: s })?;
        Self::try_from(url)
    }
}

impl TryFrom<Url> for RelayUrl {
    type Error = RelayUrlError;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            UnsupportedSchemeSnafu {
                scheme: url.scheme()
            }
        );
        Ok(Self(url))
    }
}

impl RelayUrl {
    /// The base URL of the relay.
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// The URL a record for `public_key` lives at on this relay.
    pub fn record_url(&self, public_key: &PublicKey) -> Url {
        let mut url = self.0.clone();
        // http(s) urls always have a path to push onto.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("pkarr")
                .push(&public_key.to_string());
        }
        url
    }
}

/// Errors in a relay's response body.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum EnvelopeError {
    #[snafu(display("body is not valid JSON"))]
    InvalidJson { source: serde_json::Error },
    #[snafu(display("failed to serialize body"))]
    Serialize { source: serde_json::Error },
    #[snafu(display("record value is not valid base64"))]
    InvalidBase64 { source: data_encoding::DecodeError },
    #[snafu(display("record signature is not valid hex"))]
    InvalidHex { source: data_encoding::DecodeError },
    #[snafu(display("record signature must be 64 bytes, got {len}"))]
    InvalidSignatureLength { len: usize },
}

/// Body of a `PUT` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutBody {
    /// The record value, base64.
    pub v: String,
    /// The sequence number.
    pub seq: u64,
    /// The signature, hex.
    pub sig: String,
}

impl From<&SignedRecord> for PutBody {
    fn from(record: &SignedRecord) -> Self {
        Self {
            v: BASE64.encode(record.value()),
            seq: record.seq(),
            sig: HEXLOWER_PERMISSIVE.encode(&record.signature().to_bytes()),
        }
    }
}

impl PutBody {
    /// Serializes the body to JSON.
    pub fn to_json(&self) -> Result<Bytes, EnvelopeError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .context(SerializeSnafu)
    }

    /// Decodes the record this body carries, without verifying it.
    pub fn to_signed_record(&self) -> Result<SignedRecord, EnvelopeError> {
        decode_record(self.seq, &self.v, &self.sig)
    }
}

/// Body of a successful `GET` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBody {
    /// The record.
    pub record: WireRecord,
    /// Information about how the relay found the record, if it shares it.
    #[serde(default)]
    pub query: Option<QueryInfo>,
}

impl GetBody {
    /// Parses a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(body).context(InvalidJsonSnafu)
    }
}

/// A record as a relay returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    /// The sequence number.
    pub seq: u64,
    /// The record value, base64.
    pub v: String,
    /// The signature, hex.
    pub sig: String,
}

impl WireRecord {
    /// Decodes the record, without verifying it.
    pub fn to_signed_record(&self) -> Result<SignedRecord, EnvelopeError> {
        decode_record(self.seq, &self.v, &self.sig)
    }
}

impl From<&SignedRecord> for WireRecord {
    fn from(record: &SignedRecord) -> Self {
        let PutBody { v, seq, sig } = PutBody::from(record);
        Self { seq, v, sig }
    }
}

/// How a relay answered a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInfo {
    /// The kind of query, `get` for lookups.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// The number of DHT nodes that answered.
    #[serde(default)]
    pub nodes: u64,
    /// How long the query took.
    #[serde(default)]
    pub time: u64,
}

fn decode_record(seq: u64, v: &str, sig: &str) -> Result<SignedRecord, EnvelopeError> {
    let value = BASE64.decode(v.as_bytes()).context(InvalidBase64Snafu)?;
    let sig = HEXLOWER_PERMISSIVE
        .decode(sig.as_bytes())
        .context(InvalidHexSnafu)?;
    let sig: [u8; Signature::LENGTH] = sig
        .as_slice()
        .try_into()
        .map_err(|_| InvalidSignatureLengthSnafu { len: sig.len() }.build())?;
    Ok(SignedRecord::from_parts(
        seq,
        value,
        Signature::from_bytes(&sig),
    ))
}
