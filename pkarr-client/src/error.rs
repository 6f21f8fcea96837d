//! Errors of a single relay and of a whole publish or resolve.

use http::StatusCode;
use nested_enum_utils::common_fields;
use pkarr_base::SignatureError;
use snafu::{Backtrace, Snafu};

use crate::{codec::CodecError, relay::EnvelopeError, relay::RelayUrl, transport::TransportError};

/// Why a single relay did not produce a usable answer.
///
/// None of these abort a publish or resolve, they are collected into a [`RelayFailure`]
/// each and only surface once every relay failed.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum RelayError {
    #[snafu(transparent)]
    Transport { source: TransportError },
    #[snafu(display("relay responded with status {status}: {body}"))]
    HttpStatus { status: StatusCode, body: String },
    #[snafu(display("Not found"))]
    NotFound {},
    #[snafu(display("malformed relay response"))]
    MalformedResponse { source: EnvelopeError },
    #[snafu(display("record signature does not match the public key"))]
    InvalidSignature { source: SignatureError },
    #[snafu(display("record value could not be decoded"))]
    Decode { source: CodecError },
}

impl RelayError {
    /// Whether the relay answered that it has no record for the key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A relay together with the reason it failed.
#[derive(Debug, derive_more::Display)]
#[display("{relay}: {error}")]
pub struct RelayFailure {
    /// The relay that failed.
    pub relay: RelayUrl,
    /// What went wrong.
    pub error: RelayError,
}

/// Errors of [`crate::Client`] operations.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    /// The value could not be encoded, nothing was sent.
    #[snafu(display("failed to encode record value"))]
    Encode { source: CodecError },
    /// The request body could not be built, nothing was sent.
    #[snafu(display("failed to build request body"))]
    Envelope { source: EnvelopeError },
    /// Every relay failed.
    ///
    /// `failures` holds one entry per relay, in the order they failed.
    #[snafu(display("all {} relays failed", failures.len()))]
    AllRelaysFailed { failures: Vec<RelayFailure> },
}

impl ClientError {
    /// The per-relay failures, empty unless every relay failed.
    pub fn failures(&self) -> &[RelayFailure] {
        match self {
            Self::AllRelaysFailed { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Whether every relay was reached and none had a record.
    pub fn is_not_found(&self) -> bool {
        let failures = self.failures();
        !failures.is_empty() && failures.iter().all(|f| f.error.is_not_found())
    }
}
