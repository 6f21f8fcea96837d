//! Issuing single requests to a relay.

use std::fmt;

use bytes::Bytes;
use http::StatusCode;
use n0_future::boxed::BoxFuture;
use nested_enum_utils::common_fields;
use snafu::{Backtrace, IntoError, Snafu};
use tracing::trace;
use url::Url;

/// The raw answer of a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    /// The HTTP status.
    pub status: StatusCode,
    /// The full response body.
    pub body: Bytes,
}

/// The request could not be completed, no response was received.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum TransportError {
    #[snafu(display("request to {url} failed"))]
    Request {
        url: Url,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl TransportError {
    /// Creates a new error from an arbitrary error type.
    pub fn from_err<T: std::error::Error + Send + Sync + 'static>(url: Url, source: T) -> Self {
        RequestSnafu { url }.into_error(Box::new(source))
    }
}

/// Sends requests to relays.
///
/// Implementations only report whether a response arrived.  Interpreting the status and
/// body, and whether the relay can be trusted, is up to the [`crate::Client`].
///
/// The returned futures may be dropped before completion, which must cancel the request.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// `PUT`s a JSON `body` to `url`.
    fn put(&self, url: Url, body: Bytes) -> BoxFuture<Result<RelayResponse, TransportError>>;

    /// `GET`s `url`.
    fn get(&self, url: Url) -> BoxFuture<Result<RelayResponse, TransportError>>;
}

/// A [`Transport`] over HTTP(S), using [`reqwest`].
#[derive(Clone, Default)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HttpTransport")
    }
}

impl HttpTransport {
    /// Creates a transport using a default [`reqwest::Client`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport from a preconfigured [`reqwest::Client`].
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn send(
        url: Url,
        request: reqwest::RequestBuilder,
    ) -> Result<RelayResponse, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|err| TransportError::from_err(url.clone(), err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::from_err(url.clone(), err))?;
        trace!(%url, %status, len = body.len(), "relay response");
        Ok(RelayResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn put(&self, url: Url, body: Bytes) -> BoxFuture<Result<RelayResponse, TransportError>> {
        let request = self
            .http_client
            .put(url.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body);
        Box::pin(Self::send(url, request))
    }

    fn get(&self, url: Url) -> BoxFuture<Result<RelayResponse, TransportError>> {
        let request = self.http_client.get(url.clone());
        Box::pin(Self::send(url, request))
    }
}
