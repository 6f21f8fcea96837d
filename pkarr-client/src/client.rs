//! Publishing and resolving records against several relays at once.
//!
//! Every operation is sent to all configured relays concurrently.  Relays are not trusted:
//! a resolved record is only returned after its signature checked out against the public
//! key it was requested for, so a relay can at worst withhold a record or serve an older
//! one, never forge one.
//!
//! The first relay to produce a usable answer wins.  Requests still in flight at that
//! point are dropped, which cancels them.  Only if every relay fails does the operation
//! fail, with [`ClientError::AllRelaysFailed`] listing each relay's failure.

use std::{env::VarError, future::Future, sync::Arc};

use bytes::Bytes;
use futures_buffered::FuturesUnordered;
use http::StatusCode;
use n0_future::{StreamExt, time::Duration};
use pkarr_base::{PublicKey, SecretKey, SignedRecord};
use snafu::{IntoError, ResultExt};
use tracing::{Instrument, debug, error_span, warn};

use crate::{
    codec::{JsonCodec, RecordCodec},
    error::{
        AllRelaysFailedSnafu, ClientError, DecodeSnafu, EncodeSnafu, EnvelopeSnafu,
        HttpStatusSnafu, InvalidSignatureSnafu, MalformedResponseSnafu, NotFoundSnafu, RelayError,
        RelayFailure,
    },
    relay::{GetBody, InvalidEnvSnafu, InvalidJsonSnafu, PutBody, RelayUrl, RelayUrlError},
    sequence::{SequenceSource, SystemClock},
    transport::{HttpTransport, RelayResponse, Transport},
};

/// Environment variable holding a comma separated list of relays, see
/// [`Builder::relays_from_env`].
pub const PKARR_RELAYS_ENV: &str = "PKARR_RELAYS";

/// How to pick among the records different relays return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Return the first verified record.
    ///
    /// A relay holding an older record but answering faster wins over one holding a newer
    /// record.
    #[default]
    FirstVerified,
    /// After the first verified record arrived, keep collecting for `window` and return
    /// the record with the highest sequence number.
    ///
    /// On equal sequence numbers the earlier answer is kept.
    HighestSeq {
        /// How long to wait for more answers after the first one.
        window: Duration,
    },
}

/// A successful publish.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// The relay whose acknowledgement completed the publish.
    pub relay: RelayUrl,
    /// The acknowledgement body.
    pub response: serde_json::Value,
    /// The record that was published, identical for all relays.
    pub record: SignedRecord,
}

/// A successful resolve.
#[derive(Debug, Clone)]
pub struct GetOutcome<T> {
    /// The relay that served the record.
    pub relay: RelayUrl,
    /// The record's sequence number.
    pub seq: u64,
    /// The decoded value.
    pub value: T,
    /// The verified record.
    pub record: SignedRecord,
}

/// Builder for a [`Client`].
#[derive(derive_more::Debug)]
pub struct Builder<C = JsonCodec> {
    relays: Vec<RelayUrl>,
    codec: C,
    sequence: Arc<dyn SequenceSource>,
    transport: Option<Arc<dyn Transport>>,
    policy: ResolvePolicy,
}

impl Default for Builder<JsonCodec> {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            codec: JsonCodec::default(),
            sequence: Arc::new(SystemClock),
            transport: None,
            policy: ResolvePolicy::default(),
        }
    }
}

impl<C: RecordCodec> Builder<C> {
    /// Adds a relay.
    pub fn relay(mut self, relay: RelayUrl) -> Self {
        self.relays.push(relay);
        self
    }

    /// Adds several relays.
    pub fn relays(mut self, relays: impl IntoIterator<Item = RelayUrl>) -> Self {
        self.relays.extend(relays);
        self
    }

    /// Adds the relays listed in the [`PKARR_RELAYS_ENV`] environment variable.
    ///
    /// Does nothing if the variable is not set, fails if it is set but not valid unicode.
    pub fn relays_from_env(self) -> Result<Self, RelayUrlError> {
        self.relays_from_var(std::env::var(PKARR_RELAYS_ENV))
    }

    fn relays_from_var(self, var: Result<String, VarError>) -> Result<Self, RelayUrlError> {
        match var {
            Ok(list) => Ok(self.relays(parse_relays(&list)?)),
            Err(VarError::NotPresent) => Ok(self),
            Err(source @ VarError::NotUnicode(_)) => Err(InvalidEnvSnafu {
                name: PKARR_RELAYS_ENV,
            }
            .into_error(source)),
        }
    }

    /// Sets the codec used for record values.
    pub fn codec<C2: RecordCodec>(self, codec: C2) -> Builder<C2> {
        Builder {
            relays: self.relays,
            codec,
            sequence: self.sequence,
            transport: self.transport,
            policy: self.policy,
        }
    }

    /// Sets where sequence numbers for publishing come from.
    ///
    /// Defaults to [`SystemClock`].
    pub fn sequence_source(mut self, sequence: impl SequenceSource) -> Self {
        self.sequence = Arc::new(sequence);
        self
    }

    /// Sets the transport requests are sent with.
    ///
    /// Defaults to a [`HttpTransport`].
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses a [`HttpTransport`] with the given [`reqwest::Client`].
    pub fn http_client(self, http_client: reqwest::Client) -> Self {
        self.transport(HttpTransport::with_client(http_client))
    }

    /// Sets the policy for choosing among resolved records.
    pub fn resolve_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the client.
    pub fn build(self) -> Client<C> {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));
        Client {
            inner: Arc::new(Inner {
                relays: self.relays,
                codec: self.codec,
                sequence: self.sequence,
                transport,
                policy: self.policy,
            }),
        }
    }
}

/// Parses a comma separated list of relay addresses.
pub fn parse_relays(list: &str) -> Result<Vec<RelayUrl>, RelayUrlError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Publishes and resolves records on a set of relays.
///
/// Cheap to clone.
#[derive(Debug)]
pub struct Client<C = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[derive(derive_more::Debug)]
struct Inner<C> {
    relays: Vec<RelayUrl>,
    codec: C,
    sequence: Arc<dyn SequenceSource>,
    transport: Arc<dyn Transport>,
    policy: ResolvePolicy,
}

impl Client<JsonCodec> {
    /// Returns a new builder.
    pub fn builder() -> Builder<JsonCodec> {
        Builder::default()
    }
}

impl<C: RecordCodec> Client<C> {
    /// The configured relays.
    pub fn relays(&self) -> &[RelayUrl] {
        &self.inner.relays
    }

    /// Encodes, sequences and signs `value`, without sending it anywhere.
    pub fn create_put_request(
        &self,
        secret_key: &SecretKey,
        value: &C::Value,
    ) -> Result<SignedRecord, ClientError> {
        let bytes = self.inner.codec.encode(value).context(EncodeSnafu)?;
        let seq = self.inner.sequence.next_seq();
        Ok(SignedRecord::sign(secret_key, seq, bytes))
    }

    /// Publishes `value` under `secret_key` to the configured relays.
    pub async fn put(
        &self,
        secret_key: &SecretKey,
        value: &C::Value,
    ) -> Result<PutOutcome, ClientError> {
        self.put_to(secret_key, value, &self.inner.relays).await
    }

    /// Publishes `value` under `secret_key` to `relays`.
    pub async fn put_to(
        &self,
        secret_key: &SecretKey,
        value: &C::Value,
        relays: &[RelayUrl],
    ) -> Result<PutOutcome, ClientError> {
        let record = self.create_put_request(secret_key, value)?;
        self.publish_record(&secret_key.public(), record, relays)
            .await
    }

    /// Publishes an already signed record to `relays`.
    ///
    /// The same bytes are sent to every relay.
    pub async fn publish_record(
        &self,
        public_key: &PublicKey,
        record: SignedRecord,
        relays: &[RelayUrl],
    ) -> Result<PutOutcome, ClientError> {
        let span = error_span!("pkarr_put", key = %public_key.fmt_short(), seq = record.seq());
        async move {
            debug!(relays = relays.len(), "publishing record");
            let body = PutBody::from(&record)
                .to_json()
                .context(EnvelopeSnafu)?;
            let attempts = relays.iter().map(|relay| {
                let request = self
                    .inner
                    .transport
                    .put(relay.record_url(public_key), body.clone());
                settle(relay.clone(), async move {
                    let response = request.await?;
                    check_put_response(response)
                })
            });
            match race_to_success(attempts).await {
                Ok((relay, response)) => {
                    debug!(%relay, "record published");
                    Ok(PutOutcome {
                        relay,
                        response,
                        record,
                    })
                }
                Err(failures) => Err(all_failed(failures)),
            }
        }
        .instrument(span)
        .await
    }

    /// Resolves the value published under `public_key` from the configured relays.
    pub async fn get(&self, public_key: &PublicKey) -> Result<GetOutcome<C::Value>, ClientError> {
        self.get_from(public_key, &self.inner.relays).await
    }

    /// Resolves the value published under `public_key` from `relays`.
    ///
    /// A relay's answer only counts once the record verified against `public_key` and
    /// its value decoded.
    pub async fn get_from(
        &self,
        public_key: &PublicKey,
        relays: &[RelayUrl],
    ) -> Result<GetOutcome<C::Value>, ClientError> {
        let codec = &self.inner.codec;
        let (relay, (record, value)) = self
            .resolve_with(public_key, relays, |record| {
                let value = codec.decode(record.value()).context(DecodeSnafu)?;
                Ok((record, value))
            })
            .await?;
        Ok(GetOutcome {
            relay,
            seq: record.seq(),
            value,
            record,
        })
    }

    /// Resolves the verified record published under `public_key`, leaving its value
    /// undecoded.
    pub async fn resolve_record(
        &self,
        public_key: &PublicKey,
        relays: &[RelayUrl],
    ) -> Result<GetOutcome<Bytes>, ClientError> {
        let (relay, record) = self.resolve_with(public_key, relays, Ok).await?;
        Ok(GetOutcome {
            relay,
            seq: record.seq(),
            value: record.value().clone(),
            record,
        })
    }

    async fn resolve_with<T, F>(
        &self,
        public_key: &PublicKey,
        relays: &[RelayUrl],
        accept: F,
    ) -> Result<(RelayUrl, T), ClientError>
    where
        F: Fn(SignedRecord) -> Result<T, RelayError>,
        T: HasRecord,
    {
        let span = error_span!("pkarr_get", key = %public_key.fmt_short());
        async move {
            debug!(relays = relays.len(), "resolving record");
            let accept = &accept;
            let attempts = relays.iter().map(|relay| {
                let request = self.inner.transport.get(relay.record_url(public_key));
                settle(relay.clone(), async move {
                    let response = request.await?;
                    let record = check_get_response(public_key, response)?;
                    accept(record)
                })
            });
            let res = match self.inner.policy {
                ResolvePolicy::FirstVerified => race_to_success(attempts).await,
                ResolvePolicy::HighestSeq { window } => {
                    race_to_freshest(attempts, window, |(_, t)| t.record().seq()).await
                }
            };
            match res {
                Ok((relay, t)) => {
                    debug!(%relay, seq = t.record().seq(), "record resolved");
                    Ok((relay, t))
                }
                Err(failures) => Err(all_failed(failures)),
            }
        }
        .instrument(span)
        .await
    }
}

/// Access to the record inside a resolve result.
trait HasRecord {
    fn record(&self) -> &SignedRecord;
}

impl HasRecord for SignedRecord {
    fn record(&self) -> &SignedRecord {
        self
    }
}

impl<V> HasRecord for (SignedRecord, V) {
    fn record(&self) -> &SignedRecord {
        &self.0
    }
}

fn all_failed(failures: Vec<RelayFailure>) -> ClientError {
    warn!(
        failures = failures.len(),
        errors = %failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
        "all relays failed",
    );
    AllRelaysFailedSnafu { failures }.build()
}

/// Runs one relay's attempt, tagging a failure with the relay.
async fn settle<T>(
    relay: RelayUrl,
    attempt: impl Future<Output = Result<T, RelayError>>,
) -> Result<(RelayUrl, T), RelayFailure> {
    match attempt.await {
        Ok(t) => {
            debug!(%relay, "relay succeeded");
            Ok((relay, t))
        }
        Err(error) => {
            debug!(%relay, %error, "relay failed");
            Err(RelayFailure { relay, error })
        }
    }
}

/// Resolves with the first success, or with all failures in the order they happened.
///
/// All attempts are created before any is polled.  Returning drops the attempts that did
/// not finish yet.
async fn race_to_success<T, F>(
    attempts: impl IntoIterator<Item = F>,
) -> Result<T, Vec<RelayFailure>>
where
    F: Future<Output = Result<T, RelayFailure>>,
{
    let mut pending: FuturesUnordered<F> = attempts.into_iter().collect();
    let mut failures = Vec::with_capacity(pending.len());
    while let Some(outcome) = pending.next().await {
        match outcome {
            Ok(t) => return Ok(t),
            Err(failure) => failures.push(failure),
        }
    }
    Err(failures)
}

/// Like [`race_to_success`], but after the first success waits up to `window` for a
/// success with a higher `seq`.
async fn race_to_freshest<T, F>(
    attempts: impl IntoIterator<Item = F>,
    window: Duration,
    seq: impl Fn(&T) -> u64,
) -> Result<T, Vec<RelayFailure>>
where
    F: Future<Output = Result<T, RelayFailure>>,
{
    let mut pending: FuturesUnordered<F> = attempts.into_iter().collect();
    let mut failures = Vec::with_capacity(pending.len());
    let mut best = loop {
        match pending.next().await {
            Some(Ok(t)) => break t,
            Some(Err(failure)) => failures.push(failure),
            None => return Err(failures),
        }
    };

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            outcome = pending.next() => match outcome {
                Some(Ok(t)) => {
                    if seq(&t) > seq(&best) {
                        best = t;
                    }
                }
                // A failure after a success does not matter anymore.
                Some(Err(_)) => {}
                None => break,
            },
        }
    }
    Ok(best)
}

fn check_put_response(response: RelayResponse) -> Result<serde_json::Value, RelayError> {
    let RelayResponse { status, body } = response;
    if !status.is_success() {
        return Err(http_status_error(status, &body));
    }
    serde_json::from_slice(&body)
        .context(InvalidJsonSnafu)
        .context(MalformedResponseSnafu)
}

fn check_get_response(
    public_key: &PublicKey,
    response: RelayResponse,
) -> Result<SignedRecord, RelayError> {
    let RelayResponse { status, body } = response;
    if status == StatusCode::NOT_FOUND {
        return Err(NotFoundSnafu.build());
    }
    if !status.is_success() {
        return Err(http_status_error(status, &body));
    }
    let body = GetBody::from_slice(&body).context(MalformedResponseSnafu)?;
    let record = body
        .record
        .to_signed_record()
        .context(MalformedResponseSnafu)?;
    record.verify(public_key).context(InvalidSignatureSnafu)?;
    Ok(record)
}

fn http_status_error(status: StatusCode, body: &[u8]) -> RelayError {
    HttpStatusSnafu {
        status,
        body: String::from_utf8_lossy(body),
    }
    .build()
}
