//! Internal utilities to support testing.
//!
//! [`TestRelay`] is a pkarr relay running in-process on localhost, storing records in
//! memory.  It can be told to misbehave, see [`Behavior`].
use std::{
    collections::HashMap,
    future::IntoFuture,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::put,
};
use bytes::Bytes;
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use pkarr_base::{PublicKey, SignedRecord};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::relay::{GetBody, PutBody, QueryInfo, RelayUrl, WireRecord};

/// Shuts down the server it belongs to when dropped.
#[derive(Debug)]
pub struct CleanupDropGuard(pub(crate) oneshot::Sender<()>);

/// How a [`TestRelay`] answers requests.
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    /// Stores and serves records like a real relay.
    #[default]
    Honest,
    /// Answers every request with this status.
    Status(StatusCode),
    /// Waits before answering honestly.
    Delay(Duration),
    /// Never answers.
    Hang,
    /// Serves stored records with a sequence number their signature does not cover.
    Tamper,
    /// Answers `200` with a body that is not JSON.
    Garbage,
}

impl Behavior {
    /// Returns the response to send instead of handling the request, if any.
    async fn intercept(&self) -> Option<Response> {
        match self {
            Self::Honest | Self::Tamper => None,
            Self::Status(status) => Some(
                (
                    *status,
                    Json(serde_json::json!({ "error": "refused by test relay" })),
                )
                    .into_response(),
            ),
            Self::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                None
            }
            Self::Hang => std::future::pending().await,
            Self::Garbage => Some((StatusCode::OK, "<html>not a relay</html>").into_response()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RelayState {
    records: Arc<Mutex<HashMap<PublicKey, SignedRecord>>>,
    behavior: Arc<Mutex<Behavior>>,
}

impl RelayState {
    fn behavior(&self) -> Behavior {
        self.behavior.lock().expect("poisoned").clone()
    }
}

/// A pkarr relay for tests.
///
/// Serves `PUT` and `GET` on `/pkarr/{key}`.  A `PUT` is only accepted if it carries a
/// JSON body whose record verifies and whose sequence number is higher than the stored
/// one, otherwise it is rejected with `415`, `400` or `409`.  The server shuts down when
/// this is dropped.
#[derive(Debug)]
pub struct TestRelay {
    url: RelayUrl,
    state: RelayState,
    _drop_guard: CleanupDropGuard,
}

impl TestRelay {
    /// Runs an honest relay.
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with(Behavior::Honest).await
    }

    /// Runs a relay with the given behavior.
    pub async fn spawn_with(behavior: Behavior) -> std::io::Result<Self> {
        let state = RelayState {
            behavior: Arc::new(Mutex::new(behavior)),
            ..Default::default()
        };
        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let app = Router::new()
            .route("/pkarr/{key}", put(pkarr_put).get(pkarr_get))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let bound_addr = listener.local_addr()?;
        let url: RelayUrl = format!("http://{bound_addr}")
            .parse()
            .expect("valid url");

        let (tx, mut rx) = oneshot::channel();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app);
            tokio::select! {
                _ = &mut rx => {
                    debug!("shutting down test relay");
                }
                res = serve.into_future() => {
                    if let Err(e) = res {
                        error!("test relay error: {e:?}");
                    }
                }
            }
        });
        Ok(Self {
            url,
            state,
            _drop_guard: CleanupDropGuard(tx),
        })
    }

    /// The relay's address.
    pub fn url(&self) -> &RelayUrl {
        &self.url
    }

    /// Changes how the relay answers from now on.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.state.behavior.lock().expect("poisoned") = behavior;
    }

    /// Stores a record without any checks.
    pub fn insert(&self, public_key: PublicKey, record: SignedRecord) {
        self.state
            .records
            .lock()
            .expect("poisoned")
            .insert(public_key, record);
    }

    /// The record stored for `public_key`.
    pub fn record(&self, public_key: &PublicKey) -> Option<SignedRecord> {
        self.state
            .records
            .lock()
            .expect("poisoned")
            .get(public_key)
            .cloned()
    }
}

async fn pkarr_put(
    State(state): State<RelayState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if let Some(res) = state.behavior().intercept().await {
        return Ok(res);
    }
    if headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) != Some("application/json") {
        return Err(AppError {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            message: "expected an application/json body".into(),
        });
    }
    let public_key: PublicKey = key.parse().map_err(AppError::bad_request)?;
    let body: PutBody = serde_json::from_slice(&body).map_err(AppError::bad_request)?;
    let record = body.to_signed_record().map_err(AppError::bad_request)?;
    record.verify(&public_key).map_err(AppError::bad_request)?;

    {
        let mut records = state.records.lock().expect("poisoned");
        if let Some(existing) = records.get(&public_key) {
            let stale = existing.seq() > record.seq()
                || (existing.seq() == record.seq() && existing != &record);
            if stale {
                return Err(AppError {
                    status: StatusCode::CONFLICT,
                    message: format!(
                        "sequence number {} is not newer than {}",
                        record.seq(),
                        existing.seq()
                    ),
                });
            }
        }
        records.insert(public_key, record.clone());
    }
    debug!(key = %public_key.fmt_short(), seq = record.seq(), "stored record");
    Ok(Json(GetBody {
        record: WireRecord::from(&record),
        query: Some(QueryInfo {
            kind: "put".into(),
            nodes: 1,
            time: 0,
        }),
    })
    .into_response())
}

async fn pkarr_get(
    State(state): State<RelayState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let behavior = state.behavior();
    if let Some(res) = behavior.intercept().await {
        return Ok(res);
    }
    let public_key: PublicKey = key.parse().map_err(AppError::bad_request)?;
    let record = state
        .records
        .lock()
        .expect("poisoned")
        .get(&public_key)
        .cloned();
    let Some(record) = record else {
        return Err(AppError {
            status: StatusCode::NOT_FOUND,
            message: "record not found".into(),
        });
    };
    let mut wire = WireRecord::from(&record);
    if matches!(behavior, Behavior::Tamper) {
        wire.seq += 1;
    }
    Ok(Json(GetBody {
        record: wire,
        query: Some(QueryInfo {
            kind: "get".into(),
            nodes: 1,
            time: 0,
        }),
    })
    .into_response())
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status != StatusCode::NOT_FOUND {
            warn!(err = ?self, "request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
