//! Publish and resolve signed records through pkarr relays.
//!
//! A record is an opaque value signed with an ed25519 key together with a sequence number.
//! Anyone knowing the public key can look the record up on a relay and verify it was
//! published by the key's owner.  Relays are plain HTTP servers storing records for keys,
//! usually backed by the mainline DHT, and are not trusted: every record they return is
//! verified before it is handed out.
//!
//! The [`Client`] talks to several relays at once:
//!
//! ```no_run
//! # async fn wrapper() -> n0_snafu::Result {
//! use pkarr_client::{Client, RelayUrl};
//! use pkarr_base::SecretKey;
//!
//! let client = Client::builder()
//!     .relay("relay.example.com".parse::<RelayUrl>()?)
//!     .relay("https://other-relay.example.org".parse::<RelayUrl>()?)
//!     .build();
//!
//! let secret_key = SecretKey::generate(&mut rand::rngs::OsRng);
//! client
//!     .put(&secret_key, &serde_json::json!({ "addr": "192.0.2.7:4433" }))
//!     .await?;
//!
//! let resolved = client.get(&secret_key.public()).await?;
//! println!("{} (seq {}) from {}", resolved.value, resolved.seq, resolved.relay);
//! # Ok(())
//! # }
//! ```
//!
//! Both operations complete with the first relay that succeeds and only fail if every
//! relay failed, see [`ClientError::AllRelaysFailed`].
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]
#![cfg_attr(pkarr_docsrs, feature(doc_auto_cfg))]

pub mod client;
pub mod codec;
pub mod error;
pub mod relay;
pub mod sequence;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(pkarr_docsrs, doc(cfg(any(test, feature = "test-utils"))))]
pub mod test_utils;

pub use self::{
    client::{Builder, Client, GetOutcome, PKARR_RELAYS_ENV, PutOutcome, ResolvePolicy},
    codec::{CodecError, JsonCodec, RecordCodec},
    error::{ClientError, RelayError, RelayFailure},
    relay::{RelayUrl, RelayUrlError},
    sequence::{MonotonicCounter, SequenceSource, SystemClock},
    transport::{HttpTransport, RelayResponse, Transport, TransportError},
};
