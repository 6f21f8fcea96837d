//! Base types for publishing and resolving pkarr records.
//!
//! - [`PublicKey`] and [`SecretKey`]: the ed25519 key pair a record is published under.
//! - [`encode_signable`]: the canonical bytes a record's signature covers.
//! - [`SignedRecord`]: a sequenced value plus its signature, and [`verify_record`] for
//!   checking one received from an untrusted relay.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]
#![cfg_attr(pkarr_docsrs, feature(doc_auto_cfg))]

pub mod key;
pub mod record;
pub mod signable;

pub use self::{
    key::{KeyParsingError, PublicKey, SecretKey, Signature, SignatureError},
    record::{SignedRecord, verify_record},
    signable::encode_signable,
};
