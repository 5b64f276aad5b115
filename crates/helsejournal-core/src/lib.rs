//! # HelseJournal Core
//!
//! Shared, I/O-free logic for the HelseJournal document archive: data
//! models, content fingerprints, metadata normalization, the browse tree,
//! the search/highlight engine, the share-link state machine and the
//! [`store::Store`] abstraction with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx, filesystem or process code. The
//! application crate supplies the SQLite store, blob storage and the
//! text-extraction pipeline.

pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod models;
pub mod search;
pub mod share;
pub mod store;
pub mod tree;

pub use error::{ArchiveError, Result};
