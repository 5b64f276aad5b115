//! # Helsejournal
//!
//! A personal archive for medical PDF documents.
//!
//! Uploaded PDFs are fingerprinted and deduplicated per owner, stored as
//! flat files, and run through a text extraction chain (embedded text
//! layer first, OCR of every page second). Records can be browsed as a
//! Year → Provider → Document tree, searched by substring with a
//! highlighted snippet, annotated with notes, and shared through expiring,
//! view-limited links.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Ingest gate │──▶│ Blob storage │
//! └──────────┘   └──────┬──────┘   └──────┬───────┘
//!                       ▼                 ▼
//!                ┌─────────────┐   ┌──────────────┐
//!                │   SQLite    │◀──│  Extraction  │
//!                │   records   │   │ native → OCR │
//!                └──────┬──────┘   └──────────────┘
//!                       │
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!       ┌──────────┐         ┌──────────┐
//!       │   CLI    │         │   HTTP   │
//!       │   (hj)   │         │ (shares) │
//!       └──────────┘         └──────────┘
//! ```
//!
//! The I/O-free domain logic (models, metadata normalization, tree, search,
//! share-link state machine, `Store` trait) lives in the
//! [`helsejournal_core`] crate and is re-exported as [`core`].
//!
//! ## Quick Start
//!
//! ```bash
//! hj init
//! hj upload epikrise.pdf --year 2021 --provider "Ullevål sykehus"
//! hj tree
//! hj search blodtrykk
//! hj share create <id> --max-views 3
//! hj serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`archive`] | The facade every entry point goes through |
//! | [`blob`] | Flat-directory file storage with atomic writes |
//! | [`commands`] | `hj` command implementations |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`extract`] | Native text and OCR extraction |
//! | [`ingest`] | Upload validation and deduplication |
//! | [`migrate`] | Schema migrations |
//! | [`server`] | Share-link HTTP server |
//! | [`sqlite_store`] | SQLite implementation of the record store |

pub mod archive;
pub mod blob;
pub mod commands;
pub mod config;
pub mod db;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod server;
pub mod sqlite_store;

pub use helsejournal_core as core;
