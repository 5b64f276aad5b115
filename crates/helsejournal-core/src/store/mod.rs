//! Record-store abstraction for HelseJournal.
//!
//! The [`Store`] trait holds documents, notes and share links as flat,
//! id-keyed tables with `document_id` back references. The application
//! crate provides the SQLite implementation; [`memory::InMemoryStore`]
//! backs tests and embedded use.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Atomicity
//!
//! [`Store::resolve_share_link`] must perform the whole
//! check-and-increment of [`ShareLink::apply`](crate::models::ShareLink)
//! as one atomic step per token: two concurrent resolves may never both
//! observe the same `view_count`.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Document, ListFilter, Note, ShareLink, ShareState};
use crate::share::ShareResolution;

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Insert a new record; `Duplicate` on fingerprint collision |
/// | [`find_by_fingerprint`](Store::find_by_fingerprint) | Dedup lookup, archived records included |
/// | [`get_document`](Store::get_document) | Owner-scoped fetch |
/// | [`list_documents`](Store::list_documents) | Owner-scoped listing, newest first |
/// | [`update_document`](Store::update_document) | Replace descriptive fields and flags |
/// | [`record_extraction`](Store::record_extraction) | Store extraction outcome |
/// | [`delete_document`](Store::delete_document) | Remove a record with its notes and links |
/// | [`resolve_share_link`](Store::resolve_share_link) | Atomic share-link resolve |
#[async_trait]
pub trait Store: Send + Sync {
    // ============ Documents ============

    /// Insert a new document.
    ///
    /// Fails with `ArchiveError::Duplicate` when the owner already has a
    /// record with the same fingerprint.
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn find_by_fingerprint(&self, owner_id: &str, fingerprint: &str)
        -> Result<Option<Document>>;

    async fn get_document(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>>;

    /// Owner of a document, regardless of who asks.
    async fn document_owner(&self, id: Uuid) -> Result<Option<String>>;

    /// Matching documents, newest first, after `filter.offset`/`filter.limit`.
    async fn list_documents(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Document>>;

    /// Persist metadata, flags and `updated_at` of an existing document.
    async fn update_document(&self, doc: &Document) -> Result<()>;

    async fn record_extraction(
        &self,
        id: Uuid,
        text: &str,
        processed: bool,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a document with its notes and share links. Returns the removed
    /// record, or `None` if the owner has no such document.
    async fn delete_document(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>>;

    // ============ Notes ============

    async fn insert_note(&self, note: &Note) -> Result<()>;

    /// Notes of a document, newest first.
    async fn list_notes(&self, document_id: Uuid) -> Result<Vec<Note>>;

    /// Returns `false` if the owner has no such note.
    async fn delete_note(&self, owner_id: &str, note_id: Uuid) -> Result<bool>;

    // ============ Share links ============

    async fn insert_share_link(&self, link: &ShareLink) -> Result<()>;

    async fn get_share_link(&self, id: Uuid) -> Result<Option<ShareLink>>;

    /// Read-only lookup by token. Does not count a view.
    async fn find_share_link(&self, token: &str) -> Result<Option<ShareLink>>;

    /// Links of a document, newest first.
    async fn list_share_links(&self, document_id: Uuid) -> Result<Vec<ShareLink>>;

    async fn set_share_state(&self, id: Uuid, state: ShareState) -> Result<()>;

    /// Atomically evaluate and apply one resolve of `token` at `now`.
    async fn resolve_share_link(&self, token: &str, now: DateTime<Utc>)
        -> Result<ShareResolution>;
}
