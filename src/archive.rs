//! The archive facade.
//!
//! [`Archive`] is the single entry point used by the CLI and the HTTP
//! server. It wires the record [`Store`], blob storage, the upload gate and
//! the extraction pipeline together, and every operation returns
//! [`helsejournal_core::Result`].
//!
//! Owner identity is passed into each call; the facade itself is not bound
//! to an owner.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use helsejournal_core::metadata::{normalize, normalize_patch, RawMetadata};
use helsejournal_core::models::{Document, ListFilter, Note, ShareLink, ShareState};
use helsejournal_core::search::{self, Highlight, SearchFilters, SearchRequest, SearchResult};
use helsejournal_core::share::ShareOptions;
use helsejournal_core::store::Store;
use helsejournal_core::tree::{build_tree, TreeNode};
use helsejournal_core::{ArchiveError, Result};

use crate::blob::BlobStore;
use crate::config::{Config, ExtractionMode};
use crate::extract::{split_pages, ExtractError, ExtractedText, Extractor, PdfInfo};
use crate::ingest::IngestGate;
use crate::sqlite_store::SqliteStore;

/// A freshly issued share link with its public URL.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedShare {
    pub link: ShareLink,
    pub url: String,
}

/// What an anonymous share-link holder receives.
#[derive(Debug, Clone)]
pub struct SharedFile {
    pub document_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One page containing a query.
#[derive(Debug, Clone, Serialize)]
pub struct PageHit {
    /// 1-based.
    pub page: usize,
    pub highlight: Highlight,
}

pub struct Archive {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    blobs: BlobStore,
    gate: IngestGate,
    extractor: Extractor,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Archive {
    pub fn new(config: Config, store: Arc<dyn Store>, extractor: Extractor) -> Result<Self> {
        let blobs = BlobStore::open(&config.storage.root)?;
        let gate = IngestGate::new(
            Arc::clone(&store),
            blobs.clone(),
            config.storage.max_upload_bytes,
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            blobs,
            gate,
            extractor,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Opens the SQLite-backed archive described by `config`, creating the
    /// schema if needed.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let extractor = Extractor::from_config(&config.extraction);
        Archive::new(config.clone(), store, extractor).with_context(|| {
            format!(
                "Failed to open storage root: {}",
                config.storage.root.display()
            )
        })
    }

    // ============ Documents ============

    /// Stores a PDF for `owner_id` and extracts its text, inline or in the
    /// background depending on `extraction.mode`.
    pub async fn upload(
        &self,
        owner_id: &str,
        bytes: Vec<u8>,
        filename: &str,
        metadata: &RawMetadata,
    ) -> Result<Document> {
        let draft = self.gate.ingest(owner_id, bytes, filename).await?;
        let stored_name = draft.stored_name.clone();
        let doc = Document::from_draft(draft, normalize(metadata), Utc::now());

        if let Err(e) = self.store.insert_document(&doc).await {
            if let Err(cleanup) = self.blobs.remove(&stored_name).await {
                tracing::warn!(stored_name, "failed to remove blob after insert error: {cleanup}");
            }
            return Err(e);
        }
        tracing::info!(
            owner = owner_id,
            id = %doc.id,
            size = doc.size_bytes,
            filename = doc.original_filename,
            "document stored"
        );

        match self.config.extraction.mode {
            ExtractionMode::Inline => {
                extract_and_record(&*self.store, &self.blobs, &self.extractor, &doc).await;
                self.get_document(owner_id, doc.id).await
            }
            ExtractionMode::Deferred => {
                let store = Arc::clone(&self.store);
                let blobs = self.blobs.clone();
                let extractor = self.extractor.clone();
                let task_doc = doc.clone();
                let handle = tokio::spawn(async move {
                    extract_and_record(&*store, &blobs, &extractor, &task_doc).await;
                });
                self.pending.lock().await.push(handle);
                Ok(doc)
            }
        }
    }

    /// Waits for all background extractions started so far.
    pub async fn wait_for_extractions(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("background extraction task failed: {e}");
            }
        }
    }

    pub async fn get_document(&self, owner_id: &str, id: Uuid) -> Result<Document> {
        self.store
            .get_document(owner_id, id)
            .await?
            .ok_or_else(|| ArchiveError::not_found("document"))
    }

    pub async fn list_documents(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Document>> {
        self.store.list_documents(owner_id, filter).await
    }

    /// Applies a partial metadata edit.
    pub async fn update_metadata(
        &self,
        owner_id: &str,
        id: Uuid,
        patch: &RawMetadata,
    ) -> Result<Document> {
        let mut doc = self.get_document(owner_id, id).await?;
        doc.set_metadata(normalize_patch(&doc.metadata(), patch));
        doc.updated_at = Utc::now();
        self.store.update_document(&doc).await?;
        Ok(doc)
    }

    pub async fn toggle_favorite(&self, owner_id: &str, id: Uuid) -> Result<Document> {
        let mut doc = self.get_document(owner_id, id).await?;
        doc.favorite = !doc.favorite;
        doc.updated_at = Utc::now();
        self.store.update_document(&doc).await?;
        Ok(doc)
    }

    pub async fn set_archived(&self, owner_id: &str, id: Uuid, archived: bool) -> Result<Document> {
        let mut doc = self.get_document(owner_id, id).await?;
        doc.archived = archived;
        doc.updated_at = Utc::now();
        self.store.update_document(&doc).await?;
        Ok(doc)
    }

    /// Removes the record, its notes and share links, and the stored file.
    pub async fn delete_document(&self, owner_id: &str, id: Uuid) -> Result<()> {
        let doc = self
            .store
            .delete_document(owner_id, id)
            .await?
            .ok_or_else(|| ArchiveError::not_found("document"))?;
        self.blobs.remove(&doc.stored_name).await?;
        tracing::info!(owner = owner_id, id = %id, "document deleted");
        Ok(())
    }

    /// Owner download of the stored bytes.
    pub async fn open_file(&self, owner_id: &str, id: Uuid) -> Result<(Document, Vec<u8>)> {
        let doc = self.get_document(owner_id, id).await?;
        let bytes = self.blobs.read(&doc.stored_name).await?;
        Ok((doc, bytes))
    }

    // ============ Notes ============

    pub async fn add_note(
        &self,
        owner_id: &str,
        document_id: Uuid,
        content: &str,
        page_number: Option<u32>,
    ) -> Result<Note> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ArchiveError::validation("note content must not be empty"));
        }
        if page_number == Some(0) {
            return Err(ArchiveError::validation("page numbers start at 1"));
        }
        self.get_document(owner_id, document_id).await?;

        let note = Note {
            id: Uuid::new_v4(),
            document_id,
            owner_id: owner_id.to_string(),
            content: content.to_string(),
            page_number,
            created_at: Utc::now(),
        };
        self.store.insert_note(&note).await?;
        Ok(note)
    }

    pub async fn list_notes(&self, owner_id: &str, document_id: Uuid) -> Result<Vec<Note>> {
        self.get_document(owner_id, document_id).await?;
        self.store.list_notes(document_id).await
    }

    pub async fn delete_note(&self, owner_id: &str, note_id: Uuid) -> Result<()> {
        if self.store.delete_note(owner_id, note_id).await? {
            Ok(())
        } else {
            Err(ArchiveError::not_found("note"))
        }
    }

    // ============ Browse & search ============

    pub async fn tree(&self, owner_id: &str) -> Result<Vec<TreeNode>> {
        let docs = self
            .store
            .list_documents(owner_id, &ListFilter::browsable())
            .await?;
        Ok(build_tree(&docs))
    }

    /// Searches the owner's non-archived documents. `limit` is capped at
    /// `search.max_results`.
    pub async fn search(
        &self,
        owner_id: &str,
        query: &str,
        filters: SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(ArchiveError::validation("search query must not be empty"));
        }
        let max = self.config.search.max_results;
        let docs = self
            .store
            .list_documents(owner_id, &ListFilter::browsable())
            .await?;
        let request = SearchRequest {
            query,
            filters,
            limit: Some(limit.unwrap_or(max).min(max)),
        };
        let results = search::search(&docs, &request)?;
        tracing::debug!(owner = owner_id, query, hits = results.len(), "search");
        Ok(results)
    }

    // ============ Pages ============

    /// Text of one 1-based page, extracted on demand.
    pub async fn extract_page(&self, owner_id: &str, id: Uuid, page: usize) -> Result<String> {
        let doc = self.get_document(owner_id, id).await?;
        let path = self.blobs.path_for(&doc.stored_name)?;
        Ok(self.extractor.extract_page(&path, page).await)
    }

    /// Pages of the stored text containing `query`, with a highlight each.
    pub async fn page_hits(&self, owner_id: &str, id: Uuid, query: &str) -> Result<Vec<PageHit>> {
        if query.trim().is_empty() {
            return Err(ArchiveError::validation("search query must not be empty"));
        }
        let doc = self.get_document(owner_id, id).await?;
        Ok(split_pages(doc.text())
            .into_iter()
            .enumerate()
            .filter_map(|(i, text)| {
                search::highlight(text, query, search::HIGHLIGHT_CONTEXT_CHARS)
                    .map(|highlight| PageHit { page: i + 1, highlight })
            })
            .collect())
    }

    pub async fn inspect(&self, owner_id: &str, id: Uuid) -> Result<PdfInfo> {
        let doc = self.get_document(owner_id, id).await?;
        let path = self.blobs.path_for(&doc.stored_name)?;
        self.extractor.inspect(&path).await.map_err(|e| match e {
            ExtractError::Io(io) => ArchiveError::Io(io),
            other => ArchiveError::validation(format!("cannot inspect PDF: {other}")),
        })
    }

    /// Runs extraction again, inline, and returns the updated record.
    pub async fn reprocess(&self, owner_id: &str, id: Uuid) -> Result<Document> {
        let doc = self.get_document(owner_id, id).await?;
        extract_and_record(&*self.store, &self.blobs, &self.extractor, &doc).await;
        self.get_document(owner_id, id).await
    }

    // ============ Share links ============

    pub async fn issue_share(
        &self,
        owner_id: &str,
        document_id: Uuid,
        options: ShareOptions,
    ) -> Result<IssuedShare> {
        self.get_document(owner_id, document_id).await?;
        let link = ShareLink::issue(
            document_id,
            options,
            self.config.share.token_bytes,
            Utc::now(),
        )?;
        self.store.insert_share_link(&link).await?;
        tracing::info!(
            owner = owner_id,
            document = %document_id,
            link = %link.id,
            max_views = ?link.max_views,
            "share link issued"
        );
        let url = link.public_url(&self.config.share.public_base_url);
        Ok(IssuedShare { link, url })
    }

    /// Anonymous access by token. Counts one view when served.
    ///
    /// The file is read before the view is counted, so a missing or
    /// unreadable blob fails the request without using up a view.
    pub async fn resolve_share(&self, token: &str) -> Result<SharedFile> {
        let staged = self.stage_shared_bytes(token).await?;
        let (link, document) = self
            .store
            .resolve_share_link(token, Utc::now())
            .await?
            .into_result()?;
        let bytes = match staged {
            Some((id, bytes)) if id == document.id => bytes,
            _ => self.blobs.read(&document.stored_name).await?,
        };
        tracing::info!(link = %link.id, views = link.view_count, "share link served");
        Ok(SharedFile {
            document_id: document.id,
            filename: document.original_filename,
            content_type: document.content_type,
            bytes,
        })
    }

    /// Bytes of the document behind an active link, or `None` when the
    /// atomic resolve will refuse it anyway.
    async fn stage_shared_bytes(&self, token: &str) -> Result<Option<(Uuid, Vec<u8>)>> {
        let Some(link) = self.store.find_share_link(token).await? else {
            return Ok(None);
        };
        if link.state != ShareState::Active {
            return Ok(None);
        }
        let Some(owner) = self.store.document_owner(link.document_id).await? else {
            return Ok(None);
        };
        let Some(doc) = self.store.get_document(&owner, link.document_id).await? else {
            return Ok(None);
        };
        let bytes = self.blobs.read(&doc.stored_name).await?;
        Ok(Some((doc.id, bytes)))
    }

    /// Revokes a link. Only the owner of the linked document may do so.
    pub async fn revoke_share(&self, owner_id: &str, link_id: Uuid) -> Result<ShareLink> {
        let mut link = self
            .store
            .get_share_link(link_id)
            .await?
            .ok_or_else(|| ArchiveError::not_found("share link"))?;
        let doc_owner = self.store.document_owner(link.document_id).await?;
        if doc_owner.as_deref() != Some(owner_id) {
            tracing::warn!(requester = owner_id, link = %link_id, "refused share revoke");
            return Err(ArchiveError::Forbidden);
        }
        self.store
            .set_share_state(link_id, ShareState::Revoked)
            .await?;
        link.state = ShareState::Revoked;
        tracing::info!(owner = owner_id, link = %link_id, "share link revoked");
        Ok(link)
    }

    pub async fn list_shares(&self, owner_id: &str, document_id: Uuid) -> Result<Vec<ShareLink>> {
        self.get_document(owner_id, document_id).await?;
        self.store.list_share_links(document_id).await
    }
}

/// Extracts a stored document and records the outcome. Failures are logged;
/// the document then stays unprocessed.
async fn extract_and_record(
    store: &dyn Store,
    blobs: &BlobStore,
    extractor: &Extractor,
    doc: &Document,
) -> Option<ExtractedText> {
    let path = match blobs.path_for(&doc.stored_name) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(id = %doc.id, "cannot locate blob: {e}");
            return None;
        }
    };
    let extracted = extractor.extract(&path).await;
    if let Err(e) = store
        .record_extraction(doc.id, &extracted.text, extracted.processed(), Utc::now())
        .await
    {
        tracing::warn!(id = %doc.id, "failed to record extraction: {e}");
        return None;
    }
    tracing::info!(
        id = %doc.id,
        method = ?extracted.method,
        processed = extracted.processed(),
        "extraction recorded"
    );
    Some(extracted)
}
