//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! All tables live behind one `std::sync::RwLock`, so every operation,
//! including the share-link resolve, is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ArchiveError, Result};
use crate::models::{Document, ListFilter, Note, ShareLink, ShareState};
use crate::share::{Access, ShareResolution};

use super::Store;

/// Id-keyed table that remembers insertion order.
struct Arena<T> {
    rows: HashMap<Uuid, T>,
    order: Vec<Uuid>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, id: Uuid, row: T) {
        if self.rows.insert(id, row).is_none() {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &Uuid) -> Option<T> {
        let row = self.rows.remove(id)?;
        self.order.retain(|x| x != id);
        Some(row)
    }

    /// Rows in reverse insertion order.
    fn latest_first(&self) -> impl Iterator<Item = &T> {
        self.order.iter().rev().filter_map(|id| self.rows.get(id))
    }
}

#[derive(Default)]
struct Tables {
    documents: Arena<Document>,
    notes: Arena<Note>,
    links: Arena<ShareLink>,
    tokens: HashMap<String, Uuid>,
}

impl Tables {
    fn drop_document_children(&mut self, document_id: Uuid) {
        let notes: Vec<Uuid> = self
            .notes
            .latest_first()
            .filter(|n| n.document_id == document_id)
            .map(|n| n.id)
            .collect();
        for id in notes {
            self.notes.remove(&id);
        }

        let links: Vec<Uuid> = self
            .links
            .latest_first()
            .filter(|l| l.document_id == document_id)
            .map(|l| l.id)
            .collect();
        for id in links {
            if let Some(link) = self.links.remove(&id) {
                self.tokens.remove(&link.token);
            }
        }
    }
}

/// In-memory store.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| ArchiveError::Store("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ArchiveError::Store("in-memory store lock poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    // rows arrive latest-inserted first; the stable sort keeps that for ties
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut t = self.write()?;
        let clash = t
            .documents
            .latest_first()
            .any(|d| d.owner_id == doc.owner_id && d.fingerprint == doc.fingerprint);
        if clash {
            return Err(ArchiveError::Duplicate {
                fingerprint: doc.fingerprint.clone(),
            });
        }
        t.documents.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn find_by_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Document>> {
        let t = self.read()?;
        let found = t
            .documents
            .latest_first()
            .find(|d| d.owner_id == owner_id && d.fingerprint == fingerprint)
            .cloned();
        Ok(found)
    }

    async fn get_document(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>> {
        let t = self.read()?;
        Ok(t.documents
            .rows
            .get(&id)
            .filter(|d| d.owner_id == owner_id)
            .cloned())
    }

    async fn document_owner(&self, id: Uuid) -> Result<Option<String>> {
        let t = self.read()?;
        Ok(t.documents.rows.get(&id).map(|d| d.owner_id.clone()))
    }

    async fn list_documents(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Document>> {
        let t = self.read()?;
        let rows: Vec<Document> = t
            .documents
            .latest_first()
            .filter(|d| d.owner_id == owner_id && filter.matches(d))
            .cloned()
            .collect();
        Ok(filter.paginate(newest_first(rows, |d| d.created_at)))
    }

    async fn update_document(&self, doc: &Document) -> Result<()> {
        let mut t = self.write()?;
        let row = t
            .documents
            .rows
            .get_mut(&doc.id)
            .ok_or_else(|| ArchiveError::not_found("document"))?;
        row.set_metadata(doc.metadata());
        row.favorite = doc.favorite;
        row.archived = doc.archived;
        row.updated_at = doc.updated_at;
        Ok(())
    }

    async fn record_extraction(
        &self,
        id: Uuid,
        text: &str,
        processed: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = self.write()?;
        let row = t
            .documents
            .rows
            .get_mut(&id)
            .ok_or_else(|| ArchiveError::not_found("document"))?;
        row.extracted_text = Some(text.to_string());
        row.processed = processed;
        row.updated_at = now;
        Ok(())
    }

    async fn delete_document(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>> {
        let mut t = self.write()?;
        let owned = t
            .documents
            .rows
            .get(&id)
            .is_some_and(|d| d.owner_id == owner_id);
        if !owned {
            return Ok(None);
        }
        t.drop_document_children(id);
        Ok(t.documents.remove(&id))
    }

    async fn insert_note(&self, note: &Note) -> Result<()> {
        let mut t = self.write()?;
        if !t.documents.rows.contains_key(&note.document_id) {
            return Err(ArchiveError::not_found("document"));
        }
        t.notes.insert(note.id, note.clone());
        Ok(())
    }

    async fn list_notes(&self, document_id: Uuid) -> Result<Vec<Note>> {
        let t = self.read()?;
        let rows: Vec<Note> = t
            .notes
            .latest_first()
            .filter(|n| n.document_id == document_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |n| n.created_at))
    }

    async fn delete_note(&self, owner_id: &str, note_id: Uuid) -> Result<bool> {
        let mut t = self.write()?;
        let owned = t
            .notes
            .rows
            .get(&note_id)
            .is_some_and(|n| n.owner_id == owner_id);
        if owned {
            t.notes.remove(&note_id);
        }
        Ok(owned)
    }

    async fn insert_share_link(&self, link: &ShareLink) -> Result<()> {
        let mut t = self.write()?;
        if !t.documents.rows.contains_key(&link.document_id) {
            return Err(ArchiveError::not_found("document"));
        }
        if t.tokens.contains_key(&link.token) {
            return Err(ArchiveError::Store("share token collision".into()));
        }
        t.tokens.insert(link.token.clone(), link.id);
        t.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn get_share_link(&self, id: Uuid) -> Result<Option<ShareLink>> {
        let t = self.read()?;
        Ok(t.links.rows.get(&id).cloned())
    }

    async fn find_share_link(&self, token: &str) -> Result<Option<ShareLink>> {
        let t = self.read()?;
        let link = t
            .tokens
            .get(token)
            .and_then(|id| t.links.rows.get(id))
            .cloned();
        Ok(link)
    }

    async fn list_share_links(&self, document_id: Uuid) -> Result<Vec<ShareLink>> {
        let t = self.read()?;
        let rows: Vec<ShareLink> = t
            .links
            .latest_first()
            .filter(|l| l.document_id == document_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |l| l.created_at))
    }

    async fn set_share_state(&self, id: Uuid, state: ShareState) -> Result<()> {
        let mut t = self.write()?;
        let link = t
            .links
            .rows
            .get_mut(&id)
            .ok_or_else(|| ArchiveError::not_found("share link"))?;
        link.state = state;
        Ok(())
    }

    async fn resolve_share_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ShareResolution> {
        let mut t = self.write()?;
        let Some(id) = t.tokens.get(token).copied() else {
            return Ok(ShareResolution::NotFound);
        };
        let Some(link) = t.links.rows.get_mut(&id) else {
            return Ok(ShareResolution::NotFound);
        };

        match link.apply(now) {
            Access::Serve => {
                let link = link.clone();
                match t.documents.rows.get(&link.document_id) {
                    Some(document) => Ok(ShareResolution::Served {
                        document: document.clone(),
                        link,
                    }),
                    None => Ok(ShareResolution::NotFound),
                }
            }
            Access::Retire(reason) | Access::Dead(reason) => Ok(ShareResolution::Gone(reason)),
        }
    }
}
