//! SQLite-backed [`Store`] implementation.
//!
//! Uses the schema created by [`crate::migrate`]. Deleting a document relies
//! on `ON DELETE CASCADE` for its notes and share links, so connections must
//! have foreign keys enabled (see [`crate::db::connect`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use helsejournal_core::models::{Document, ListFilter, Note, ShareLink, ShareState};
use helsejournal_core::share::{Access, ShareResolution};
use helsejournal_core::store::Store;
use helsejournal_core::{ArchiveError, Result};

const DOCUMENT_COLUMNS: &str = "id, owner_id, fingerprint, stored_name, original_filename, \
     size_bytes, content_type, title, description, year, provider, clinician, document_date, \
     category, extracted_text, processed, favorite, archived, created_at, updated_at";

const LINK_COLUMNS: &str =
    "id, document_id, token, expires_at, max_views, view_count, state, created_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_link_by_token(&self, token: &str) -> Result<Option<ShareLink>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM share_links WHERE token = ?",
            LINK_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_link).transpose()
    }

    async fn fetch_document_any_owner(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }
}

// ============ Row mapping ============

fn db_err(e: sqlx::Error) -> ArchiveError {
    ArchiveError::Store(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|d| d.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|d| d.is_foreign_key_violation())
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ArchiveError::Store(format!("timestamp out of range: {}", ms)))
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| ArchiveError::Store(format!("bad id {:?}: {}", s, e)))
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let size_bytes: i64 = row.try_get("size_bytes").map_err(db_err)?;
    let document_date: Option<i64> = row.try_get("document_date").map_err(db_err)?;

    Ok(Document {
        id: parse_id(&id)?,
        owner_id: row.try_get("owner_id").map_err(db_err)?,
        fingerprint: row.try_get("fingerprint").map_err(db_err)?,
        stored_name: row.try_get("stored_name").map_err(db_err)?,
        original_filename: row.try_get("original_filename").map_err(db_err)?,
        size_bytes: size_bytes.max(0) as u64,
        content_type: row.try_get("content_type").map_err(db_err)?,
        title: row.try_get("title").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        year: row.try_get("year").map_err(db_err)?,
        provider: row.try_get("provider").map_err(db_err)?,
        clinician: row.try_get("clinician").map_err(db_err)?,
        document_date: document_date.map(from_millis).transpose()?,
        category: row.try_get("category").map_err(db_err)?,
        extracted_text: row.try_get("extracted_text").map_err(db_err)?,
        processed: row.try_get("processed").map_err(db_err)?,
        favorite: row.try_get("favorite").map_err(db_err)?,
        archived: row.try_get("archived").map_err(db_err)?,
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?)?,
        updated_at: from_millis(row.try_get("updated_at").map_err(db_err)?)?,
    })
}

fn row_to_note(row: &SqliteRow) -> Result<Note> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let document_id: String = row.try_get("document_id").map_err(db_err)?;
    let page_number: Option<i64> = row.try_get("page_number").map_err(db_err)?;

    Ok(Note {
        id: parse_id(&id)?,
        document_id: parse_id(&document_id)?,
        owner_id: row.try_get("owner_id").map_err(db_err)?,
        content: row.try_get("content").map_err(db_err)?,
        page_number: page_number.and_then(|p| u32::try_from(p).ok()),
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?)?,
    })
}

fn row_to_link(row: &SqliteRow) -> Result<ShareLink> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let document_id: String = row.try_get("document_id").map_err(db_err)?;
    let expires_at: Option<i64> = row.try_get("expires_at").map_err(db_err)?;
    let max_views: Option<i64> = row.try_get("max_views").map_err(db_err)?;
    let view_count: i64 = row.try_get("view_count").map_err(db_err)?;
    let state: String = row.try_get("state").map_err(db_err)?;

    Ok(ShareLink {
        id: parse_id(&id)?,
        document_id: parse_id(&document_id)?,
        token: row.try_get("token").map_err(db_err)?,
        expires_at: expires_at.map(from_millis).transpose()?,
        max_views: max_views.and_then(|m| u32::try_from(m).ok()),
        view_count: u32::try_from(view_count).unwrap_or(u32::MAX),
        state: ShareState::parse(&state)
            .ok_or_else(|| ArchiveError::Store(format!("unknown share state: {}", state)))?,
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, fingerprint, stored_name, original_filename,
                                   size_bytes, content_type, title, description, year, provider,
                                   clinician, document_date, category, extracted_text, processed,
                                   favorite, archived, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc.id.to_string())
        .bind(&doc.owner_id)
        .bind(&doc.fingerprint)
        .bind(&doc.stored_name)
        .bind(&doc.original_filename)
        .bind(doc.size_bytes as i64)
        .bind(&doc.content_type)
        .bind(&doc.title)
        .bind(&doc.description)
        .bind(doc.year)
        .bind(&doc.provider)
        .bind(&doc.clinician)
        .bind(doc.document_date.map(millis))
        .bind(&doc.category)
        .bind(&doc.extracted_text)
        .bind(doc.processed)
        .bind(doc.favorite)
        .bind(doc.archived)
        .bind(millis(doc.created_at))
        .bind(millis(doc.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) && e.to_string().contains("fingerprint") => {
                Err(ArchiveError::Duplicate {
                    fingerprint: doc.fingerprint.clone(),
                })
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find_by_fingerprint(
        &self,
        owner_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE owner_id = ? AND fingerprint = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(owner_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn get_document(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ? AND owner_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id.to_string())
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn document_owner(&self, id: Uuid) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT owner_id FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_documents(&self, owner_id: &str, filter: &ListFilter) -> Result<Vec<Document>> {
        // Provider matching is Unicode case-insensitive, which LIKE is not,
        // so the remaining filters run in Rust via ListFilter::matches.
        let archived_clause = if filter.include_archived {
            ""
        } else {
            " AND archived = 0"
        };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE owner_id = ?{} ORDER BY created_at DESC, rowid DESC",
            DOCUMENT_COLUMNS, archived_clause
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let doc = row_to_document(row)?;
            if filter.matches(&doc) {
                docs.push(doc);
            }
        }
        Ok(filter.paginate(docs))
    }

    async fn update_document(&self, doc: &Document) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                title = ?, description = ?, year = ?, provider = ?, clinician = ?,
                document_date = ?, category = ?, favorite = ?, archived = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&doc.title)
        .bind(&doc.description)
        .bind(doc.year)
        .bind(&doc.provider)
        .bind(&doc.clinician)
        .bind(doc.document_date.map(millis))
        .bind(&doc.category)
        .bind(doc.favorite)
        .bind(doc.archived)
        .bind(millis(doc.updated_at))
        .bind(doc.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(ArchiveError::not_found("document"));
        }
        Ok(())
    }

    async fn record_extraction(
        &self,
        id: Uuid,
        text: &str,
        processed: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET extracted_text = ?, processed = ?, updated_at = ? WHERE id = ?",
        )
        .bind(text)
        .bind(processed)
        .bind(millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(ArchiveError::not_found("document"));
        }
        Ok(())
    }

    async fn delete_document(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ? AND owner_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id.to_string())
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let doc = row_to_document(&row)?;

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(doc))
    }

    async fn insert_note(&self, note: &Note) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO notes (id, document_id, owner_id, content, page_number, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(note.id.to_string())
        .bind(note.document_id.to_string())
        .bind(&note.owner_id)
        .bind(&note.content)
        .bind(note.page_number.map(i64::from))
        .bind(millis(note.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => Err(ArchiveError::not_found("document")),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn list_notes(&self, document_id: Uuid) -> Result<Vec<Note>> {
        let rows = sqlx::query(
            "SELECT id, document_id, owner_id, content, page_number, created_at FROM notes WHERE document_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_note).collect()
    }

    async fn delete_note(&self, owner_id: &str, note_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ? AND owner_id = ?")
            .bind(note_id.to_string())
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_share_link(&self, link: &ShareLink) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO share_links (id, document_id, token, expires_at, max_views, view_count,
                                     state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(link.id.to_string())
        .bind(link.document_id.to_string())
        .bind(&link.token)
        .bind(link.expires_at.map(millis))
        .bind(link.max_views.map(i64::from))
        .bind(i64::from(link.view_count))
        .bind(link.state.as_str())
        .bind(millis(link.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => Err(ArchiveError::not_found("document")),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_share_link(&self, id: Uuid) -> Result<Option<ShareLink>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM share_links WHERE id = ?",
            LINK_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_link).transpose()
    }

    async fn find_share_link(&self, token: &str) -> Result<Option<ShareLink>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM share_links WHERE token = ?",
            LINK_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_link).transpose()
    }

    async fn list_share_links(&self, document_id: Uuid) -> Result<Vec<ShareLink>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM share_links WHERE document_id = ? ORDER BY created_at DESC, rowid DESC",
            LINK_COLUMNS
        ))
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_link).collect()
    }

    async fn set_share_state(&self, id: Uuid, state: ShareState) -> Result<()> {
        let result = sqlx::query("UPDATE share_links SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(ArchiveError::not_found("share link"));
        }
        Ok(())
    }

    async fn resolve_share_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ShareResolution> {
        let now_ms = millis(now);

        // The increment only happens when every bound still holds; SQLite
        // serializes writers, so two resolves cannot both pass the check.
        let served = sqlx::query(&format!(
            r#"
            UPDATE share_links SET view_count = view_count + 1
            WHERE token = ?
              AND state = 'active'
              AND (expires_at IS NULL OR expires_at > ?)
              AND (max_views IS NULL OR view_count < max_views)
            RETURNING {}
            "#,
            LINK_COLUMNS
        ))
        .bind(token)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = served {
            let link = row_to_link(&row)?;
            return match self.fetch_document_any_owner(link.document_id).await? {
                Some(document) => Ok(ShareResolution::Served { link, document }),
                None => Ok(ShareResolution::NotFound),
            };
        }

        let Some(link) = self.fetch_link_by_token(token).await? else {
            return Ok(ShareResolution::NotFound);
        };

        match link.evaluate(now) {
            Access::Dead(reason) => Ok(ShareResolution::Gone(reason)),
            Access::Retire(reason) => {
                sqlx::query("UPDATE share_links SET state = ? WHERE id = ? AND state = 'active'")
                    .bind(reason.state().as_str())
                    .bind(link.id.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
                Ok(ShareResolution::Gone(reason))
            }
            // Bounds hold on re-read but the update matched nothing: the row
            // changed in between.
            Access::Serve => Err(ArchiveError::Store(
                "share link changed during resolve".into(),
            )),
        }
    }
}
