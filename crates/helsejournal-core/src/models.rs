//! Core data models for the archive.
//!
//! Records reference each other by id only (`document_id` back references),
//! so stores can keep them in flat id-keyed tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{non_blank, DocumentMetadata};

pub const CONTENT_TYPE_PDF: &str = "application/pdf";

/// An accepted upload whose bytes are durably stored but which has no
/// record yet. Produced by the dedup gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDraft {
    pub owner_id: String,
    pub fingerprint: String,
    /// Generated file name under the storage root.
    pub stored_name: String,
    pub original_filename: String,
    pub size_bytes: u64,
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: String,
    pub fingerprint: String,
    pub stored_name: String,
    pub original_filename: String,
    pub size_bytes: u64,
    pub content_type: String,

    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub provider: Option<String>,
    pub clinician: Option<String>,
    pub document_date: Option<DateTime<Utc>>,
    pub category: Option<String>,

    /// Empty until extraction completes; stays empty if extraction found nothing.
    pub extracted_text: Option<String>,
    pub processed: bool,
    pub favorite: bool,
    pub archived: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Builds the initial record for an accepted draft.
    pub fn from_draft(draft: DocumentDraft, metadata: DocumentMetadata, now: DateTime<Utc>) -> Self {
        let mut doc = Self {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id,
            fingerprint: draft.fingerprint,
            stored_name: draft.stored_name,
            original_filename: draft.original_filename,
            size_bytes: draft.size_bytes,
            content_type: CONTENT_TYPE_PDF.to_string(),
            title: None,
            description: None,
            year: None,
            provider: None,
            clinician: None,
            document_date: None,
            category: None,
            extracted_text: None,
            processed: false,
            favorite: false,
            archived: false,
            created_at: now,
            updated_at: now,
        };
        doc.set_metadata(metadata);
        doc
    }

    /// Title shown in listings: the explicit title or the original filename.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.original_filename)
    }

    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            title: self.title.clone(),
            description: self.description.clone(),
            year: self.year,
            provider: self.provider.clone(),
            clinician: self.clinician.clone(),
            document_date: self.document_date,
            category: self.category.clone(),
        }
    }

    pub fn set_metadata(&mut self, metadata: DocumentMetadata) {
        self.title = metadata.title;
        self.description = metadata.description;
        self.year = metadata.year;
        self.provider = metadata.provider;
        self.clinician = metadata.clinician;
        self.document_date = metadata.document_date;
        self.category = metadata.category;
    }

    /// Extracted text, or `""` while unprocessed.
    pub fn text(&self) -> &str {
        self.extracted_text.as_deref().unwrap_or("")
    }
}

/// A free-text annotation on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub document_id: Uuid,
    pub owner_id: String,
    pub content: String,
    /// 1-based page reference.
    pub page_number: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a share link. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareState {
    Active,
    Expired,
    Exhausted,
    Revoked,
}

impl ShareState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "exhausted" => Some(Self::Exhausted),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A capability granting anonymous, bounded access to one document's bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    pub id: Uuid,
    pub document_id: Uuid,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<u32>,
    pub view_count: u32,
    pub state: ShareState,
    pub created_at: DateTime<Utc>,
}

/// Listing filters. Results are ordered newest first.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub year: Option<i32>,
    /// Case-insensitive substring match on the provider.
    pub provider: Option<String>,
    pub favorite: Option<bool>,
    /// Include archived documents (they are excluded by default).
    pub include_archived: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ListFilter {
    /// Everything the owner can browse: all non-archived documents.
    pub fn browsable() -> Self {
        Self::default()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if doc.archived && !self.include_archived {
            return false;
        }
        if let Some(year) = self.year {
            if doc.year != Some(year) {
                return false;
            }
        }
        if let Some(needle) = non_blank(self.provider.as_deref()) {
            let hit = doc
                .provider
                .as_deref()
                .is_some_and(|p| crate::search::contains_ci(p, &needle));
            if !hit {
                return false;
            }
        }
        if let Some(fav) = self.favorite {
            if doc.favorite != fav {
                return false;
            }
        }
        true
    }

    /// Applies offset/limit to an already filtered, ordered list.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> DocumentDraft {
        DocumentDraft {
            owner_id: "admin".into(),
            fingerprint: "f".repeat(64),
            stored_name: "abc.pdf".into(),
            original_filename: "blodprove.pdf".into(),
            size_bytes: 10,
        }
    }

    #[test]
    fn display_title_falls_back_to_filename() {
        let doc = Document::from_draft(draft(), DocumentMetadata::default(), Utc::now());
        assert_eq!(doc.display_title(), "blodprove.pdf");
        assert!(!doc.processed);
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn share_state_round_trips_names() {
        for s in [
            ShareState::Active,
            ShareState::Expired,
            ShareState::Exhausted,
            ShareState::Revoked,
        ] {
            assert_eq!(ShareState::parse(s.as_str()), Some(s));
        }
        assert_eq!(ShareState::parse("deleted"), None);
    }

    #[test]
    fn list_filter_excludes_archived_by_default() {
        let mut doc = Document::from_draft(draft(), DocumentMetadata::default(), Utc::now());
        doc.archived = true;
        assert!(!ListFilter::browsable().matches(&doc));
        let all = ListFilter {
            include_archived: true,
            ..Default::default()
        };
        assert!(all.matches(&doc));
    }

    #[test]
    fn list_filter_provider_is_case_insensitive_substring() {
        let mut doc = Document::from_draft(draft(), DocumentMetadata::default(), Utc::now());
        doc.provider = Some("Haukeland Universitetssjukehus".into());
        let filter = ListFilter {
            provider: Some("haukeland".into()),
            ..Default::default()
        };
        assert!(filter.matches(&doc));
        doc.provider = None;
        assert!(!filter.matches(&doc));
    }

    #[test]
    fn blank_provider_filter_keeps_unknown_provider() {
        let doc = Document::from_draft(draft(), DocumentMetadata::default(), Utc::now());
        for blank in ["", "   "] {
            let filter = ListFilter {
                provider: Some(blank.into()),
                ..Default::default()
            };
            assert!(filter.matches(&doc));
        }
    }

    #[test]
    fn paginate_skips_and_takes() {
        let filter = ListFilter {
            offset: 1,
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(filter.paginate(vec![1, 2, 3, 4]), vec![2, 3]);
    }
}
