//! Upload gate: validation, fingerprinting, per-owner dedup and durable
//! blob write.
//!
//! The gate never creates a record. It hands back a [`DocumentDraft`] whose
//! bytes are already on disk; the caller inserts the record and removes the
//! blob again if that insert fails.

use std::path::Path;
use std::sync::Arc;

use helsejournal_core::fingerprint::fingerprint;
use helsejournal_core::models::DocumentDraft;
use helsejournal_core::store::Store;
use helsejournal_core::{ArchiveError, Result};

use crate::blob::BlobStore;

/// Leading bytes of every PDF file.
pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

pub struct IngestGate {
    store: Arc<dyn Store>,
    blobs: BlobStore,
    max_bytes: u64,
}

impl IngestGate {
    pub fn new(store: Arc<dyn Store>, blobs: BlobStore, max_bytes: u64) -> Self {
        Self {
            store,
            blobs,
            max_bytes,
        }
    }

    /// Accepts `bytes` for `owner_id`, or rejects them before any write.
    pub async fn ingest(
        &self,
        owner_id: &str,
        bytes: Vec<u8>,
        declared_filename: &str,
    ) -> Result<DocumentDraft> {
        validate(&bytes, self.max_bytes)?;

        let fingerprint = fingerprint(&bytes);
        if let Some(existing) = self
            .store
            .find_by_fingerprint(owner_id, &fingerprint)
            .await?
        {
            tracing::info!(
                owner = owner_id,
                existing = %existing.id,
                "rejecting duplicate upload"
            );
            return Err(ArchiveError::Duplicate { fingerprint });
        }

        let size_bytes = bytes.len() as u64;
        let stored_name = self.blobs.write(bytes).await?;

        Ok(DocumentDraft {
            owner_id: owner_id.to_string(),
            fingerprint,
            stored_name,
            original_filename: sanitize_filename(declared_filename),
            size_bytes,
        })
    }
}

/// Size, emptiness and signature checks.
pub fn validate(bytes: &[u8], max_bytes: u64) -> Result<()> {
    if bytes.is_empty() {
        return Err(ArchiveError::validation("file is empty"));
    }
    if bytes.len() as u64 > max_bytes {
        return Err(ArchiveError::validation(format!(
            "file is {} bytes, limit is {} bytes",
            bytes.len(),
            max_bytes
        )));
    }
    if !bytes.starts_with(PDF_SIGNATURE) {
        return Err(ArchiveError::validation("only PDF files are accepted"));
    }
    Ok(())
}

/// Final path component of a client-supplied name; `document.pdf` if
/// nothing usable remains.
pub fn sanitize_filename(declared: &str) -> String {
    let last = declared.rsplit(['/', '\\']).next().unwrap_or(declared);
    let name = Path::new(last)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .unwrap_or("");
    if name.is_empty() || name == "." || name == ".." {
        "document.pdf".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helsejournal_core::store::memory::InMemoryStore;
    use tempfile::TempDir;

    fn gate(dir: &TempDir, max: u64) -> (IngestGate, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let blobs = BlobStore::open(dir.path()).unwrap();
        (IngestGate::new(store.clone(), blobs, max), store)
    }

    fn files_in(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn validation_rules() {
        assert!(validate(b"%PDF-1.7", 100).is_ok());
        assert!(matches!(validate(b"", 100), Err(ArchiveError::Validation(_))));
        assert!(matches!(
            validate(b"GIF89a", 100),
            Err(ArchiveError::Validation(_))
        ));
        assert!(matches!(
            validate(b"%PDF-1.7 long", 5),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[test]
    fn sanitize_keeps_final_component() {
        assert_eq!(sanitize_filename("C:\\scans\\mri.pdf"), "mri.pdf");
        assert_eq!(sanitize_filename("../../etc/lab.pdf"), "lab.pdf");
        assert_eq!(sanitize_filename("  blod.pdf "), "blod.pdf");
        assert_eq!(sanitize_filename(""), "document.pdf");
        assert_eq!(sanitize_filename("dir/"), "document.pdf");
        assert_eq!(sanitize_filename(".."), "document.pdf");
    }

    #[tokio::test]
    async fn accepted_upload_is_written_but_not_recorded() {
        let dir = TempDir::new().unwrap();
        let (gate, store) = gate(&dir, 1024);
        let draft = gate
            .ingest("admin", b"%PDF-1.4 x".to_vec(), "x.pdf")
            .await
            .unwrap();
        assert_eq!(draft.size_bytes, 10);
        assert!(dir.path().join(&draft.stored_name).exists());
        assert!(store
            .find_by_fingerprint("admin", &draft.fingerprint)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn oversize_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let (gate, _) = gate(&dir, 4);
        let err = gate
            .ingest("admin", b"%PDF-1.4".to_vec(), "x.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
        assert_eq!(files_in(&dir), 0);
    }
}
