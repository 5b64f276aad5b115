//! Flat-directory blob storage for document bytes.
//!
//! Each document is one file named `<uuid>.pdf` directly under the storage
//! root. Writes go to a hidden temp file in the same directory, are synced,
//! and are then renamed into place without overwriting, so a reader never
//! observes a partial file under a final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use helsejournal_core::{ArchiveError, Result};

const INCOMING_PREFIX: &str = ".incoming-";

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root if needed and removes temp files left by a crash.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root)?;
        store.sweep_incoming();
        Ok(store)
    }

    /// Stores `bytes` under a freshly generated name and returns the name.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<String> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || write_atomic(&root, &bytes))
            .await
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?
    }

    /// Absolute path of a stored blob. Rejects names that could escape the
    /// root.
    pub fn path_for(&self, stored_name: &str) -> Result<PathBuf> {
        let valid = !stored_name.is_empty()
            && !stored_name.starts_with('.')
            && !stored_name.contains(['/', '\\'])
            && stored_name.ends_with(".pdf");
        if !valid {
            return Err(ArchiveError::Store(format!(
                "invalid stored name: {:?}",
                stored_name
            )));
        }
        Ok(self.root.join(stored_name))
    }

    pub async fn read(&self, stored_name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(stored_name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArchiveError::not_found("document file"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a blob. A missing file is not an error.
    pub async fn remove(&self, stored_name: &str) -> Result<()> {
        let path = self.path_for(stored_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes leftover temp files. Returns how many were removed.
    pub fn sweep_incoming(&self) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return 0,
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let is_incoming = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(INCOMING_PREFIX));
            if !is_incoming {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!(path = %entry.path().display(), "failed to remove temp file: {e}"),
            }
        }
        if count > 0 {
            tracing::info!(files_cleaned = count, "removed incomplete uploads");
        }
        count
    }
}

fn write_atomic(root: &Path, bytes: &[u8]) -> Result<String> {
    let stored_name = format!("{}.pdf", Uuid::new_v4().simple());

    let mut tmp = tempfile::Builder::new()
        .prefix(INCOMING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(root)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(root.join(&stored_name))
        .map_err(|e| ArchiveError::Io(e.error))?;

    tracing::debug!(stored_name, size = bytes.len(), "stored blob");
    Ok(stored_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_read_remove() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::open(dir.path().join("files")).unwrap();
        let name = blobs.write(b"%PDF-1.4 body".to_vec()).await.unwrap();
        assert!(name.ends_with(".pdf"));
        assert_eq!(blobs.read(&name).await.unwrap(), b"%PDF-1.4 body");

        blobs.remove(&name).await.unwrap();
        assert!(matches!(
            blobs.read(&name).await.unwrap_err(),
            ArchiveError::NotFound(_)
        ));
        // second remove is a no-op
        blobs.remove(&name).await.unwrap();
    }

    #[tokio::test]
    async fn names_are_unique_and_no_temp_left() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::open(dir.path()).unwrap();
        let a = blobs.write(b"same".to_vec()).await.unwrap();
        let b = blobs.write(b"same".to_vec()).await.unwrap();
        assert_ne!(a, b);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(INCOMING_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn path_for_rejects_traversal() {
        let blobs = BlobStore::new("/srv/hj");
        assert!(blobs.path_for("../etc/passwd.pdf").is_err());
        assert!(blobs.path_for(".incoming-x.pdf").is_err());
        assert!(blobs.path_for("a\\b.pdf").is_err());
        assert!(blobs.path_for("notes.txt").is_err());
        assert_eq!(
            blobs.path_for("abc.pdf").unwrap(),
            PathBuf::from("/srv/hj/abc.pdf")
        );
    }

    #[test]
    fn open_sweeps_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".incoming-crashed.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("kept.pdf"), b"%PDF").unwrap();
        BlobStore::open(dir.path()).unwrap();
        assert!(!dir.path().join(".incoming-crashed.tmp").exists());
        assert!(dir.path().join("kept.pdf").exists());
    }
}
