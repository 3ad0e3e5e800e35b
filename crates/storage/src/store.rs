use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use fileferry_protocol::FileMetadata;

use crate::StorageError;

/// Catalog plus blob directory for stored files.
///
/// The catalog is guarded by a reader/writer lock: lookups and listings
/// proceed concurrently, a save excludes everything else for its duration.
/// Metadata lives only in memory — a restart yields an empty catalog even
/// when blobs remain on disk.
pub struct FileStore {
    directory: PathBuf,
    files: RwLock<HashMap<String, FileMetadata>>,
}

impl FileStore {
    /// Opens a store rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            files: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the blob directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Persists `data` under a fresh identifier and catalogs its metadata.
    ///
    /// The blob is written first; if the write fails the catalog is left
    /// unchanged (a partial blob may remain on disk — there is no cleanup).
    pub fn save_file(&self, filename: &str, data: &[u8]) -> Result<FileMetadata, StorageError> {
        let mut files = self.files.write().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        std::fs::write(self.directory.join(&id), data)?;

        let now = unix_now();
        let metadata = FileMetadata {
            id: id.clone(),
            filename: filename.to_string(),
            size: data.len() as i64,
            created_at: now,
            updated_at: now,
        };
        files.insert(id, metadata.clone());

        tracing::debug!(id = %metadata.id, filename, size = metadata.size, "file saved");
        Ok(metadata)
    }

    /// Reads the full blob for `id` from disk.
    ///
    /// Presence is decided by the filesystem, not the catalog: a cataloged
    /// id whose blob was removed fails, an uncataloged blob resolves.
    pub fn get_file(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(id)?;

        let _files = self.files.read().unwrap();
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_string())
            } else {
                e.into()
            }
        })
    }

    /// Returns one page of the catalog plus the total entry count.
    ///
    /// `start = page_size * (page_number - 1)`, clamped to the catalog
    /// size. Invalid pagination (`page_size <= 0`, `page_number < 1`) is
    /// not rejected — it degenerates to an empty page. Iteration order is
    /// unspecified; only the union of all pages over a fixed catalog is
    /// meaningful.
    pub fn list_files(
        &self,
        page_size: i32,
        page_number: i32,
    ) -> Result<(Vec<FileMetadata>, i32), StorageError> {
        let files = self.files.read().unwrap();
        let total = files.len();

        if page_size <= 0 || page_number < 1 {
            return Ok((Vec::new(), total as i32));
        }

        let start = (page_size as usize).saturating_mul(page_number as usize - 1);
        let end = start.saturating_add(page_size as usize).min(total);
        if start >= end {
            return Ok((Vec::new(), total as i32));
        }

        let page = files.values().skip(start).take(end - start).cloned().collect();
        Ok((page, total as i32))
    }

    /// Resolves the blob path for `id`, rejecting ids that are not a
    /// single plain path component (no separators, no traversal).
    fn blob_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Ok(self.directory.join(id)),
            _ => Err(StorageError::InvalidId(id.to_string())),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
