//! Local file store for resource attachments.
//!
//! Objects live flat under the storage root, named by a random UUID plus the
//! (sanitized) extension of the uploaded file. The original file name and
//! content type travel with the resource row, not the file system.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bytes::Bytes;
use regex::Regex;
use uuid::Uuid;

use crate::db::StoredFileRef;
use crate::error::StorageError;

const DEFAULT_FILE_NAME: &str = "file";
const MAX_FILE_NAME_CHARS: usize = 120;

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}(\.[a-z0-9]{1,10})?$")
            .expect("valid object key pattern")
    })
}

/// Reduce a client-supplied file name to its basename with a safe character set.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

/// Flat directory of uploaded objects.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_bytes: usize,
}

impl FileStore {
    pub fn new(root: PathBuf, max_bytes: usize) -> Self {
        Self { root, max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !key_pattern().is_match(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Store `data` and return a reference to the new object.
    ///
    /// A missing or generic content type is guessed from the file name.
    pub async fn put(
        &self,
        data: Bytes,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<StoredFileRef, StorageError> {
        if data.len() > self.max_bytes {
            return Err(StorageError::TooLarge {
                size: data.len(),
                limit: self.max_bytes,
            });
        }

        let file_name = sanitize_file_name(file_name);
        let content_type = match content_type.map(str::trim) {
            Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
            _ => mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };
        let key = match extension_of(&file_name) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(&key)?;
        let tmp = self.root.join(format!(".{key}.partial"));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = %key, bytes = data.len(), "Stored object");
        Ok(StoredFileRef {
            key,
            file_name,
            content_type,
            size_bytes: data.len() as i64,
        })
    }

    /// Read an object back.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object. Returns `false` if it did not exist.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("objects"), 1024)
    }

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\brief v2.pdf"), "brief v2.pdf");
        assert_eq!(sanitize_file_name("<script>.html"), "script.html");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("///"), "file");
    }

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);

        let stored = store
            .put(Bytes::from_static(b"%PDF-1.7"), "Brand Guide.PDF", None)
            .await
            .expect("put");
        assert_eq!(stored.file_name, "Brand Guide.PDF");
        assert_eq!(stored.content_type, "application/pdf");
        assert_eq!(stored.size_bytes, 8);
        assert!(stored.key.ends_with(".pdf"));

        assert_eq!(
            store.get(&stored.key).await.expect("get"),
            Bytes::from_static(b"%PDF-1.7")
        );
        assert!(store.delete(&stored.key).await.expect("delete"));
        assert!(!store.delete(&stored.key).await.expect("delete again"));
        assert!(matches!(
            store.get(&stored.key).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn explicit_content_type_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stored = store(&dir)
            .put(Bytes::from_static(b"a,b"), "export", Some("text/csv"))
            .await
            .expect("put");
        assert_eq!(stored.content_type, "text/csv");
        assert!(!stored.key.contains('.'));
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = store(&dir)
            .put(Bytes::from(vec![0u8; 2048]), "big.bin", None)
            .await
            .expect_err("too large");
        assert!(matches!(err, StorageError::TooLarge { size: 2048, limit: 1024 }));
    }

    #[tokio::test]
    async fn keys_outside_the_pattern_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        for key in ["../secret", "a/b", "", "not-a-uuid.txt"] {
            assert!(matches!(
                store.get(key).await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }
}
