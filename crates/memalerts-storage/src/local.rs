//! Local-disk uploads store.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::StorageResult;
use crate::locator::file_extension;

/// Subdirectory holding content-addressed meme files.
const CONTENT_DIR: &str = "memes";

/// Uploads directory served under a public URL prefix.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let mut public_prefix = public_prefix.into();
        if !public_prefix.ends_with('/') {
            public_prefix.push('/');
        }
        Self {
            root: root.into(),
            public_prefix,
        }
    }

    /// Create from `UPLOADS_DIR` / `UPLOADS_PUBLIC_PREFIX`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("UPLOADS_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            std::env::var("UPLOADS_PUBLIC_PREFIX").unwrap_or_else(|_| "/uploads/".to_string()),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Map a public locator onto a path under the uploads root.
    ///
    /// Returns `None` for locators outside the public prefix and for any
    /// relative path that would escape the root.
    pub fn path_for_locator(&self, locator: &str) -> Option<PathBuf> {
        let locator = locator.split(['?', '#']).next().unwrap_or_default();
        let relative = locator.strip_prefix(&self.public_prefix)?;
        let relative = Path::new(relative);

        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }

        Some(self.root.join(relative))
    }

    /// Resolve a locator to an existing local file.
    pub async fn resolve(&self, locator: &str) -> StorageResult<Option<PathBuf>> {
        let Some(path) = self.path_for_locator(locator) else {
            return Ok(None);
        };
        if is_file(&path).await? {
            debug!("Resolved {} to {}", locator, path.display());
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    /// Find a stored file for a content hash, whatever its extension.
    pub async fn find_by_hash(&self, hash: &str) -> StorageResult<Option<PathBuf>> {
        let dir = self.root.join(CONTENT_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stem = name.split('.').next().unwrap_or_default();
            if stem.eq_ignore_ascii_case(hash) && entry.file_type().await?.is_file() {
                return Ok(Some(entry.path()));
            }
        }

        Ok(None)
    }

    /// Extension to use when storing the file behind `locator`.
    pub fn extension_for(locator: &str) -> String {
        file_extension(locator).unwrap_or_else(|| "mp4".to_string())
    }
}

async fn is_file(path: &Path) -> StorageResult<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_locator() {
        let store = LocalStore::new("/srv/uploads", "/uploads");
        assert_eq!(
            store.path_for_locator("/uploads/memes/a.mp4"),
            Some(PathBuf::from("/srv/uploads/memes/a.mp4"))
        );
        assert_eq!(store.path_for_locator("https://cdn.test/memes/a.mp4"), None);
        assert_eq!(store.path_for_locator("/uploads/../etc/passwd"), None);
        assert_eq!(store.path_for_locator("/uploads/"), None);
    }

    #[tokio::test]
    async fn test_resolve_and_find_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "/uploads/");
        tokio::fs::create_dir_all(dir.path().join("memes")).await.unwrap();
        tokio::fs::write(dir.path().join("memes/deadbeef.webm"), b"x")
            .await
            .unwrap();

        let resolved = store.resolve("/uploads/memes/deadbeef.webm").await.unwrap();
        assert!(resolved.is_some());
        assert!(store.resolve("/uploads/memes/missing.mp4").await.unwrap().is_none());

        let found = store.find_by_hash("DEADBEEF").await.unwrap();
        assert_eq!(found, Some(dir.path().join("memes/deadbeef.webm")));
        assert!(store.find_by_hash("cafe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_hash_without_content_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "/uploads/");
        assert!(store.find_by_hash("abc").await.unwrap().is_none());
    }
}
