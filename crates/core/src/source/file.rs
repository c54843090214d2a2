//! Snapshot stored as a JSON file on a local or mounted filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{check_precondition, BookmarkFile, SourceType, SyncSource};
use crate::errors::SourceError;
use crate::hasher::Checksum;

/// A [`SyncSource`] backed by one JSON file.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// reader never sees a half-written snapshot.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
    name: String,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    /// Override the display name used in logs and version metadata.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }

    async fn stored_checksum(&self) -> Result<Option<Checksum>, SourceError> {
        match self.read().await {
            Ok(file) => Ok(Some(file.metadata.checksum)),
            Err(SourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SyncSource for LocalFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::LocalFile
    }

    async fn read(&self) -> Result<BookmarkFile, SourceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let file: BookmarkFile = serde_json::from_str(&content).map_err(|e| {
            SourceError::Corrupt(format!("{}: {e}", self.path.display()))
        })?;
        file.verify()?;
        debug!(path = %self.path.display(), version = file.version, "read snapshot");
        Ok(file)
    }

    async fn write(&self, file: &BookmarkFile, expected: Option<&Checksum>) -> Result<(), SourceError> {
        let found = self.stored_checksum().await?;
        check_precondition(expected, found.as_ref())?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(file)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        info!(
            path = %self.path.display(),
            version = file.version,
            checksum = %file.metadata.checksum.short(),
            "wrote snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{BookmarkNode, BookmarkTree};

    fn file_with(url: &str, version: u64) -> BookmarkFile {
        let mut tree = BookmarkTree::empty();
        tree.toolbar
            .children_mut()
            .unwrap()
            .push(BookmarkNode::bookmark(url, "x"));
        BookmarkFile::new(tree, version, None).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new(dir.path().join("bookmarks.json"));
        assert!(matches!(source.read().await, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new(dir.path().join("nested/bookmarks.json"));
        let file = file_with("https://a.com", 1);

        source.write(&file, None).await.unwrap();
        let back = source.read().await.unwrap();
        assert_eq!(back, file);
        assert!(!source.temp_path().exists());
    }

    #[tokio::test]
    async fn test_conditional_write_rejects_stale_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFileSource::new(dir.path().join("bookmarks.json"));
        let first = file_with("https://a.com", 1);
        source.write(&first, None).await.unwrap();

        // Create-only write against an existing file.
        let second = file_with("https://b.com", 2);
        assert!(matches!(
            source.write(&second, None).await,
            Err(SourceError::ChecksumMismatch { .. })
        ));

        source
            .write(&second, Some(&first.metadata.checksum))
            .await
            .unwrap();
        assert_eq!(source.read().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmarks.json");
        std::fs::write(&path, "{not json").unwrap();
        let source = LocalFileSource::new(&path).with_name("broken");
        assert_eq!(source.name(), "broken");
        assert!(matches!(source.read().await, Err(SourceError::Corrupt(_))));
    }
}
