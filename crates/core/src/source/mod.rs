//! Remote storage backends for bookmark snapshots.
//!
//! A [`SyncSource`] stores one [`BookmarkFile`] and supports a conditional
//! write keyed on the stored checksum, which is the only cross-device
//! concurrency control the sync engine relies on.

pub mod file;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{HashError, SourceError};
use crate::hasher::Checksum;
use crate::tree::BookmarkTree;

pub use file::LocalFileSource;
pub use memory::MemorySource;

/// Current on-disk layout of [`BookmarkFile`].
pub const SCHEMA_VERSION: u32 = 1;

/// Kind of backend a snapshot was stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    LocalFile,
    Github,
    Dropbox,
    GoogleDrive,
    Cloud,
    InMemory,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalFile => "local_file",
            Self::Github => "github",
            Self::Dropbox => "dropbox",
            Self::GoogleDrive => "google_drive",
            Self::Cloud => "cloud",
            Self::InMemory => "in_memory",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_file" => Ok(Self::LocalFile),
            "github" => Ok(Self::Github),
            "dropbox" => Ok(Self::Dropbox),
            "google_drive" => Ok(Self::GoogleDrive),
            "cloud" => Ok(Self::Cloud),
            "in_memory" => Ok(Self::InMemory),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

/// Metadata stored next to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub last_synced_by: Option<String>,
    pub checksum: Checksum,
}

/// The document a source stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkFile {
    /// Incremented on every write.
    pub version: u64,
    pub schema_version: u32,
    pub metadata: FileMetadata,
    pub bookmarks: BookmarkTree,
}

impl BookmarkFile {
    /// Wrap `bookmarks` with freshly computed metadata.
    pub fn new(
        bookmarks: BookmarkTree,
        version: u64,
        synced_by: Option<String>,
    ) -> Result<Self, HashError> {
        let checksum = bookmarks.checksum()?;
        Ok(Self {
            version,
            schema_version: SCHEMA_VERSION,
            metadata: FileMetadata {
                last_modified: Utc::now(),
                last_synced_by: synced_by,
                checksum,
            },
            bookmarks,
        })
    }

    /// Structural check applied to everything read from a backend.
    pub fn verify(&self) -> Result<(), SourceError> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(SourceError::Corrupt(format!(
                "unsupported schema version {} (newest known is {SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        if !self.metadata.checksum.is_well_formed() {
            return Err(SourceError::Corrupt(format!(
                "stored checksum {:?} is not a SHA-256 hex digest",
                self.metadata.checksum.as_str()
            )));
        }
        self.bookmarks
            .validate()
            .map_err(|e| SourceError::Corrupt(e.to_string()))
    }
}

/// A storage backend holding one bookmark snapshot.
#[async_trait]
pub trait SyncSource: Send + Sync {
    /// Human-readable name for logs and version metadata.
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Read the stored snapshot; `SourceError::NotFound` if there is none.
    async fn read(&self) -> Result<BookmarkFile, SourceError>;

    /// Store `file` if the stored checksum still equals `expected`.
    ///
    /// `expected = None` means the caller believes nothing is stored yet.
    /// A failed precondition is `SourceError::ChecksumMismatch` and leaves the
    /// stored snapshot untouched.
    async fn write(&self, file: &BookmarkFile, expected: Option<&Checksum>) -> Result<(), SourceError>;
}

/// Shared precondition check for conditional writes.
pub(crate) fn check_precondition(
    expected: Option<&Checksum>,
    found: Option<&Checksum>,
) -> Result<(), SourceError> {
    if expected == found {
        Ok(())
    } else {
        Err(SourceError::ChecksumMismatch {
            expected: expected.map(|c| c.to_string()),
            found: found.map(|c| c.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_serializes_camel_case() {
        let file = BookmarkFile::new(BookmarkTree::empty(), 1, Some("laptop".into())).unwrap();
        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains("\"schemaVersion\":1"));
        assert!(json.contains("\"lastSyncedBy\":\"laptop\""));
        assert_eq!(file.metadata.checksum, BookmarkTree::empty().checksum().unwrap());
    }

    #[test]
    fn test_verify_rejects_future_schema() {
        let mut file = BookmarkFile::new(BookmarkTree::empty(), 1, None).unwrap();
        file.schema_version = SCHEMA_VERSION + 1;
        assert!(matches!(file.verify(), Err(SourceError::Corrupt(_))));
    }

    #[test]
    fn test_verify_rejects_malformed_checksum() {
        let mut file = BookmarkFile::new(BookmarkTree::empty(), 1, None).unwrap();
        file.metadata.checksum = Checksum::from_hex("aéééééé");
        assert!(matches!(file.verify(), Err(SourceError::Corrupt(_))));
    }

    #[test]
    fn test_precondition() {
        let a = Checksum::from_hex("aa");
        let b = Checksum::from_hex("bb");
        assert!(check_precondition(None, None).is_ok());
        assert!(check_precondition(Some(&a), Some(&a)).is_ok());
        assert!(matches!(
            check_precondition(Some(&a), Some(&b)),
            Err(SourceError::ChecksumMismatch { .. })
        ));
        assert!(check_precondition(None, Some(&b)).is_err());
    }

    #[test]
    fn test_source_type_round_trip() {
        for kind in [SourceType::LocalFile, SourceType::GoogleDrive, SourceType::InMemory] {
            assert_eq!(kind.to_string().parse::<SourceType>().unwrap(), kind);
        }
    }
}
