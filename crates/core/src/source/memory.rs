//! In-process snapshot store.
//!
//! Useful for embedding and for exercising the sync engine's failure paths:
//! reads and writes can be made to fail once, and a write by another device
//! can be slipped in between an engine's read and its write.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{check_precondition, BookmarkFile, SourceType, SyncSource};
use crate::errors::SourceError;
use crate::hasher::Checksum;

#[derive(Debug, Default)]
struct MemoryState {
    file: Option<BookmarkFile>,
    fail_next_read: Option<String>,
    fail_next_write: Option<String>,
    /// Applied, one per write call, just before the precondition check.
    concurrent_writes: VecDeque<BookmarkFile>,
    writes: usize,
}

/// A [`SyncSource`] holding its snapshot in memory.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Start with `file` already stored.
    pub fn with_file(name: impl Into<String>, file: BookmarkFile) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                file: Some(file),
                ..MemoryState::default()
            }),
        }
    }

    /// Currently stored snapshot.
    pub async fn snapshot(&self) -> Option<BookmarkFile> {
        self.state.lock().await.file.clone()
    }

    /// Successful writes so far.
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    /// Make the next `read` fail with a transient error.
    pub async fn fail_next_read(&self, message: impl Into<String>) {
        self.state.lock().await.fail_next_read = Some(message.into());
    }

    /// Make the next `write` fail with a transient error.
    pub async fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().await.fail_next_write = Some(message.into());
    }

    /// Simulate another device storing `file` right before our next write.
    pub async fn inject_concurrent_write(&self, file: BookmarkFile) {
        self.state.lock().await.concurrent_writes.push_back(file);
    }
}

#[async_trait]
impl SyncSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::InMemory
    }

    async fn read(&self) -> Result<BookmarkFile, SourceError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.fail_next_read.take() {
            return Err(SourceError::Transient(message));
        }
        let file = state
            .file
            .clone()
            .ok_or_else(|| SourceError::NotFound(self.name.clone()))?;
        file.verify()?;
        Ok(file)
    }

    async fn write(&self, file: &BookmarkFile, expected: Option<&Checksum>) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.fail_next_write.take() {
            return Err(SourceError::Transient(message));
        }
        if let Some(interloper) = state.concurrent_writes.pop_front() {
            debug!(source = %self.name, version = interloper.version, "applying concurrent write");
            state.file = Some(interloper);
        }

        let found = state.file.as_ref().map(|f| &f.metadata.checksum);
        check_precondition(expected, found)?;

        state.file = Some(file.clone());
        state.writes += 1;
        debug!(source = %self.name, version = file.version, "stored snapshot");
        Ok(())
    }
}
