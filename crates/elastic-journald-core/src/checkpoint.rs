// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable resume position and the rules for advancing it.
//!
//! The checkpoint is the cursor of the last record that the indexing service
//! confirmed as part of a fully successful flush. It only moves forward
//! through [`CheckpointCommitter`], which applies flush results strictly in
//! submission order, and only after [`acknowledged_cursor`] accepted the
//! acknowledgment of that flush.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::batch::Batch;
use crate::delivery::AckList;
use crate::error::{AckMismatchError, CheckpointError};
use crate::source::Cursor;

pub trait CheckpointStore: Send + Sync {
    /// Reads the stored cursor; `None` when nothing was checkpointed yet.
    fn load(&self) -> Result<Option<Cursor>, CheckpointError>;

    /// Replaces the stored cursor. A crash during the call leaves either the
    /// previous or the new value.
    fn store(&self, cursor: &Cursor) -> Result<(), CheckpointError>;
}

/// Checkpoint kept in a single file holding the raw cursor string.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_error(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Cursor>, CheckpointError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let cursor = contents.trim_end_matches(['\r', '\n']);
                if cursor.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Cursor::new(cursor)))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CheckpointError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn store(&self, cursor: &Cursor) -> Result<(), CheckpointError> {
        // The temporary file must live on the same filesystem for the rename to be atomic
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.persist_error(e))?;
        file.write_all(cursor.as_str().as_bytes())
            .map_err(|e| self.persist_error(e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| self.persist_error(e))?;
        file.persist(&self.path)
            .map_err(|e| self.persist_error(e.error))?;
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| self.persist_error(e))?;

        debug!(path = %self.path.display(), cursor = %cursor, "Checkpoint persisted");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    cursor: Option<Cursor>,
    writes: usize,
    fail_writes: bool,
}

/// Checkpoint held in memory, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new(initial: Option<Cursor>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                cursor: initial,
                ..Default::default()
            })),
        }
    }

    /// Makes every subsequent write fail.
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    #[must_use]
    pub fn current(&self) -> Option<Cursor> {
        self.lock().cursor.clone()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Cursor>, CheckpointError> {
        Ok(self.current())
    }

    fn store(&self, cursor: &Cursor) -> Result<(), CheckpointError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(CheckpointError::Persist {
                path: PathBuf::from("<memory>"),
                source: io::Error::other("injected write failure"),
            });
        }
        state.cursor = Some(cursor.clone());
        state.writes += 1;
        Ok(())
    }
}

/// Checks that `acks` confirms every entry of `batch` and returns the cursor
/// the checkpoint may advance to, the cursor of the batch's last entry.
///
/// The acknowledgment must hold exactly one item per entry, in submission
/// order, each stored under the entry's cursor and without error. The first
/// violation found is returned.
pub fn acknowledged_cursor(batch: &Batch, acks: &AckList) -> Result<Cursor, AckMismatchError> {
    let Some(last) = batch.last_cursor() else {
        return Err(AckMismatchError::EmptyBatch);
    };

    if acks.items.len() != batch.len() {
        return Err(AckMismatchError::CountMismatch {
            submitted: batch.len(),
            acknowledged: acks.items.len(),
        });
    }

    for (position, (entry, item)) in batch.entries().iter().zip(&acks.items).enumerate() {
        if let Some(reason) = &item.error {
            return Err(AckMismatchError::ItemError {
                position,
                id: item.id.clone(),
                reason: reason.clone(),
            });
        }
        if let Some(status) = item.status.filter(|s| !(200..300).contains(s)) {
            return Err(AckMismatchError::ItemError {
                position,
                id: item.id.clone(),
                reason: format!("status {status}"),
            });
        }
        if item.id != entry.cursor().as_str() {
            return Err(AckMismatchError::IdMismatch {
                position,
                submitted: entry.cursor().to_string(),
                acknowledged: item.id.clone(),
            });
        }
    }

    if acks.errors {
        return Err(AckMismatchError::BatchErrorFlag);
    }

    Ok(last.clone())
}

/// Advances the checkpoint in flush submission order.
///
/// Flushes are numbered from 0 at submission. A successful flush that
/// completes before an earlier one is held back until every earlier flush has
/// completed successfully. The store is written at most once per call, with
/// the cursor of the newest flush that became committable.
///
/// Store writes fsync, so they run on the blocking thread pool.
pub struct CheckpointCommitter {
    store: Arc<dyn CheckpointStore>,
    next_seq: u64,
    completed: BTreeMap<u64, Cursor>,
    committed: Option<Cursor>,
}

impl CheckpointCommitter {
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>, committed: Option<Cursor>) -> Self {
        Self {
            store,
            next_seq: 0,
            completed: BTreeMap::new(),
            committed,
        }
    }

    /// Records that flush `seq` succeeded with checkpoint candidate `cursor`
    /// and persists whatever became committable.
    pub async fn complete(
        &mut self,
        seq: u64,
        cursor: Cursor,
    ) -> Result<Option<Cursor>, CheckpointError> {
        self.completed.insert(seq, cursor);

        let mut ready = None;
        while let Some(cursor) = self.completed.remove(&self.next_seq) {
            ready = Some(cursor);
            self.next_seq += 1;
        }

        let Some(cursor) = ready else {
            debug!(
                seq,
                waiting_for = self.next_seq,
                "Holding checkpoint until earlier flushes complete"
            );
            return Ok(None);
        };

        let store = Arc::clone(&self.store);
        let pending = cursor.clone();
        tokio::task::spawn_blocking(move || store.store(&pending))
            .await
            .map_err(|e| CheckpointError::WriteTask(e.to_string()))??;
        self.committed = Some(cursor.clone());
        Ok(Some(cursor))
    }

    /// Last persisted (or initially loaded) checkpoint.
    #[must_use]
    pub fn committed(&self) -> Option<&Cursor> {
        self.committed.as_ref()
    }

    /// Number of successful flushes waiting for an earlier one.
    #[must_use]
    pub fn held_back(&self) -> usize {
        self.completed.len()
    }
}
