// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sequential, resumable access to the journal.
//!
//! The pipeline only sees the [`JournalSource`] trait. Two implementations
//! exist: [`journalctl::JournalctlSource`] follows the local systemd journal,
//! and [`scripted::ScriptedSource`] replays an in-memory script for tests.
//!
//! # Resuming
//!
//! A resume cursor names the last record that was already delivered. The
//! reader seeks to it and skips exactly that one record, so the first record
//! yielded afterwards is the one following the checkpoint (see [`resume`]).

pub mod journalctl;
pub mod scripted;

use async_trait::async_trait;
use std::fmt;

use crate::error::SourceError;

/// Opaque position token issued by the journal.
///
/// Cursors can only be handed back to the source to seek, or used as a
/// document identifier. They are not comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Cursor(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One raw journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Data fields in the journal's enumeration order. A field may appear
    /// more than once.
    pub fields: Vec<(String, String)>,
    /// Wall-clock time of the entry in microseconds since the Unix epoch (UTC).
    pub realtime_usec: u64,
    pub cursor: Cursor,
}

/// Result of asking the source for the next record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Record(LogRecord),
    /// No new data arrived within the polling interval.
    WouldBlock,
}

#[async_trait]
pub trait JournalSource: Send {
    /// Positions the reader on the entry identified by `cursor`; the next
    /// call to [`JournalSource::next`] yields that entry.
    async fn seek(&mut self, cursor: &Cursor) -> Result<(), SourceError>;

    /// Consumes `n` records without yielding them.
    async fn skip(&mut self, n: usize) -> Result<(), SourceError>;

    /// Waits up to the polling interval for the next record.
    async fn next(&mut self) -> Result<ReadOutcome, SourceError>;
}

/// Moves `source` past the checkpointed record, if there is one.
///
/// The record at `cursor` was delivered before the checkpoint was written,
/// so exactly one record is skipped after seeking.
pub async fn resume<S>(source: &mut S, cursor: Option<&Cursor>) -> Result<(), SourceError>
where
    S: JournalSource + ?Sized,
{
    if let Some(cursor) = cursor {
        source.seek(cursor).await?;
        source.skip(1).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::scripted::{ScriptStep, ScriptedSource};
    use super::*;
    use std::time::Duration;

    fn record(cursor: &str) -> LogRecord {
        LogRecord {
            fields: vec![("MESSAGE".to_string(), cursor.to_string())],
            realtime_usec: 1_709_632_800_000_000,
            cursor: Cursor::new(cursor),
        }
    }

    fn source_of(cursors: &[&str]) -> ScriptedSource {
        ScriptedSource::new(
            cursors
                .iter()
                .map(|c| ScriptStep::Record(record(c)))
                .collect(),
        )
        .with_poll_interval(Duration::from_millis(1))
    }

    async fn next_cursor(source: &mut ScriptedSource) -> Option<String> {
        match source.next().await.unwrap() {
            ReadOutcome::Record(r) => Some(r.cursor.to_string()),
            ReadOutcome::WouldBlock => None,
        }
    }

    #[tokio::test]
    async fn test_resume_without_cursor_starts_at_head() {
        let mut source = source_of(&["a", "b", "c"]);
        resume(&mut source, None).await.unwrap();
        assert_eq!(next_cursor(&mut source).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_resume_yields_record_after_checkpoint() {
        let mut source = source_of(&["a", "b", "c", "d"]);
        resume(&mut source, Some(&Cursor::new("b"))).await.unwrap();

        // Neither the checkpointed record itself nor one past it
        assert_eq!(next_cursor(&mut source).await.as_deref(), Some("c"));
        assert_eq!(next_cursor(&mut source).await.as_deref(), Some("d"));
        assert_eq!(next_cursor(&mut source).await, None);
    }

    #[tokio::test]
    async fn test_resume_at_last_record_waits_for_new_data() {
        let mut source = source_of(&["a", "b"]);
        resume(&mut source, Some(&Cursor::new("b"))).await.unwrap();
        assert_eq!(next_cursor(&mut source).await, None);
    }

    #[tokio::test]
    async fn test_resume_unknown_cursor_fails() {
        let mut source = source_of(&["a"]);
        let result = resume(&mut source, Some(&Cursor::new("zz"))).await;
        assert!(matches!(result, Err(SourceError::Seek { .. })));
    }

    #[test]
    fn test_cursor_display() {
        let cursor = Cursor::new("s=1;i=2");
        assert_eq!(cursor.to_string(), "s=1;i=2");
        assert_eq!(cursor.as_str(), "s=1;i=2");
    }
}
