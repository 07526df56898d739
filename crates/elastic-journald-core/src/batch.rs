// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffering of normalized documents into bulk batches.
//!
//! # Batching Strategy
//!
//! Documents are buffered in arrival order until one of three limits is reached:
//! 1. **Count limit**: number of buffered documents reaches `max_docs` (1,000)
//! 2. **Size limit**: serialized bulk body reaches `max_bytes` (64KiB)
//! 3. **Age limit**: the oldest buffered document is `max_delay` old (30s)
//!
//! Documents for different daily indices share one buffer; every entry
//! carries its own target index in its action line.
//!
//! # Output Format
//!
//! A batch serializes to an Elasticsearch bulk body, one action line and one
//! document line per entry:
//! ```text
//! {"index":{"_index":"journald-2024-03-05","_id":"s=...;i=1"}}
//! {"message":"hello","timestamp":"2024-03-05T10:00:00Z"}
//! ```
//!
//! The `_id` is the journal cursor, so delivering the same record twice
//! overwrites a single document.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::ShipperConfig;
use crate::constants;
use crate::error::NormalizeError;
use crate::normalizer::{IndexName, NormalizedDocument};
use crate::source::Cursor;

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkActionMeta<'a>,
}

#[derive(Serialize)]
struct BulkActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// One document ready for submission, pre-serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    cursor: Cursor,
    action_line: String,
    document_line: String,
}

impl BatchEntry {
    pub fn new(
        cursor: Cursor,
        index: IndexName,
        document: &NormalizedDocument,
    ) -> Result<Self, NormalizeError> {
        let action_line = serde_json::to_string(&BulkAction {
            index: BulkActionMeta {
                index: index.as_str(),
                id: cursor.as_str(),
            },
        })?;
        let document_line = serde_json::to_string(document)?;
        Ok(Self {
            cursor,
            action_line,
            document_line,
        })
    }

    #[must_use]
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    #[must_use]
    pub fn action_line(&self) -> &str {
        &self.action_line
    }

    #[must_use]
    pub fn document_line(&self) -> &str {
        &self.document_line
    }

    /// Bytes this entry adds to the bulk body, newlines included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.action_line.len() + self.document_line.len() + 2
    }
}

/// An ordered group of entries submitted in one bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    #[must_use]
    pub fn new(entries: Vec<BatchEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cursor of the last entry in submission order.
    #[must_use]
    pub fn last_cursor(&self) -> Option<&Cursor> {
        self.entries.last().map(BatchEntry::cursor)
    }

    /// Serializes the batch as a newline-delimited bulk body.
    #[must_use]
    pub fn to_ndjson(&self) -> String {
        let capacity = self.entries.iter().map(BatchEntry::encoded_len).sum();
        let mut body = String::with_capacity(capacity);
        for entry in &self.entries {
            body.push_str(&entry.action_line);
            body.push('\n');
            body.push_str(&entry.document_line);
            body.push('\n');
        }
        body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_docs: usize,
    pub max_bytes: usize,
    pub max_delay: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_docs: constants::DEFAULT_BULK_MAX_DOCS,
            max_bytes: constants::DEFAULT_BULK_MAX_BYTES,
            max_delay: constants::DEFAULT_BULK_MAX_DELAY,
        }
    }
}

impl From<&ShipperConfig> for BatchLimits {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            max_docs: config.bulk_max_docs,
            max_bytes: config.bulk_max_bytes,
            max_delay: config.bulk_max_delay,
        }
    }
}

/// Buffers entries until one of the [`BatchLimits`] is reached.
#[derive(Debug)]
pub struct BatchAccumulator {
    limits: BatchLimits,
    entries: Vec<BatchEntry>,
    buffered_bytes: usize,
    oldest: Option<Instant>,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            entries: Vec::with_capacity(limits.max_docs.min(constants::DEFAULT_BULK_MAX_DOCS)),
            buffered_bytes: 0,
            oldest: None,
        }
    }

    /// Appends `entry` and reports whether the buffer is now due for a flush.
    pub fn push(&mut self, entry: BatchEntry, now: Instant) -> bool {
        let size = entry.encoded_len();
        if size > self.limits.max_bytes {
            warn!(
                cursor = %entry.cursor,
                size,
                max_bytes = self.limits.max_bytes,
                "Document exceeds the bulk size limit, sending it anyway"
            );
        }

        self.oldest.get_or_insert(now);
        self.buffered_bytes += size;
        self.entries.push(entry);
        self.is_due(now)
    }

    /// Whether any flush trigger has been reached at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        let Some(oldest) = self.oldest else {
            return false;
        };
        self.entries.len() >= self.limits.max_docs
            || self.buffered_bytes >= self.limits.max_bytes
            || now.saturating_duration_since(oldest) >= self.limits.max_delay
    }

    /// Swaps the buffer out, leaving the accumulator empty.
    pub fn take(&mut self) -> Option<Batch> {
        if self.entries.is_empty() {
            return None;
        }
        self.buffered_bytes = 0;
        self.oldest = None;
        Some(Batch::new(std::mem::take(&mut self.entries)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use crate::source::LogRecord;
    use tracing_test::traced_test;

    fn entry(cursor: &str, message: &str) -> BatchEntry {
        let record = LogRecord {
            fields: vec![("MESSAGE".to_string(), message.to_string())],
            realtime_usec: 1_709_632_800_000_000,
            cursor: Cursor::new(cursor),
        };
        let (document, index) = Normalizer::new("journald").normalize(&record).unwrap();
        BatchEntry::new(record.cursor, index, &document).unwrap()
    }

    fn limits(max_docs: usize, max_bytes: usize, max_delay: Duration) -> BatchLimits {
        BatchLimits {
            max_docs,
            max_bytes,
            max_delay,
        }
    }

    #[test]
    fn test_entry_lines() {
        let entry = entry("s=1;i=a", "hello");
        assert_eq!(
            entry.action_line(),
            r#"{"index":{"_index":"journald-2024-03-05","_id":"s=1;i=a"}}"#
        );
        assert_eq!(
            entry.document_line(),
            r#"{"message":"hello","timestamp":"2024-03-05T10:00:00Z"}"#
        );
        assert_eq!(
            entry.encoded_len(),
            entry.action_line().len() + entry.document_line().len() + 2
        );
    }

    #[test]
    fn test_ndjson_body() {
        let batch = Batch::new(vec![entry("a", "one"), entry("b", "two")]);
        let body = batch.to_ndjson();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains(r#""_id":"a""#));
        assert!(lines[1].contains(r#""message":"one""#));
        assert!(lines[2].contains(r#""_id":"b""#));
        assert!(body.ends_with('\n'));
        assert_eq!(
            body.len(),
            batch.entries().iter().map(BatchEntry::encoded_len).sum::<usize>()
        );
        assert_eq!(batch.last_cursor(), Some(&Cursor::new("b")));
    }

    #[test]
    fn test_doc_count_trigger_keeps_arrival_order() {
        let mut acc = BatchAccumulator::new(limits(3, usize::MAX, Duration::from_secs(30)));
        let now = Instant::now();

        assert!(!acc.push(entry("a", "1"), now));
        assert!(!acc.push(entry("b", "2"), now));
        assert!(acc.push(entry("c", "3"), now));

        let batch = acc.take().unwrap();
        let cursors: Vec<&str> = batch.entries().iter().map(|e| e.cursor().as_str()).collect();
        assert_eq!(cursors, vec!["a", "b", "c"]);
        assert!(acc.is_empty());
        assert_eq!(acc.buffered_bytes(), 0);
        assert!(acc.take().is_none());
    }

    #[test]
    fn test_byte_trigger() {
        let first = entry("a", "1");
        let max_bytes = first.encoded_len() * 2;
        let mut acc = BatchAccumulator::new(limits(1000, max_bytes, Duration::from_secs(30)));
        let now = Instant::now();

        assert!(!acc.push(first, now));
        assert!(acc.push(entry("b", "2"), now));
        assert_eq!(acc.buffered_bytes(), max_bytes);
    }

    #[test]
    fn test_delay_trigger_counts_from_oldest_document() {
        let mut acc = BatchAccumulator::new(limits(1000, usize::MAX, Duration::from_secs(30)));
        let start = Instant::now();

        assert!(!acc.is_due(start + Duration::from_secs(60)));

        assert!(!acc.push(entry("a", "1"), start));
        assert!(!acc.push(entry("b", "2"), start + Duration::from_secs(20)));
        assert!(!acc.is_due(start + Duration::from_secs(29)));
        assert!(acc.is_due(start + Duration::from_secs(30)));

        acc.take().unwrap();
        assert!(!acc.push(entry("c", "3"), start + Duration::from_secs(31)));
        assert!(!acc.is_due(start + Duration::from_secs(60)));
        assert!(acc.is_due(start + Duration::from_secs(61)));
    }

    #[test]
    #[traced_test]
    fn test_oversized_document_is_flagged_and_flushed() {
        let mut acc = BatchAccumulator::new(limits(1000, 16, Duration::from_secs(30)));
        assert!(acc.push(entry("a", "this line is longer than sixteen bytes"), Instant::now()));
        assert!(logs_contain("Document exceeds the bulk size limit"));
        assert_eq!(acc.take().unwrap().len(), 1);
    }

    #[test]
    fn test_limits_from_config() {
        let config = ShipperConfig {
            bulk_max_docs: 7,
            bulk_max_bytes: 512,
            bulk_max_delay: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(
            BatchLimits::from(&config),
            limits(7, 512, Duration::from_secs(3))
        );
        assert_eq!(BatchLimits::default(), BatchLimits::from(&ShipperConfig::default()));
    }
}
