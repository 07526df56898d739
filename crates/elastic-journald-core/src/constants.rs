// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults for batching, delivery and the journal reader.
//!
//! A flush is triggered by whichever batch limit is reached first:
//! - the document count reaches [`DEFAULT_BULK_MAX_DOCS`],
//! - the serialized bulk body reaches [`DEFAULT_BULK_MAX_BYTES`],
//! - the oldest buffered document is [`DEFAULT_BULK_MAX_DELAY`] old.

use std::time::Duration;

/// Maximum number of documents per bulk request.
pub const DEFAULT_BULK_MAX_DOCS: usize = 1000;

/// Maximum serialized size of a bulk request body in bytes (64KiB).
///
/// Counts the action line and the document line of every entry, including
/// their trailing newlines.
pub const DEFAULT_BULK_MAX_BYTES: usize = 65_536;

/// Maximum time a document may wait in the buffer before a flush.
pub const DEFAULT_BULK_MAX_DELAY: Duration = Duration::from_secs(30);

/// Number of bulk requests allowed in flight at once.
pub const DEFAULT_FLUSH_PARALLELISM: usize = 2;

/// Timeout of a single bulk request.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the reader waits for new journal data before reporting `WouldBlock`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_HOST: &str = "http://localhost:9200";
pub const DEFAULT_INDEX_PREFIX: &str = "journald";
pub const DEFAULT_STATE_PATH: &str = ".elastic_journal_cursor";
pub const DEFAULT_JOURNALCTL: &str = "journalctl";
