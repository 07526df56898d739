// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw journal records into indexable documents.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::NormalizeError;
use crate::source::LogRecord;

/// Name of the field carrying the record time in every document.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Normalized field names mapped to their values, plus [`TIMESTAMP_FIELD`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NormalizedDocument(BTreeMap<String, String>);

impl NormalizedDocument {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Daily index a document is written to, `{prefix}-YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IndexName(String);

impl IndexName {
    #[must_use]
    pub fn for_day(prefix: &str, time: &DateTime<Utc>) -> Self {
        IndexName(format!("{prefix}-{}", time.format("%Y-%m-%d")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cases `key` and strips one leading `_`.
///
/// Journal fields set by journald itself are marked with a leading
/// underscore (`_HOSTNAME`, `_PID`), user fields are not.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    let lower = key.to_lowercase();
    match lower.strip_prefix('_') {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// Converts a journal timestamp in microseconds since the epoch.
pub fn record_time(realtime_usec: u64) -> Result<DateTime<Utc>, NormalizeError> {
    let secs = i64::try_from(realtime_usec / 1_000_000)
        .map_err(|_| NormalizeError::TimestampOutOfRange(realtime_usec))?;
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (realtime_usec % 1_000_000) as u32 * 1_000;
    DateTime::from_timestamp(secs, nanos).ok_or(NormalizeError::TimestampOutOfRange(realtime_usec))
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    index_prefix: String,
}

impl Normalizer {
    #[must_use]
    pub fn new(index_prefix: impl Into<String>) -> Self {
        Self {
            index_prefix: index_prefix.into(),
        }
    }

    /// Builds the document and target index for `record`.
    ///
    /// Fields are applied in the record's enumeration order, so when two raw
    /// keys normalize to the same name the later one wins. The computed
    /// `timestamp` is applied last and overrides any raw field of that name,
    /// so it is always the RFC3339 entry time. Earlier releases of the tool
    /// let a raw `TIMESTAMP` field replace it instead.
    pub fn normalize(
        &self,
        record: &LogRecord,
    ) -> Result<(NormalizedDocument, IndexName), NormalizeError> {
        let time = record_time(record.realtime_usec)?;

        let mut fields = BTreeMap::new();
        for (key, value) in &record.fields {
            fields.insert(normalize_key(key), value.clone());
        }
        fields.insert(
            TIMESTAMP_FIELD.to_string(),
            time.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        Ok((
            NormalizedDocument(fields),
            IndexName::for_day(&self.index_prefix, &time),
        ))
    }
}
