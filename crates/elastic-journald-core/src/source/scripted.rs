// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory journal used to drive the pipeline deterministically.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Cursor, JournalSource, LogRecord, ReadOutcome};
use crate::error::SourceError;

/// One step of a scripted journal.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Record(LogRecord),
    /// The reader finds no new data for one polling interval.
    WouldBlock,
    /// The reader fails with the given message.
    Fail(String),
}

/// A journal that replays a fixed script.
///
/// Seeking searches the script for a record with the requested cursor.
/// Once the script is exhausted every read waits one polling interval and
/// returns [`ReadOutcome::WouldBlock`], and the token returned by
/// [`ScriptedSource::exhausted`] is cancelled.
#[derive(Debug)]
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
    position: usize,
    poll_interval: Duration,
    exhausted: CancellationToken,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            position: 0,
            poll_interval: Duration::from_millis(10),
            exhausted: CancellationToken::new(),
        }
    }

    /// Builds a script made only of records.
    #[must_use]
    pub fn from_records(records: Vec<LogRecord>) -> Self {
        Self::new(records.into_iter().map(ScriptStep::Record).collect())
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Cancelled once the reader has run past the last scripted step.
    #[must_use]
    pub fn exhausted(&self) -> CancellationToken {
        self.exhausted.clone()
    }
}

#[async_trait]
impl JournalSource for ScriptedSource {
    async fn seek(&mut self, cursor: &Cursor) -> Result<(), SourceError> {
        let found = self.steps.iter().position(|step| {
            matches!(step, ScriptStep::Record(record) if record.cursor == *cursor)
        });
        match found {
            Some(position) => {
                self.position = position;
                Ok(())
            }
            None => Err(SourceError::Seek {
                cursor: cursor.to_string(),
                reason: "cursor not found in journal".to_string(),
            }),
        }
    }

    async fn skip(&mut self, n: usize) -> Result<(), SourceError> {
        let mut skipped = 0;
        while skipped < n {
            match self.steps.get(self.position) {
                Some(ScriptStep::Record(_)) => skipped += 1,
                Some(ScriptStep::WouldBlock) => {}
                Some(ScriptStep::Fail(reason)) => return Err(SourceError::Read(reason.clone())),
                None => break,
            }
            self.position += 1;
        }
        Ok(())
    }

    async fn next(&mut self) -> Result<ReadOutcome, SourceError> {
        let Some(step) = self.steps.get(self.position).cloned() else {
            self.exhausted.cancel();
            tokio::time::sleep(self.poll_interval).await;
            return Ok(ReadOutcome::WouldBlock);
        };
        self.position += 1;

        match step {
            ScriptStep::Record(record) => Ok(ReadOutcome::Record(record)),
            ScriptStep::WouldBlock => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(ReadOutcome::WouldBlock)
            }
            ScriptStep::Fail(reason) => Err(SourceError::Read(reason)),
        }
    }
}
