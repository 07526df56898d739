// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The shipping loop: read, normalize, batch, flush, checkpoint.
//!
//! A single task reads the journal and feeds the accumulator. Flushes run
//! concurrently in the [`FlushScheduler`]; their completions come back to the
//! same task, which is the only writer of the checkpoint.
//!
//! The first error of any kind ends [`Pipeline::run`]. In-flight flushes are
//! aborted and the checkpoint keeps its last committed value, so a restart
//! re-delivers everything after it.
//!
//! Cancelling the shutdown token stops reading, flushes the partially filled
//! buffer and waits for every in-flight flush to be committed.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{BatchAccumulator, BatchEntry, BatchLimits};
use crate::checkpoint::{CheckpointCommitter, CheckpointStore};
use crate::delivery::DeliveryClient;
use crate::error::ShipperError;
use crate::flusher::{FlushOutcome, FlushScheduler};
use crate::normalizer::Normalizer;
use crate::source::{self, Cursor, JournalSource, LogRecord, ReadOutcome};

/// Totals reported when the pipeline stops cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub records: u64,
    pub flushes: u64,
    pub checkpoint: Option<Cursor>,
}

pub struct Pipeline<S> {
    source: S,
    normalizer: Normalizer,
    accumulator: BatchAccumulator,
    scheduler: FlushScheduler,
    store: Arc<dyn CheckpointStore>,
    records: u64,
}

impl<S: JournalSource> Pipeline<S> {
    #[must_use]
    pub fn new(
        source: S,
        normalizer: Normalizer,
        limits: BatchLimits,
        client: Arc<dyn DeliveryClient>,
        store: Arc<dyn CheckpointStore>,
        parallelism: usize,
    ) -> Self {
        Self {
            source,
            normalizer,
            accumulator: BatchAccumulator::new(limits),
            scheduler: FlushScheduler::new(client, parallelism),
            store,
            records: 0,
        }
    }

    /// Runs until `shutdown` is cancelled or an error occurs.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<PipelineSummary, ShipperError> {
        let checkpoint = self.store.load()?;
        match &checkpoint {
            Some(cursor) => info!(cursor = %cursor, "Resuming after checkpoint"),
            None => info!("No checkpoint found, reading the journal from the start"),
        }
        source::resume(&mut self.source, checkpoint.as_ref()).await?;
        let mut committer = CheckpointCommitter::new(Arc::clone(&self.store), checkpoint);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, flushing buffered records");
                    break;
                }
                Some(joined) = self.scheduler.join_next(), if self.scheduler.in_flight() > 0 => {
                    commit(&mut committer, joined?).await?;
                }
                read = self.source.next() => {
                    match read? {
                        ReadOutcome::Record(record) => {
                            if self.accept(&record)? {
                                self.flush().await?;
                            }
                        }
                        ReadOutcome::WouldBlock => {
                            if self.accumulator.is_due(Instant::now()) {
                                self.flush().await?;
                            }
                        }
                    }
                }
            }
        }

        self.flush().await?;
        while let Some(joined) = self.scheduler.join_next().await {
            commit(&mut committer, joined?).await?;
        }

        let summary = PipelineSummary {
            records: self.records,
            flushes: self.scheduler.submitted(),
            checkpoint: committer.committed().cloned(),
        };
        info!(
            records = summary.records,
            flushes = summary.flushes,
            checkpoint = ?summary.checkpoint.as_ref().map(Cursor::as_str),
            "Pipeline stopped"
        );
        Ok(summary)
    }

    /// Buffers one record and reports whether a flush is due.
    fn accept(&mut self, record: &LogRecord) -> Result<bool, ShipperError> {
        let (document, index) = self.normalizer.normalize(record)?;
        let entry = BatchEntry::new(record.cursor.clone(), index, &document)?;
        self.records += 1;
        Ok(self.accumulator.push(entry, Instant::now()))
    }

    /// Hands the buffer to the scheduler, waiting for a free flush slot.
    async fn flush(&mut self) -> Result<(), ShipperError> {
        if let Some(batch) = self.accumulator.take() {
            self.scheduler.submit(batch).await?;
        }
        Ok(())
    }
}

async fn commit(
    committer: &mut CheckpointCommitter,
    outcome: FlushOutcome,
) -> Result<(), ShipperError> {
    let cursor = outcome.result?;
    debug!(seq = outcome.seq, entries = outcome.entries, "Flush acknowledged");
    if let Some(cursor) = committer.complete(outcome.seq, cursor).await? {
        debug!(cursor = %cursor, "Checkpoint advanced");
    }
    Ok(())
}
