// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded concurrent execution of flushes.
//!
//! Every submitted batch runs as its own tokio task. At most `parallelism`
//! tasks run at once; [`FlushScheduler::submit`] waits for a free slot
//! before spawning, which is the backpressure applied to the reader.
//! Each flush receives a sequence number in submission order, starting at 0.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::batch::Batch;
use crate::checkpoint::acknowledged_cursor;
use crate::delivery::DeliveryClient;
use crate::error::ShipperError;
use crate::source::Cursor;

/// Result of one finished flush.
#[derive(Debug)]
pub struct FlushOutcome {
    pub seq: u64,
    pub entries: usize,
    /// Checkpoint candidate of a fully acknowledged flush.
    pub result: Result<Cursor, ShipperError>,
}

pub struct FlushScheduler {
    client: Arc<dyn DeliveryClient>,
    permits: Arc<Semaphore>,
    next_seq: u64,
    in_flight: JoinSet<FlushOutcome>,
}

impl FlushScheduler {
    #[must_use]
    pub fn new(client: Arc<dyn DeliveryClient>, parallelism: usize) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
            next_seq: 0,
            in_flight: JoinSet::new(),
        }
    }

    /// Starts delivering `batch` once a flush slot is free and returns its
    /// sequence number.
    pub async fn submit(&mut self, batch: Batch) -> Result<u64, ShipperError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ShipperError::FlushTask(e.to_string()))?;

        let seq = self.next_seq;
        self.next_seq += 1;
        let entries = batch.len();
        let client = Arc::clone(&self.client);
        debug!(seq, entries, "Submitting flush");

        self.in_flight.spawn(async move {
            let result = match client.submit(&batch).await {
                Ok(acks) => acknowledged_cursor(&batch, &acks)
                    .map_err(|source| ShipperError::AckMismatch { seq, source }),
                Err(source) => Err(ShipperError::Transport { seq, source }),
            };
            drop(permit);
            FlushOutcome {
                seq,
                entries,
                result,
            }
        });
        Ok(seq)
    }

    /// Waits for the next flush to finish, in completion order.
    ///
    /// Returns `None` when no flush is in flight.
    pub async fn join_next(&mut self) -> Option<Result<FlushOutcome, ShipperError>> {
        let joined = self.in_flight.join_next().await?;
        Some(joined.map_err(|e| ShipperError::FlushTask(e.to_string())))
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of flushes submitted so far.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.next_seq
    }
}
