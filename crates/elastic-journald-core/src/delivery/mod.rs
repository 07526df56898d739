// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Submission of batches to the indexing service.
//!
//! A [`DeliveryClient`] must return one [`AckItem`] per submitted entry, in
//! submission order. The checkpoint logic checks this correspondence item by
//! item instead of trusting it (see [`crate::checkpoint::acknowledged_cursor`]).

pub mod elasticsearch;

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::TransportError;

/// Outcome of one submitted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckItem {
    /// Identifier the service stored the document under.
    pub id: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl AckItem {
    #[must_use]
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Some(201),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Some(400),
            error: Some(error.into()),
        }
    }
}

/// Acknowledgment of a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckList {
    /// Set when the service reports that at least one item failed.
    pub errors: bool,
    pub items: Vec<AckItem>,
}

impl AckList {
    /// Acknowledges every entry of `batch` as stored under its cursor.
    #[must_use]
    pub fn all_ok(batch: &Batch) -> Self {
        Self {
            errors: false,
            items: batch
                .entries()
                .iter()
                .map(|entry| AckItem::ok(entry.cursor().as_str()))
                .collect(),
        }
    }
}

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Performs one bulk transaction.
    ///
    /// An `Err` means the transaction did not complete. A completed
    /// transaction returns the per-item acknowledgment even when items failed.
    async fn submit(&self, batch: &Batch) -> Result<AckList, TransportError>;
}
