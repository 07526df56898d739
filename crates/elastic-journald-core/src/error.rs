// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the shipping pipeline.
//!
//! Every error here is fatal: the pipeline performs no retries and no partial
//! recovery. Errors are returned up to the supervisor (the binary's `main`),
//! which logs the diagnostic and exits non-zero. A restart re-reads the
//! durable checkpoint and resumes with at-least-once delivery.

use std::path::PathBuf;

/// Failures of the log source (open, read, seek).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Log source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read next journal entry: {0}")]
    Read(String),

    #[error("Failed to seek journal to cursor '{cursor}': {reason}")]
    Seek { cursor: String, reason: String },

    #[error("Malformed journal entry: {0}")]
    Malformed(String),

    #[error("Log source terminated: {0}")]
    Terminated(String),
}

/// Failures turning a raw record into an indexable document.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Timestamp {0}us is outside the representable range")]
    TimestampOutOfRange(u64),

    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The delivery call did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Bulk request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Bulk request to {url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Bulk response from {url} could not be decoded: {reason}")]
    Decode { url: String, reason: String },

    #[error("Delivery failed: {0}")]
    Other(String),
}

/// The delivery completed, but the acknowledgment does not confirm the whole batch.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AckMismatchError {
    #[error("Remote service reported errors on intake")]
    BatchErrorFlag,

    #[error("Acknowledged {acknowledged} items but submitted {submitted}")]
    CountMismatch {
        submitted: usize,
        acknowledged: usize,
    },

    #[error("Item {position} (id '{id}') was rejected: {reason}")]
    ItemError {
        position: usize,
        id: String,
        reason: String,
    },

    #[error("Item {position} acknowledged id '{acknowledged}' but '{submitted}' was submitted")]
    IdMismatch {
        position: usize,
        submitted: String,
        acknowledged: String,
    },

    #[error("Cannot checkpoint an empty batch")]
    EmptyBatch,
}

/// Failures reading or durably writing the checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist checkpoint {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Checkpoint write task failed: {0}")]
    WriteTask(String),
}

/// Invalid startup configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Umbrella error surfaced by [`crate::pipeline::Pipeline::run`].
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Flush {seq} failed: {source}")]
    Transport {
        seq: u64,
        #[source]
        source: TransportError,
    },

    #[error("Flush {seq} was not fully acknowledged: {source}")]
    AckMismatch {
        seq: u64,
        #[source]
        source: AckMismatchError,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Flush task did not complete: {0}")]
    FlushTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AckMismatchError::CountMismatch {
            submitted: 3,
            acknowledged: 2,
        };
        assert_eq!(error.to_string(), "Acknowledged 2 items but submitted 3");

        let error = ShipperError::AckMismatch {
            seq: 7,
            source: AckMismatchError::BatchErrorFlag,
        };
        assert_eq!(
            error.to_string(),
            "Flush 7 was not fully acknowledged: Remote service reported errors on intake"
        );
    }

    #[test]
    fn test_source_error_converts_transparently() {
        let error: ShipperError = SourceError::Seek {
            cursor: "s=abc".to_string(),
            reason: "no such entry".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Failed to seek journal to cursor 's=abc': no such entry"
        );
        assert!(matches!(error, ShipperError::Source(_)));
    }

    #[test]
    fn test_checkpoint_error_keeps_path() {
        let error = CheckpointError::Persist {
            path: PathBuf::from("/var/lib/cursor"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(error.to_string().contains("/var/lib/cursor"));
        assert!(error.to_string().contains("denied"));
    }
}
