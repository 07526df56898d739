// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # elastic-journald core
//!
//! Tails the systemd journal and ships every record to Elasticsearch in
//! bulk batches, persisting a resume cursor after each fully acknowledged
//! flush.
//!
//! ## Architecture
//!
//! - [`source`]: sequential, resumable journal readers
//! - [`normalizer`]: raw records to documents and daily index names
//! - [`batch`]: buffering with count, size and age limits
//! - [`delivery`]: the bulk client interface and its Elasticsearch implementation
//! - [`flusher`]: bounded concurrent flushes with backpressure
//! - [`checkpoint`]: acknowledgment validation and in-order checkpoint persistence
//! - [`pipeline`]: the loop tying them together
//!
//! Delivery is at-least-once. Documents are indexed under their journal
//! cursor, so records re-sent after a restart overwrite themselves.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod flusher;
pub mod http;
pub mod normalizer;
pub mod pipeline;
pub mod source;

pub use config::ShipperConfig;
pub use error::ShipperError;
pub use pipeline::{Pipeline, PipelineSummary};
