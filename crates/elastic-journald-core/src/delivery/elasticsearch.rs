// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Elasticsearch `_bulk` client.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::{AckItem, AckList, DeliveryClient};
use crate::batch::Batch;
use crate::config::ShipperConfig;
use crate::error::{ConfigError, TransportError};
use crate::http;

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    error: Option<Value>,
}

impl From<BulkItem> for AckItem {
    fn from(item: BulkItem) -> Self {
        AckItem {
            id: item.id.unwrap_or_default(),
            status: item.status,
            error: item.error.map(describe_error),
        }
    }
}

/// Renders an item error as `type: reason` when the service provides both.
fn describe_error(error: Value) -> String {
    if let Some(reason) = error.get("reason").and_then(Value::as_str) {
        return match error.get("type").and_then(Value::as_str) {
            Some(kind) => format!("{kind}: {reason}"),
            None => reason.to_string(),
        };
    }
    match error {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Sends batches to `{host}/_bulk`, rotating through the configured hosts.
#[derive(Debug)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    hosts: Vec<String>,
    next_host: AtomicUsize,
}

impl ElasticsearchClient {
    pub fn new(client: reqwest::Client, hosts: Vec<String>) -> Result<Self, ConfigError> {
        if hosts.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one Elasticsearch host is required".to_string(),
            ));
        }
        let hosts = hosts
            .into_iter()
            .map(|host| host.trim_end_matches('/').to_string())
            .collect();
        Ok(Self {
            client,
            hosts,
            next_host: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &ShipperConfig) -> Result<Self, ConfigError> {
        Self::new(http::build_client(config)?, config.hosts.clone())
    }

    fn bulk_url(&self) -> String {
        let index = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        format!("{}/_bulk", self.hosts[index])
    }
}

#[async_trait]
impl DeliveryClient for ElasticsearchClient {
    async fn submit(&self, batch: &Batch) -> Result<AckList, TransportError> {
        let url = self.bulk_url();
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, NDJSON)
            .body(batch.to_ndjson())
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BulkResponse =
            serde_json::from_str(&body).map_err(|e| TransportError::Decode {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        debug!(
            url = %url,
            took_ms = parsed.took,
            items = parsed.items.len(),
            errors = parsed.errors,
            "Bulk request completed"
        );

        let mut items = Vec::with_capacity(parsed.items.len());
        for (position, mut item) in parsed.items.into_iter().enumerate() {
            // Each item is keyed by its action type; the client only sends `index`
            let Some((_, outcome)) = item.pop_first() else {
                return Err(TransportError::Decode {
                    url,
                    reason: format!("item {position} has no action result"),
                });
            };
            items.push(AckItem::from(outcome));
        }

        Ok(AckList {
            errors: parsed.errors,
            items,
        })
    }
}
