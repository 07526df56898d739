// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the journal shipper
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Elasticsearch base URLs, used round-robin
    pub hosts: Vec<String>,
    /// Prefix of the daily index names (`{prefix}-YYYY-MM-DD`)
    pub index_prefix: String,
    /// File holding the cursor of the last acknowledged record
    pub state_path: PathBuf,
    pub bulk_max_docs: usize,
    pub bulk_max_bytes: usize,
    pub bulk_max_delay: Duration,
    /// Maximum number of bulk requests in flight
    pub flush_parallelism: usize,
    /// Timeout of a single bulk request
    pub flush_timeout: Duration,
    /// How long the reader waits for new data before checking flush deadlines
    pub poll_interval: Duration,
    /// journalctl binary used to read the journal
    pub journalctl: String,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            hosts: vec![constants::DEFAULT_HOST.to_string()],
            index_prefix: constants::DEFAULT_INDEX_PREFIX.to_string(),
            state_path: PathBuf::from(constants::DEFAULT_STATE_PATH),
            bulk_max_docs: constants::DEFAULT_BULK_MAX_DOCS,
            bulk_max_bytes: constants::DEFAULT_BULK_MAX_BYTES,
            bulk_max_delay: constants::DEFAULT_BULK_MAX_DELAY,
            flush_parallelism: constants::DEFAULT_FLUSH_PARALLELISM,
            flush_timeout: constants::DEFAULT_FLUSH_TIMEOUT,
            poll_interval: constants::DEFAULT_POLL_INTERVAL,
            journalctl: constants::DEFAULT_JOURNALCTL.to_string(),
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl ShipperConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// Unset variables fall back to their defaults; set but unparsable
    /// values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let hosts = match lookup("ELASTIC_JOURNALD_HOST") {
            Some(raw) => parse_hosts(&raw),
            None => defaults.hosts,
        };
        let index_prefix = lookup("ELASTIC_JOURNALD_PREFIX").unwrap_or(defaults.index_prefix);
        let state_path = lookup("ELASTIC_JOURNALD_STATE")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_path);
        let bulk_max_docs = parse_var(&lookup, "ELASTIC_JOURNALD_BULK_MAX_DOCS")?
            .unwrap_or(defaults.bulk_max_docs);
        let bulk_max_bytes = parse_var(&lookup, "ELASTIC_JOURNALD_BULK_MAX_BYTES")?
            .unwrap_or(defaults.bulk_max_bytes);
        let bulk_max_delay = parse_var(&lookup, "ELASTIC_JOURNALD_BULK_MAX_DELAY_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.bulk_max_delay);
        let flush_parallelism = parse_var(&lookup, "ELASTIC_JOURNALD_FLUSH_PARALLELISM")?
            .unwrap_or(defaults.flush_parallelism);
        let flush_timeout = parse_var(&lookup, "ELASTIC_JOURNALD_FLUSH_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.flush_timeout);
        let journalctl = lookup("ELASTIC_JOURNALD_JOURNALCTL").unwrap_or(defaults.journalctl);
        let https_proxy = lookup("ELASTIC_JOURNALD_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY"));
        let log_level = lookup("ELASTIC_JOURNALD_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            hosts,
            index_prefix,
            state_path,
            bulk_max_docs,
            bulk_max_bytes,
            bulk_max_delay,
            flush_parallelism,
            flush_timeout,
            poll_interval: defaults.poll_interval,
            journalctl,
            https_proxy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one Elasticsearch host is required".to_string(),
            ));
        }
        for host in &self.hosts {
            let url = reqwest::Url::parse(host).map_err(|e| ConfigError::InvalidValue {
                name: "ELASTIC_JOURNALD_HOST",
                value: host.clone(),
                reason: e.to_string(),
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::InvalidValue {
                    name: "ELASTIC_JOURNALD_HOST",
                    value: host.clone(),
                    reason: "scheme must be http or https".to_string(),
                });
            }
        }

        // Elasticsearch rejects index names with upper-case characters
        if self.index_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ELASTIC_JOURNALD_PREFIX cannot be empty".to_string(),
            ));
        }
        if self.index_prefix != self.index_prefix.to_lowercase() {
            return Err(ConfigError::InvalidValue {
                name: "ELASTIC_JOURNALD_PREFIX",
                value: self.index_prefix.clone(),
                reason: "index names must be lower-case".to_string(),
            });
        }

        if self.state_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "ELASTIC_JOURNALD_STATE cannot be empty".to_string(),
            ));
        }

        if self.bulk_max_docs == 0 || self.bulk_max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "bulk limits must be greater than 0".to_string(),
            ));
        }
        if self.bulk_max_delay.is_zero() || self.flush_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "bulk delay and flush timeout must be greater than 0".to_string(),
            ));
        }
        if self.flush_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "ELASTIC_JOURNALD_FLUSH_PARALLELISM must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|host| host.trim().trim_end_matches('/'))
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name,
                value,
                reason: e.to_string(),
            }),
    }
}
