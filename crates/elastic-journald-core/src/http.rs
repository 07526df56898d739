// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used for bulk requests.
//!
//! The client uses rustls for TLS, applies the per-flush timeout to every
//! request and routes through the configured HTTPS proxy, if any.

use core::time::Duration;

use crate::config::ShipperConfig;
use crate::error::ConfigError;

pub fn build_client(config: &ShipperConfig) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.flush_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(https_uri) = &config.https_proxy {
        let proxy = reqwest::Proxy::https(https_uri.as_str())?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_default() {
        assert!(build_client(&ShipperConfig::default()).is_ok());
    }

    #[test]
    fn test_build_client_with_proxy() {
        let config = ShipperConfig {
            https_proxy: Some("http://proxy.internal:3128".to_string()),
            ..Default::default()
        };
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn test_build_client_rejects_bad_proxy() {
        let config = ShipperConfig {
            https_proxy: Some("::not a proxy::".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_client(&config),
            Err(ConfigError::HttpClient(_))
        ));
    }
}
