// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use elastic_journald_core::{
    batch::BatchLimits,
    checkpoint::FileCheckpointStore,
    delivery::elasticsearch::ElasticsearchClient,
    normalizer::Normalizer,
    source::journalctl::{JournalctlSettings, JournalctlSource},
    Pipeline, PipelineSummary, ShipperConfig, ShipperError,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("ELASTIC_JOURNALD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match ShipperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    match run(config, shutdown).await {
        Ok(summary) => {
            info!(
                records = summary.records,
                flushes = summary.flushes,
                "elastic-journald stopped"
            );
        }
        Err(e) => {
            error!("elastic-journald stopped on a fatal error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(
    config: ShipperConfig,
    shutdown: CancellationToken,
) -> Result<PipelineSummary, ShipperError> {
    info!(
        hosts = ?config.hosts,
        index_prefix = %config.index_prefix,
        state = %config.state_path.display(),
        "Starting elastic-journald"
    );

    let client = ElasticsearchClient::from_config(&config)?;
    let source = JournalctlSource::open(JournalctlSettings {
        binary: config.journalctl.clone(),
        poll_interval: config.poll_interval,
    })?;
    let store = FileCheckpointStore::new(config.state_path.clone());

    let pipeline = Pipeline::new(
        source,
        Normalizer::new(config.index_prefix.clone()),
        BatchLimits::from(&config),
        Arc::new(client),
        Arc::new(store),
        config.flush_parallelism,
    );
    pipeline.run(shutdown).await
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Received SIGINT");
    }
    shutdown.cancel();
}
