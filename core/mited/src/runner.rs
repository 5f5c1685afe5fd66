// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use mited_bus::LocalBroker;
use tracing::{Instrument, debug, info, span, warn};

use crate::config::ConfigLoader;
use crate::demo::Demo;
use crate::runtime;

/// Async body: demo lifecycle and graceful shutdown. Assumes the tracing
/// subscriber is already installed. With `one_shot` the components stop
/// right after the client sequence instead of waiting for a shutdown signal.
pub async fn run_services(mut config: ConfigLoader, one_shot: bool) -> Result<()> {
    let root_span = span!(tracing::Level::INFO, "application_lifecycle");
    async move {
        let drain_timeout = config.runtime().drain_timeout();

        let broker = LocalBroker::new();
        let demo = Demo::build(&mut config, &broker)
            .await
            .context("failed to build the demo components")?;

        demo.start().await.context("failed to start services")?;
        info!(services = demo.services().len(), api = %demo.api().name(), "services started");

        match demo.run_client().await {
            Ok(transcript) => info!(calls = transcript.len(), "client sequence done"),
            Err(e) => warn!(status = e.status(), error = %e, "client sequence failed"),
        }

        if !one_shot {
            mited_signal::shutdown().await;
            debug!("Received shutdown signal");
        }

        // gracefully stop services within the drain timeout
        match tokio::time::timeout(drain_timeout, demo.stop()).await {
            Ok(result) => result.context("failed to stop services")?,
            Err(_) => {
                warn!(timeout = ?drain_timeout, "Service shutdown timed out");
                anyhow::bail!("Service shutdown timed out after {:?}", drain_timeout);
            }
        }

        info!("all services stopped");
        Ok::<(), anyhow::Error>(())
    }
    .instrument(root_span)
    .await
}

/// Load the configuration, install the tracing subscriber, build the tokio
/// runtime it describes and run the demo on it. Without a configuration
/// file every section uses its defaults.
///
/// This is a **synchronous** blocking call.
pub fn run(config_file: Option<&str>, one_shot: bool) -> Result<()> {
    let mut config = match config_file {
        Some(path) => ConfigLoader::new(path).context("failed to load configuration")?,
        None => ConfigLoader::default(),
    };

    let tracing_conf = config.tracing().clone();
    if !tracing_conf.setup_tracing_subscriber() {
        warn!("a tracing subscriber is already installed");
    }
    debug!(?tracing_conf);

    let mited_runtime =
        runtime::build(config.runtime()).context("invalid runtime configuration")?;
    mited_runtime
        .runtime
        .block_on(run_services(config, one_shot))
}
