// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time;

use duration_str::deserialize_duration;
use serde::Deserialize;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

use mited_config::component::configuration::ConfigurationError;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfiguration {
    /// the number of cores to use for this runtime, 0 means all of them
    #[serde(default)]
    n_cores: usize,

    /// the thread name for the runtime
    #[serde(default = "default_thread_name")]
    thread_name: String,

    /// how long services get to finish their in-flight requests
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    drain_timeout: time::Duration,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        RuntimeConfiguration {
            n_cores: 0,
            thread_name: default_thread_name(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_thread_name() -> String {
    "mited".to_string()
}

fn default_drain_timeout() -> time::Duration {
    time::Duration::from_secs(10)
}

impl RuntimeConfiguration {
    pub fn new() -> Self {
        RuntimeConfiguration::default()
    }

    pub fn with_cores(self, n_cores: usize) -> Self {
        RuntimeConfiguration { n_cores, ..self }
    }

    pub fn with_thread_name(self, thread_name: &str) -> Self {
        RuntimeConfiguration {
            thread_name: thread_name.to_string(),
            ..self
        }
    }

    pub fn with_drain_timeout(self, drain_timeout: time::Duration) -> Self {
        RuntimeConfiguration {
            drain_timeout,
            ..self
        }
    }

    pub fn n_cores(&self) -> usize {
        self.n_cores
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn drain_timeout(&self) -> time::Duration {
        self.drain_timeout
    }
}

pub struct MitedRuntime {
    pub config: RuntimeConfiguration,
    pub runtime: Runtime,
}

impl std::fmt::Debug for MitedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MitedRuntime")
            .field("config", &self.config)
            .finish()
    }
}

/// Number of worker threads actually used for the requested core count
fn effective_cores(requested: usize, available: usize) -> usize {
    if requested > available {
        warn!(
            "Requested number of cores ({}) is greater than available cores ({}). Using all available cores",
            requested, available
        );
        available
    } else if requested == 0 {
        info!(n_cpu = %available, "Using all available cores");
        available
    } else {
        requested
    }
}

pub fn build(config: &RuntimeConfiguration) -> Result<MitedRuntime, ConfigurationError> {
    let n_cpu = num_cpus::get();
    debug_assert!(n_cpu > 0, "failed to get number of CPUs");

    let cores = effective_cores(config.n_cores, n_cpu);

    let runtime = match cores {
        1 => {
            info!("Using single-threaded runtime");
            Builder::new_current_thread()
                .enable_all()
                .thread_name(config.thread_name.as_str())
                .build()
        }
        _ => {
            info!(%cores, "Using multi-threaded runtime");
            Builder::new_multi_thread()
                .enable_all()
                .thread_name(config.thread_name.as_str())
                .worker_threads(cores)
                .max_blocking_threads(cores)
                .build()
        }
    }
    .map_err(|e| ConfigurationError::ConfigError(format!("cannot build runtime: {}", e)))?;

    Ok(MitedRuntime {
        config: config.clone(),
        runtime,
    })
}
