// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the configuration file once and exposes lazy, cached
// accessors for tracing, runtime, bus and services. Each section is parsed
// only when requested.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::runtime::RuntimeConfiguration;
use mited_bus::{BusError, Connector};
use mited_config::component::configuration::{Configuration, ConfigurationError};
use mited_config::provider::{ConfigResolver, ProviderError};
use mited_service::ServiceConfiguration;
use mited_tracing::TracingConfiguration;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
    #[error("invalid configuration - {0}")]
    Invalid(String),

    #[error("yaml parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid configuration - resolver error: {0}")]
    ResolverError(#[from] ProviderError),
}

impl From<ConfigurationError> for ConfigError {
    fn from(e: ConfigurationError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("runtime");
        s.insert("bus");
        s.insert("services");
        s
    };
}

/// Where and as whom to connect to the bus
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BusConfiguration {
    #[serde(default = "default_servers")]
    servers: Vec<String>,

    #[serde(default = "default_identity")]
    identity: String,
}

impl Default for BusConfiguration {
    fn default() -> Self {
        BusConfiguration {
            servers: default_servers(),
            identity: default_identity(),
        }
    }
}

fn default_servers() -> Vec<String> {
    vec!["local://default".to_string()]
}

fn default_identity() -> String {
    "mited".to_string()
}

impl BusConfiguration {
    pub fn new() -> Self {
        BusConfiguration::default()
    }

    pub fn with_servers<I, S>(self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BusConfiguration {
            servers: servers.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_identity(self, identity: impl Into<String>) -> Self {
        BusConfiguration {
            identity: identity.into(),
            ..self
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Open a connection named `<identity>.<component>`
    pub async fn connect<C: Connector>(
        &self,
        connector: &C,
        component: &str,
    ) -> Result<C::Bus, BusError> {
        let identity = format!("{}.{}", self.identity, component);
        connector.connect(&self.servers, &identity).await
    }
}

impl Configuration for BusConfiguration {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.servers.is_empty() {
            return Err(ConfigurationError::MissingField("servers".to_string()));
        }
        if self.identity.trim().is_empty() {
            return Err(ConfigurationError::invalid("identity", "must not be empty"));
        }
        Ok(())
    }
}

pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    runtime: Option<RuntimeConfiguration>,
    bus: Option<BusConfiguration>,
    services: Option<HashMap<String, ServiceConfiguration>>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root_keys = self
            .root
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        f.debug_struct("ConfigLoader")
            .field("root_keys", &root_keys)
            .field("tracing_loaded", &self.tracing.is_some())
            .field("runtime_loaded", &self.runtime.is_some())
            .field("bus_loaded", &self.bus.is_some())
            .field("services_count", &self.services.as_ref().map(|m| m.len()))
            .finish()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        ConfigLoader::from_value(Value::Mapping(Mapping::new()))
    }
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str =
            std::fs::read_to_string(file_path).map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::parse(&config_str)
    }

    /// Load the configuration from its YAML text
    pub fn parse(config_str: &str) -> Result<Self, ConfigError> {
        let mut root: Value =
            serde_yaml::from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?;

        // an empty document is an empty configuration
        if root.is_null() {
            return Ok(ConfigLoader::default());
        }

        let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
        for key in mapping.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        ConfigResolver::new().resolve(&mut root)?;

        Ok(Self::from_value(root))
    }

    fn from_value(root: Value) -> Self {
        ConfigLoader {
            root,
            tracing: None,
            runtime: None,
            bus: None,
            services: None,
        }
    }

    pub fn tracing(&mut self) -> &TracingConfiguration {
        self.tracing
            .get_or_insert_with(|| section_or_default(&self.root, "tracing"))
    }

    pub fn runtime(&mut self) -> &RuntimeConfiguration {
        self.runtime
            .get_or_insert_with(|| section_or_default(&self.root, "runtime"))
    }

    pub fn bus(&mut self) -> Result<&BusConfiguration, ConfigError> {
        if self.bus.is_none() {
            let cfg: BusConfiguration = match self.root.get("bus") {
                Some(v) => serde_yaml::from_value(v.clone())?,
                None => BusConfiguration::default(),
            };
            cfg.validate()?;
            debug!(?cfg, "Bus configuration loaded");
            self.bus = Some(cfg);
        }
        Ok(self.bus.get_or_insert_with(BusConfiguration::default))
    }

    /// Service configurations, keyed by service name
    pub fn services(&mut self) -> Result<&HashMap<String, ServiceConfiguration>, ConfigError> {
        if self.services.is_none() {
            let mut services = HashMap::new();
            if let Some(value) = self.root.get("services") {
                let mapping = value.as_mapping().ok_or(ConfigError::InvalidYaml)?;
                debug!(count = mapping.len(), "Parsing services configuration entries");

                for (name, value) in mapping {
                    let name = name.as_str().ok_or(ConfigError::InvalidYaml)?;
                    services.insert(name.to_string(), build_service(name, value)?);
                }
            }

            let names: Vec<_> = services.keys().cloned().collect();
            debug!(count = services.len(), ?names, "Services configuration loaded");
            self.services = Some(services);
        }
        Ok(self.services.get_or_insert_with(HashMap::new))
    }

    /// Configuration of one service, if the file has any
    pub fn service(&mut self, name: &str) -> Result<Option<ServiceConfiguration>, ConfigError> {
        Ok(self.services()?.get(name).cloned())
    }
}

fn section_or_default<T>(root: &Value, key: &str) -> T
where
    T: DeserializeOwned + Default + std::fmt::Debug,
{
    let cfg = root
        .get(key)
        .cloned()
        .map(|v| {
            serde_yaml::from_value(v).unwrap_or_else(|e| {
                warn!(error = ?e, section = key, "invalid config, falling back to default");
                T::default()
            })
        })
        .unwrap_or_default();
    debug!(?cfg, section = key, "configuration loaded");
    cfg
}

// The map key names the service; a `name` field, when present, must agree
fn build_service(name: &str, value: &Value) -> Result<ServiceConfiguration, ConfigError> {
    let mut mapping = match value {
        Value::Mapping(m) => m.clone(),
        Value::Null => Mapping::new(),
        _ => return Err(ConfigError::InvalidYaml),
    };

    let key = Value::String("name".to_string());
    match mapping.get(&key) {
        Some(Value::String(declared)) if declared != name => {
            return Err(ConfigError::Invalid(format!(
                "service {} declares name {}",
                name, declared
            )));
        }
        Some(_) => {}
        None => {
            mapping.insert(key, Value::String(name.to_string()));
        }
    }

    let config: ServiceConfiguration = serde_yaml::from_value(Value::Mapping(mapping))?;
    config.validate().map_err(|e| {
        debug!(error = ?e, service = name, "Service configuration validation failed");
        ConfigError::Invalid(format!("service {}: {}", name, e))
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mited_bus::LocalBroker;
    use mited_service::Layer;
    use tracing_test::traced_test;

    use super::*;

    fn testdata_path(file: &str) -> String {
        format!("{}/testdata/{}", env!("CARGO_MANIFEST_DIR"), file)
    }

    #[test]
    #[traced_test]
    fn test_full_config() {
        let mut loader = ConfigLoader::new(&testdata_path("config.yaml")).unwrap();

        assert_eq!(loader.tracing().log_level(), "debug");
        assert_eq!(loader.runtime().n_cores(), 1);
        assert_eq!(loader.runtime().drain_timeout(), Duration::from_secs(2));

        let bus = loader.bus().unwrap();
        assert_eq!(bus.servers(), ["local://demo"]);
        assert_eq!(bus.identity(), "demo");

        let services = loader.services().unwrap();
        assert_eq!(services.len(), 2);

        let test = &services["test"];
        assert_eq!(test.name(), "test");
        assert_eq!(test.versions(), ["1.0", "1.1", "2.0"]);
        assert_eq!(test.chunk_size(), 1024);

        let api = loader.service("my-api").unwrap().unwrap();
        assert_eq!(api.layer(), Layer::Middleware);
        assert_eq!(api.call_timeout(), Duration::from_millis(500));

        assert!(loader.service("missing").unwrap().is_none());
    }

    #[test]
    #[traced_test]
    fn test_empty_config() {
        let mut loader = ConfigLoader::new(&testdata_path("config-empty.yaml")).unwrap();

        assert_eq!(loader.tracing(), &TracingConfiguration::default());
        assert_eq!(loader.runtime(), &RuntimeConfiguration::default());
        assert_eq!(loader.bus().unwrap(), &BusConfiguration::default());
        assert!(loader.services().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let res = ConfigLoader::new(&testdata_path("does-not-exist.yaml"));
        assert!(matches!(res, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_unknown_key() {
        let res = ConfigLoader::parse("tracing: {}\nservers: []\n");
        assert!(matches!(res, Err(ConfigError::InvalidKey(k)) if k == "servers"));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ConfigLoader::parse("tracing: [unclosed"),
            Err(ConfigError::InvalidYaml)
        ));
        assert!(matches!(
            ConfigLoader::parse("- a\n- b\n"),
            Err(ConfigError::InvalidYaml)
        ));
    }

    #[test]
    #[traced_test]
    fn test_invalid_section_falls_back() {
        let mut loader = ConfigLoader::parse("runtime:\n  n_cores: many\n").unwrap();
        assert_eq!(loader.runtime(), &RuntimeConfiguration::default());
        assert!(logs_contain("falling back to default"));
    }

    #[test]
    fn test_invalid_services() {
        let mut loader = ConfigLoader::parse("services:\n  test:\n    versions: []\n").unwrap();
        assert!(matches!(loader.services(), Err(ConfigError::Invalid(_))));

        let mut loader =
            ConfigLoader::parse("services:\n  test:\n    name: other\n    versions: ['1']\n")
                .unwrap();
        assert!(matches!(loader.services(), Err(ConfigError::Invalid(_))));

        let mut loader =
            ConfigLoader::parse("services:\n  test:\n    versions: ['1']\n    port: 80\n").unwrap();
        assert!(matches!(loader.services(), Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_invalid_bus() {
        let mut loader = ConfigLoader::parse("bus:\n  servers: []\n").unwrap();
        assert!(matches!(loader.bus(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_placeholders() {
        // SAFETY: the variable is only read by this test
        unsafe { std::env::set_var("MITED_TEST_IDENTITY", "from-env") };
        let mut loader = ConfigLoader::parse("bus:\n  identity: ${env:MITED_TEST_IDENTITY}\n").unwrap();
        assert_eq!(loader.bus().unwrap().identity(), "from-env");

        let res = ConfigLoader::parse("bus:\n  identity: ${env:MITED_TEST_UNSET_VARIABLE}\n");
        assert!(matches!(res, Err(ConfigError::ResolverError(_))));
    }

    #[tokio::test]
    async fn test_connect() {
        let broker = LocalBroker::new();

        let config = BusConfiguration::new().with_identity("demo");
        let bus = config.connect(&broker, "test").await.unwrap();
        assert_eq!(mited_bus::Bus::identity(&bus), "demo.test");

        let config = BusConfiguration::new().with_servers(["nats://127.0.0.1:4222"]);
        assert!(config.connect(&broker, "test").await.is_err());
    }
}
