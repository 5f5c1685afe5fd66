// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time;

use duration_str::deserialize_duration;
use serde::Deserialize;

use mited_config::component::configuration::{Configuration, ConfigurationError};

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::endpoints::VersionPolicy;
use crate::subject::{Layer, WILDCARD};

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_call_timeout() -> time::Duration {
    time::Duration::from_secs(3)
}

/// A subject token supplied by the user must not break the token layout
fn check_token(field: &str, value: &str, allow_dots: bool) -> Result<(), ConfigurationError> {
    if value.is_empty() {
        return Err(ConfigurationError::invalid(field, "must not be empty"));
    }
    if value
        .chars()
        .any(|c| c == '*' || c == '>' || c.is_whitespace() || (!allow_dots && c == '.'))
    {
        return Err(ConfigurationError::invalid(
            field,
            format!("{} contains a reserved character", value),
        ));
    }
    Ok(())
}

/// Descriptor of a service or API: name, layer, declared versions and
/// notification topics, plus the tunables of the reply protocol
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfiguration {
    name: String,

    #[serde(default)]
    layer: Layer,

    versions: Vec<String>,

    #[serde(default)]
    notification_topics: Vec<String>,

    /// maximum size in bytes of one reply chunk
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,

    /// reject handlers whose versions are not declared above
    #[serde(default)]
    strict_versions: bool,

    /// timeout of the calls made through this service's remote proxies
    #[serde(
        default = "default_call_timeout",
        deserialize_with = "deserialize_duration"
    )]
    call_timeout: time::Duration,
}

impl ServiceConfiguration {
    pub fn new<I, S>(name: impl Into<String>, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ServiceConfiguration {
            name: name.into(),
            layer: Layer::default(),
            versions: versions.into_iter().map(Into::into).collect(),
            notification_topics: Vec::new(),
            chunk_size: default_chunk_size(),
            strict_versions: false,
            call_timeout: default_call_timeout(),
        }
    }

    pub fn with_layer(self, layer: Layer) -> Self {
        ServiceConfiguration { layer, ..self }
    }

    pub fn with_notification_topics<I, S>(self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ServiceConfiguration {
            notification_topics: topics.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        ServiceConfiguration { chunk_size, ..self }
    }

    pub fn with_strict_versions(self, strict_versions: bool) -> Self {
        ServiceConfiguration {
            strict_versions,
            ..self
        }
    }

    pub fn with_call_timeout(self, call_timeout: time::Duration) -> Self {
        ServiceConfiguration {
            call_timeout,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn notification_topics(&self) -> &[String] {
        &self.notification_topics
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn strict_versions(&self) -> bool {
        self.strict_versions
    }

    pub fn version_policy(&self) -> VersionPolicy {
        VersionPolicy::from_strict(self.strict_versions)
    }

    pub fn call_timeout(&self) -> time::Duration {
        self.call_timeout
    }

    /// Version used when publishing notifications
    pub fn notification_version(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }
}

impl Configuration for ServiceConfiguration {
    fn validate(&self) -> Result<(), ConfigurationError> {
        check_token("name", &self.name, false)?;

        if self.versions.is_empty() {
            return Err(ConfigurationError::MissingField("versions".to_string()));
        }
        for version in &self.versions {
            if version == WILDCARD {
                return Err(ConfigurationError::invalid(
                    "versions",
                    "the wildcard cannot be declared as a version",
                ));
            }
            check_token("versions", version, true)?;
        }

        for topic in &self.notification_topics {
            check_token("notification_topics", topic, false)?;
        }

        if self.chunk_size == 0 {
            return Err(ConfigurationError::invalid("chunk_size", "must be at least 1"));
        }

        Ok(())
    }
}

/// Settings of a standalone client
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfiguration {
    #[serde(
        default = "default_call_timeout",
        deserialize_with = "deserialize_duration"
    )]
    timeout: time::Duration,

    #[serde(default)]
    layer: Layer,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        ClientConfiguration {
            timeout: default_call_timeout(),
            layer: Layer::default(),
        }
    }
}

impl ClientConfiguration {
    pub fn new() -> Self {
        ClientConfiguration::default()
    }

    pub fn with_timeout(self, timeout: time::Duration) -> Self {
        ClientConfiguration { timeout, ..self }
    }

    pub fn with_layer(self, layer: Layer) -> Self {
        ClientConfiguration { layer, ..self }
    }

    pub fn timeout(&self) -> time::Duration {
        self.timeout
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }
}

impl Configuration for ClientConfiguration {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.timeout.is_zero() {
            return Err(ConfigurationError::invalid("timeout", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_yaml() {
        let config: ServiceConfiguration = serde_yaml::from_str(
            r#"
name: test
versions: ["1.0", "1.1", "2.0"]
"#,
        )
        .unwrap();

        assert_eq!(config, ServiceConfiguration::new("test", ["1.0", "1.1", "2.0"]));
        assert_eq!(config.layer(), Layer::Service);
        assert_eq!(config.chunk_size(), 64 * 1024);
        assert_eq!(config.call_timeout(), time::Duration::from_secs(3));
        assert!(!config.strict_versions());
        assert_eq!(config.version_policy(), VersionPolicy::Lenient);
        assert_eq!(config.notification_version(), Some("2.0"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_yaml() {
        let config: ServiceConfiguration = serde_yaml::from_str(
            r#"
name: gateway
layer: middleware
versions: ["1"]
notification_topics: [updates, errors]
chunk_size: 5
strict_versions: true
call_timeout: 250ms
"#,
        )
        .unwrap();

        assert_eq!(config.layer(), Layer::Middleware);
        assert_eq!(config.notification_topics(), ["updates", "errors"]);
        assert_eq!(config.chunk_size(), 5);
        assert_eq!(config.version_policy(), VersionPolicy::Strict);
        assert_eq!(config.call_timeout(), time::Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field() {
        let res: Result<ServiceConfiguration, _> =
            serde_yaml::from_str("name: test\nversions: [\"1\"]\nport: 8000\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_validate() {
        let valid = ServiceConfiguration::new("test", ["1.0"]);
        assert!(valid.validate().is_ok());

        let cases = [
            ServiceConfiguration::new("", ["1.0"]),
            ServiceConfiguration::new("te.st", ["1.0"]),
            ServiceConfiguration::new("te*", ["1.0"]),
            ServiceConfiguration::new("test", Vec::<String>::new()),
            ServiceConfiguration::new("test", ["*"]),
            ServiceConfiguration::new("test", ["1 0"]),
            valid.clone().with_chunk_size(0),
            valid.clone().with_notification_topics(["a.b"]),
            valid.clone().with_notification_topics([">"]),
        ];

        for config in cases {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn test_client_configuration() {
        let config: ClientConfiguration = serde_yaml::from_str("timeout: 1s").unwrap();
        assert_eq!(config.timeout(), time::Duration::from_secs(1));
        assert_eq!(config.layer(), Layer::Service);
        assert!(config.validate().is_ok());

        assert_eq!(ClientConfiguration::new().timeout(), time::Duration::from_secs(3));
        assert!(
            ClientConfiguration::new()
                .with_timeout(time::Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
