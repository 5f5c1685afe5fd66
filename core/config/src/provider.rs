// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Placeholder resolution for configuration trees.
//!
//! String values in a YAML document may reference external sources with
//! `${env:VARIABLE}` or `${file:/path/to/file}`. The [`ConfigResolver`]
//! walks the tree and substitutes every placeholder using the registered
//! [`ConfigProvider`]s.

pub mod env;
pub mod file;

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;
use tracing::trace;

pub use env::EnvConfigProvider;
pub use file::FileConfigProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("environment variable not set: {0}")]
    EnvNotFound(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

lazy_static! {
    // ${<scheme>:<key>}
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\{([a-z]+):([^}]+)\}").unwrap();
}

// Source of placeholder values
pub trait ConfigProvider: Send + Sync {
    fn load(&self, key: &str) -> Result<String, ProviderError>;
}

pub struct ConfigResolver {
    providers: HashMap<&'static str, Box<dyn ConfigProvider>>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigResolver {
    pub fn new() -> Self {
        let mut providers: HashMap<&'static str, Box<dyn ConfigProvider>> = HashMap::new();
        providers.insert("env", Box::new(EnvConfigProvider));
        providers.insert("file", Box::new(FileConfigProvider));

        ConfigResolver { providers }
    }

    /// Register an additional provider under the given scheme
    pub fn with_provider(mut self, scheme: &'static str, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.insert(scheme, provider);
        self
    }

    /// Resolve all the placeholders found in the tree, in place
    pub fn resolve(&self, value: &mut Value) -> Result<(), ProviderError> {
        match value {
            Value::String(s) => {
                if let Some(resolved) = self.resolve_str(s)? {
                    *s = resolved;
                }
            }
            Value::Sequence(seq) => {
                for v in seq.iter_mut() {
                    self.resolve(v)?;
                }
            }
            Value::Mapping(map) => {
                for (_, v) in map.iter_mut() {
                    self.resolve(v)?;
                }
            }
            Value::Tagged(tagged) => self.resolve(&mut tagged.value)?,
            _ => {}
        }

        Ok(())
    }

    fn resolve_str(&self, s: &str) -> Result<Option<String>, ProviderError> {
        if !PLACEHOLDER.is_match(s) {
            return Ok(None);
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(s) {
            let (Some(whole), Some(scheme), Some(key)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };

            let provider = self
                .providers
                .get(scheme.as_str())
                .ok_or_else(|| ProviderError::UnknownProvider(scheme.as_str().to_string()))?;

            trace!(scheme = scheme.as_str(), key = key.as_str(), "resolving placeholder");

            out.push_str(&s[last..whole.start()]);
            out.push_str(provider.load(key.as_str())?.trim_end_matches('\n'));
            last = whole.end();
        }
        out.push_str(&s[last..]);

        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider;

    impl ConfigProvider for StaticProvider {
        fn load(&self, key: &str) -> Result<String, ProviderError> {
            Ok(format!("static-{}", key))
        }
    }

    #[test]
    fn test_resolve_nested_values() {
        let resolver = ConfigResolver::new().with_provider("static", Box::new(StaticProvider));

        let mut value: Value = serde_yaml::from_str(
            r#"
            name: ${static:name}
            servers:
              - local://${static:a}
              - plain
            nested:
              port: 4222
            "#,
        )
        .unwrap();

        resolver.resolve(&mut value).unwrap();

        assert_eq!(value["name"], Value::from("static-name"));
        assert_eq!(value["servers"][0], Value::from("local://static-a"));
        assert_eq!(value["servers"][1], Value::from("plain"));
        assert_eq!(value["nested"]["port"], Value::from(4222));
    }

    #[test]
    fn test_several_placeholders_in_one_value() {
        let resolver = ConfigResolver::default().with_provider("static", Box::new(StaticProvider));

        let mut value = Value::from("${static:user}@${static:host}:4222");
        resolver.resolve(&mut value).unwrap();
        assert_eq!(value, Value::from("static-user@static-host:4222"));

        let mut value = Value::from("$plain {text}");
        resolver.resolve(&mut value).unwrap();
        assert_eq!(value, Value::from("$plain {text}"));
    }

    #[test]
    fn test_unknown_provider() {
        let resolver = ConfigResolver::new();
        let mut value = Value::from("${vault:secret}");

        let err = resolver.resolve(&mut value).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(s) if s == "vault"));
    }

    #[test]
    fn test_missing_env() {
        let resolver = ConfigResolver::new();
        let mut value = Value::from("${env:MITED_SURELY_NOT_DEFINED_VARIABLE}");

        let err = resolver.resolve(&mut value).unwrap_err();
        assert!(matches!(err, ProviderError::EnvNotFound(_)));
    }
}
