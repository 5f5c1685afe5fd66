// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Version → method → handler table, built once when a service is created.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::errors::{RpcError, ServiceError};
use crate::handler::Method;
use crate::subject::{WILDCARD, normalize_version};

/// What to do with a handler targeting a version the service does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPolicy {
    /// register it anyway, it is simply never reachable
    #[default]
    Lenient,
    /// refuse to build the service
    Strict,
}

impl VersionPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            VersionPolicy::Strict
        } else {
            VersionPolicy::Lenient
        }
    }

    /// Check a handler version against the versions declared by its parent
    pub fn check(&self, version: &str, declared: &[String]) -> Result<(), ServiceError> {
        let normalized = normalize_version(version);
        if *self == VersionPolicy::Lenient
            || version == WILDCARD
            || declared.iter().any(|v| normalize_version(v) == normalized)
        {
            return Ok(());
        }

        Err(ServiceError::InconsistentVersion {
            version: version.to_string(),
            declared: declared.to_vec(),
        })
    }
}

/// Read-only after construction, shared between dispatch tasks
#[derive(Debug, Clone)]
pub struct EndpointTable {
    endpoints: HashMap<String, HashMap<String, Arc<Method>>>,
}

impl EndpointTable {
    pub fn build(
        methods: Vec<Method>,
        declared: &[String],
        policy: VersionPolicy,
    ) -> Result<Self, ServiceError> {
        let mut endpoints: HashMap<String, HashMap<String, Arc<Method>>> = HashMap::new();
        endpoints.insert(WILDCARD.to_string(), HashMap::new());

        for method in methods {
            let method = Arc::new(method);
            for version in method.declared_versions() {
                policy.check(version, declared)?;

                // last registration for a (version, name) pair wins
                endpoints
                    .entry(normalize_version(version))
                    .or_default()
                    .insert(method.name().to_string(), method.clone());
            }
        }

        for (version, methods) in endpoints.iter() {
            debug!(%version, methods = ?methods.keys().collect::<Vec<_>>(), "endpoints");
        }

        Ok(EndpointTable { endpoints })
    }

    /// Find the handler for a (normalized version, method) pair, falling
    /// back to the wildcard version
    pub fn resolve(&self, version: &str, method: &str) -> Result<Arc<Method>, RpcError> {
        self.endpoints
            .get(version)
            .and_then(|methods| methods.get(method))
            .or_else(|| self.wildcard().get(method))
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("{}.{}", version, method)))
    }

    /// Methods registered under a normalized version, wildcard excluded
    pub fn methods(&self, version: &str) -> Option<&HashMap<String, Arc<Method>>> {
        self.endpoints.get(version)
    }

    pub fn wildcard(&self) -> &HashMap<String, Arc<Method>> {
        // inserted by build, never removed
        &self.endpoints[WILDCARD]
    }

    /// Normalized versions present in the table, wildcard included
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn declared() -> Vec<String> {
        vec!["1".to_string(), "2".to_string()]
    }

    fn bar() -> Method {
        Method::sync("bar", |_, _| Ok(json!("bar")))
    }

    #[test]
    fn test_default_endpoints() {
        let table = EndpointTable::build(vec![], &declared(), VersionPolicy::Lenient).unwrap();
        assert_eq!(table.versions(), vec!["*"]);
        assert!(table.wildcard().is_empty());
    }

    #[test]
    fn test_wildcard_registration() {
        let table = EndpointTable::build(vec![bar()], &declared(), VersionPolicy::Lenient).unwrap();
        assert_eq!(table.versions(), vec!["*"]);
        assert!(table.wildcard().contains_key("bar"));
    }

    #[test]
    fn test_specific_version() {
        let table = EndpointTable::build(
            vec![bar().versions(["1"])],
            &declared(),
            VersionPolicy::Lenient,
        )
        .unwrap();

        assert_eq!(table.versions(), vec!["*", "1"]);
        assert!(table.methods("1").unwrap().contains_key("bar"));
        assert!(!table.wildcard().contains_key("bar"));
    }

    #[test]
    fn test_versions_are_normalized() {
        let table = EndpointTable::build(
            vec![bar().versions(["1.0", "1.1"])],
            &["1.0".to_string(), "1.1".to_string()],
            VersionPolicy::Strict,
        )
        .unwrap();

        assert_eq!(table.versions(), vec!["*", "1_0", "1_1"]);
        assert!(table.resolve("1_0", "bar").is_ok());
        assert!(table.resolve("1.0", "bar").is_err());
    }

    #[test]
    fn test_resolve_falls_back_to_wildcard() {
        let ping_v1 = Method::sync("ping", |_, _| Ok(json!("v1"))).versions(["1"]);
        let ping_any = Method::sync("ping", |_, _| Ok(json!("any")));
        let table = EndpointTable::build(
            vec![ping_v1, ping_any, bar().versions(["2"])],
            &declared(),
            VersionPolicy::Lenient,
        )
        .unwrap();

        assert_eq!(table.resolve("1", "ping").unwrap().declared_versions(), ["1"]);
        assert_eq!(table.resolve("2", "ping").unwrap().declared_versions(), ["*"]);
        assert_eq!(table.resolve("3", "ping").unwrap().declared_versions(), ["*"]);
        assert!(table.resolve("2", "bar").is_ok());

        let err = table.resolve("1", "bar").unwrap_err();
        assert_eq!(err, RpcError::NotFound("1.bar".to_string()));
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_last_registration_wins() {
        let first = Method::sync("dup", |_, _| Ok(json!(1))).versions(["1"]);
        let second = Method::sync("dup", |_, _| Ok(json!(2)))
            .versions(["1"])
            .kind(crate::handler::ResponseKind::Text);

        let table = EndpointTable::build(vec![first, second], &declared(), VersionPolicy::Lenient)
            .unwrap();
        assert_eq!(
            table.resolve("1", "dup").unwrap().response_kind(),
            crate::handler::ResponseKind::Text
        );
    }

    #[test]
    fn test_inconsistent_versions() {
        let res = EndpointTable::build(
            vec![bar().versions(["3"])],
            &declared(),
            VersionPolicy::Strict,
        );
        assert!(matches!(
            res,
            Err(ServiceError::InconsistentVersion { ref version, .. }) if version == "3"
        ));

        // accepted, just unreachable
        let table = EndpointTable::build(
            vec![bar().versions(["3"])],
            &declared(),
            VersionPolicy::Lenient,
        )
        .unwrap();
        assert!(table.resolve("1", "bar").is_err());

        // the wildcard is always consistent
        assert!(EndpointTable::build(vec![bar()], &declared(), VersionPolicy::Strict).is_ok());
    }

    #[test]
    fn test_strict_check_compares_normalized_versions() {
        let declared = vec!["1.0".to_string()];
        assert!(VersionPolicy::Strict.check("1_0", &declared).is_ok());
        assert!(VersionPolicy::Strict.check("1.0", &declared).is_ok());
        assert!(VersionPolicy::Strict.check("1_1", &declared).is_err());

        let table = EndpointTable::build(
            vec![bar().versions(["1_0"])],
            &declared,
            VersionPolicy::Strict,
        )
        .unwrap();
        assert!(table.resolve("1_0", "bar").is_ok());
    }
}
