// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Mapping between (layer, name, version, method) and bus subjects.
//!
//! RPC requests travel on `rpc.<layer>.<name>.<version>.<method>` and
//! notifications on `notification.<layer>.<producer>.<version>.<topic>`.
//! Versions are normalized by replacing `.` with `_`, as `.` separates
//! subject tokens. Dispatch reads the version and the method at fixed
//! positions, so the number of tokens must never change.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const RPC_PREFIX: &str = "rpc";
pub const NOTIFICATION_PREFIX: &str = "notification";
pub const WILDCARD: &str = "*";

pub const VERSION_INDEX: usize = 3;
pub const METHOD_INDEX: usize = 4;
const SUBJECT_TOKENS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// pure RPC backends
    #[default]
    Service,
    /// HTTP-fronted gateways
    Middleware,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Service => "service",
            Layer::Middleware => "middleware",
        }
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(Layer::Service),
            "middleware" => Ok(Layer::Middleware),
            other => Err(format!("unknown layer {}", other)),
        }
    }
}

pub fn normalize_version(version: &str) -> String {
    version.replace('.', "_")
}

pub fn rpc_subject(layer: Layer, name: &str, version: &str, method: &str) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        RPC_PREFIX,
        layer,
        name,
        normalize_version(version),
        method
    )
}

/// Subject matching every method of one version of a service
pub fn rpc_version_subject(layer: Layer, name: &str, version: &str) -> String {
    rpc_subject(layer, name, version, WILDCARD)
}

/// Queue group shared by the replicas of a service
pub fn rpc_queue_group(layer: Layer, name: &str) -> String {
    format!("{}.{}.{}", RPC_PREFIX, layer, name)
}

/// Notification subject. Every component may be `*` when building a
/// subscription subject.
pub fn notification_subject(layer: &str, producer: &str, version: &str, topic: &str) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        NOTIFICATION_PREFIX,
        layer,
        producer,
        normalize_version(version),
        topic
    )
}

/// Queue group of a notification consumer: replicas of the same consumer
/// share the messages published on the subject
pub fn notification_queue_group(subject: &str, consumer: &str) -> String {
    format!("{}.{}", subject, consumer)
}

/// Extract the (version, method) pair from an inbound request subject
pub fn decompose_rpc_subject(subject: &str) -> Option<(&str, &str)> {
    let tokens: Vec<&str> = subject.split('.').collect();
    if tokens.len() != SUBJECT_TOKENS || tokens[0] != RPC_PREFIX {
        return None;
    }
    Some((tokens[VERSION_INDEX], tokens[METHOD_INDEX]))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_rpc_subject() {
        assert_eq!(
            rpc_subject(Layer::Service, "foo", "1.0", "bar"),
            "rpc.service.foo.1_0.bar"
        );
        assert_eq!(
            rpc_subject(Layer::Middleware, "api", "2", "bar"),
            "rpc.middleware.api.2.bar"
        );
        assert_eq!(
            rpc_version_subject(Layer::Service, "foo", "1.0.3"),
            "rpc.service.foo.1_0_3.*"
        );
        assert_eq!(rpc_queue_group(Layer::Service, "foo"), "rpc.service.foo");
    }

    #[test]
    fn test_subject_is_pure_and_injective() {
        let versions = ["1", "1.0", "1.1", "2.0", "*"];
        let methods = ["ping", "hello", "add"];

        let mut seen = HashSet::new();
        for v in versions {
            for m in methods {
                let subject = rpc_subject(Layer::Service, "foo", v, m);
                assert_eq!(subject, rpc_subject(Layer::Service, "foo", v, m));
                assert!(seen.insert(subject), "collision for {} {}", v, m);
            }
        }
    }

    #[test]
    fn test_notification_subject() {
        assert_eq!(
            notification_subject("service", "producer", "1.0", "updates"),
            "notification.service.producer.1_0.updates"
        );
        assert_eq!(
            notification_subject("*", "*", "*", "updates"),
            "notification.*.*.*.updates"
        );
        assert_eq!(
            notification_queue_group("notification.*.*.*.updates", "consumer"),
            "notification.*.*.*.updates.consumer"
        );
    }

    #[test]
    fn test_decompose() {
        assert_eq!(
            decompose_rpc_subject("rpc.service.foo.1_0.bar"),
            Some(("1_0", "bar"))
        );
        let subject = rpc_subject(Layer::Middleware, "api", "2.1", "list");
        assert_eq!(decompose_rpc_subject(&subject), Some(("2_1", "list")));

        assert_eq!(decompose_rpc_subject("rpc.service.foo.1_0"), None);
        assert_eq!(decompose_rpc_subject("rpc.service.foo.1_0.bar.baz"), None);
        assert_eq!(
            decompose_rpc_subject("notification.service.foo.1_0.bar"),
            None
        );
    }

    #[test]
    fn test_layer() {
        assert_eq!(Layer::default(), Layer::Service);
        assert_eq!("middleware".parse::<Layer>(), Ok(Layer::Middleware));
        assert!("gateway".parse::<Layer>().is_err());
        assert_eq!(Layer::Middleware.to_string(), "middleware");
    }
}
