// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Notification bus: fire-and-forget messages published by a producer on
//! one subject per topic, consumed by handlers subscribing with patterns.

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use mited_bus::{Bus, Message};
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, trace};

use crate::errors::RpcError;
use crate::subject::{Layer, NOTIFICATION_PREFIX, WILDCARD, normalize_version, notification_subject};

/// One component of a notification pattern
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Segment {
    #[default]
    Any,
    Exact(String),
}

impl Segment {
    pub fn matches(&self, token: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Exact(s) => s == token,
        }
    }

    fn as_token(&self) -> &str {
        match self {
            Segment::Any => WILDCARD,
            Segment::Exact(s) => s,
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            Segment::Any
        } else {
            Segment::Exact(s.to_string())
        }
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::from(s.as_str())
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Versions a handler listens to. Versions are kept as declared and
/// normalized when compared with subject tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionPattern {
    #[default]
    Any,
    Versions(Vec<String>),
}

impl VersionPattern {
    pub fn matches(&self, token: &str) -> bool {
        match self {
            VersionPattern::Any => true,
            VersionPattern::Versions(versions) => {
                versions.iter().any(|v| normalize_version(v) == token)
            }
        }
    }
}

/// Layer, producer, version and topic a notification handler listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPattern {
    layer: Segment,
    producer: Segment,
    version: VersionPattern,
    topic: Segment,
}

impl NotificationPattern {
    pub fn new(
        layer: impl Into<Segment>,
        producer: impl Into<Segment>,
        topic: impl Into<Segment>,
    ) -> Self {
        NotificationPattern {
            layer: layer.into(),
            producer: producer.into(),
            version: VersionPattern::Any,
            topic: topic.into(),
        }
    }

    /// Listen to every notification carrying the given topic
    pub fn topic(topic: impl Into<Segment>) -> Self {
        NotificationPattern::new(Segment::Any, Segment::Any, topic)
    }

    /// Restrict to explicit versions. An empty list or one containing the
    /// wildcard means any version.
    pub fn with_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let versions: Vec<String> = versions.into_iter().map(Into::into).collect();
        self.version = if versions.is_empty() || versions.iter().any(|v| v == WILDCARD) {
            VersionPattern::Any
        } else {
            VersionPattern::Versions(versions)
        };
        self
    }

    pub fn version(&self) -> &VersionPattern {
        &self.version
    }

    /// Concrete subjects to subscribe to: one per explicit version, or a
    /// single subject with the wildcards left to the transport
    pub fn subjects(&self) -> Vec<String> {
        let subject = |version: &str| {
            notification_subject(
                self.layer.as_token(),
                self.producer.as_token(),
                version,
                self.topic.as_token(),
            )
        };

        match &self.version {
            VersionPattern::Any => vec![subject(WILDCARD)],
            VersionPattern::Versions(versions) => versions.iter().map(|v| subject(v)).collect(),
        }
    }

    pub fn matches(&self, subject: &str) -> bool {
        let tokens: Vec<&str> = subject.split('.').collect();
        match tokens.as_slice() {
            [prefix, layer, producer, version, topic] => {
                *prefix == NOTIFICATION_PREFIX
                    && self.layer.matches(layer)
                    && self.producer.matches(producer)
                    && self.version.matches(version)
                    && self.topic.matches(topic)
            }
            _ => false,
        }
    }
}

pub type NotificationFuture = Pin<Box<dyn Future<Output = Result<(), RpcError>> + Send>>;

/// Callback receiving the subject and the decoded payload
pub type NotificationCallback = Arc<dyn Fn(String, Value) -> NotificationFuture + Send + Sync>;

#[derive(Clone)]
pub struct NotificationHandler {
    name: String,
    pattern: NotificationPattern,
    callback: NotificationCallback,
}

impl NotificationHandler {
    pub fn new<F, Fut>(name: impl Into<String>, pattern: NotificationPattern, f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let f = Arc::new(f);
        NotificationHandler {
            name: name.into(),
            pattern,
            callback: Arc::new(move |subject: String, payload: Value| -> NotificationFuture {
                let f = f.clone();
                Box::pin(async move { f(subject, payload).await })
            }),
        }
    }

    pub fn sync<F>(name: impl Into<String>, pattern: NotificationPattern, f: F) -> Self
    where
        F: Fn(String, Value) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        NotificationHandler {
            name: name.into(),
            pattern,
            callback: Arc::new(move |subject: String, payload: Value| -> NotificationFuture {
                let f = f.clone();
                Box::pin(async move { f(subject, payload) })
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &NotificationPattern {
        &self.pattern
    }

    /// Decode and deliver one message. Failures are logged and swallowed so
    /// that the subscription keeps running.
    pub(crate) async fn deliver(&self, msg: Message) {
        if !self.pattern.matches(&msg.subject) {
            trace!(handler = %self.name, subject = %msg.subject, "notification does not match, skipped");
            return;
        }

        let payload: Value = match serde_json::from_slice(&msg.payload) {
            Ok(v) => v,
            Err(e) => {
                error!(handler = %self.name, subject = %msg.subject, error = %e, "undecodable notification");
                return;
            }
        };

        debug!(handler = %self.name, subject = %msg.subject, "notification received");
        let fut = (self.callback)(msg.subject.clone(), payload);
        match tokio::spawn(fut.in_current_span()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(handler = %self.name, subject = %msg.subject, error = %e, "notification handler failed")
            }
            Err(e) => {
                error!(handler = %self.name, subject = %msg.subject, error = %e, "notification handler panicked")
            }
        }
    }
}

impl Debug for NotificationHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHandler")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// Publisher bound to the subject of one topic
#[derive(Clone)]
pub struct TopicPublisher {
    bus: Arc<dyn Bus>,
    subject: String,
}

impl TopicPublisher {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn publish<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), RpcError> {
        let payload = Bytes::from(serde_json::to_vec(payload)?);
        trace!(subject = %self.subject, len = payload.len(), "publishing notification");
        self.bus.publish(&self.subject, payload).await?;
        Ok(())
    }
}

impl Debug for TopicPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicPublisher")
            .field("subject", &self.subject)
            .finish()
    }
}

/// One publisher per declared topic
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    publishers: HashMap<String, TopicPublisher>,
}

impl Notifier {
    pub fn new(
        bus: Arc<dyn Bus>,
        layer: Layer,
        producer: &str,
        version: &str,
        topics: &[String],
    ) -> Self {
        let publishers = topics
            .iter()
            .map(|topic| {
                let subject = notification_subject(layer.as_str(), producer, version, topic);
                info!(%topic, %subject, "registering notification topic");
                (
                    topic.clone(),
                    TopicPublisher {
                        bus: bus.clone(),
                        subject,
                    },
                )
            })
            .collect();

        Notifier { publishers }
    }

    pub fn topic(&self, topic: &str) -> Result<&TopicPublisher, RpcError> {
        self.publishers
            .get(topic)
            .ok_or_else(|| RpcError::UnknownTopic(topic.to_string()))
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.publishers.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub async fn notify<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), RpcError> {
        self.topic(topic)?.publish(payload).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mited_bus::LocalBroker;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn test_wildcard_pattern() {
        let pattern = NotificationPattern::new("*", "*", "updates");
        assert_eq!(pattern.subjects(), vec!["notification.*.*.*.updates"]);

        assert!(pattern.matches("notification.service.foo.1_0.updates"));
        assert!(pattern.matches("notification.middleware.api.2.updates"));
        assert!(!pattern.matches("notification.service.foo.1_0.errors"));
        assert!(!pattern.matches("rpc.service.foo.1_0.updates"));
        assert!(!pattern.matches("notification.service.foo.updates"));
    }

    #[test]
    fn test_explicit_versions() {
        let pattern = NotificationPattern::new("service", "foo", "updates").with_versions(["1.0", "2.0"]);
        assert_eq!(
            pattern.subjects(),
            vec![
                "notification.service.foo.1_0.updates",
                "notification.service.foo.2_0.updates"
            ]
        );

        assert!(pattern.matches("notification.service.foo.2_0.updates"));
        assert!(!pattern.matches("notification.service.foo.3_0.updates"));
        assert!(!pattern.matches("notification.service.bar.1_0.updates"));
        assert!(!pattern.matches("notification.middleware.foo.1_0.updates"));

        let any = NotificationPattern::topic("updates").with_versions(["1", "*"]);
        assert_eq!(any.version(), &VersionPattern::Any);
    }

    #[tokio::test]
    async fn test_notifier() {
        let broker = LocalBroker::new();
        let bus: Arc<dyn Bus> = Arc::new(broker.bus("producer"));
        let notifier = Notifier::new(
            bus.clone(),
            Layer::Service,
            "producer",
            "1.1",
            &["updates".to_string(), "errors".to_string()],
        );

        assert_eq!(notifier.topics(), vec!["errors", "updates"]);
        assert_eq!(
            notifier.topic("updates").unwrap().subject(),
            "notification.service.producer.1_1.updates"
        );

        let mut sub = bus.subscribe("notification.>", None).await.unwrap();
        notifier.notify("updates", &json!({"id": 1})).await.unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.subject, "notification.service.producer.1_1.updates");
        assert_eq!(
            serde_json::from_slice::<Value>(&msg.payload).unwrap(),
            json!({"id": 1})
        );

        let err = notifier.notify("unknown", &json!(null)).await.unwrap_err();
        assert_eq!(err, RpcError::UnknownTopic("unknown".to_string()));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_deliver_survives_failures() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handler = NotificationHandler::sync(
            "counter",
            NotificationPattern::topic("updates"),
            move |_, payload| {
                if payload == json!("fail") {
                    return Err(RpcError::internal("cannot handle"));
                }
                if payload == json!("panic") {
                    panic!("handler exploded");
                }
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        let subject = "notification.service.foo.1_0.updates";
        let payloads: [&[u8]; 5] = [b"\"ok\"", b"\"fail\"", b"\"panic\"", b"not json", b"\"ok\""];
        for payload in payloads {
            handler
                .deliver(Message::new(subject, Bytes::copy_from_slice(payload)))
                .await;
        }
        handler
            .deliver(Message::new(
                "notification.service.foo.1_0.errors",
                Bytes::from_static(b"\"ok\""),
            ))
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(logs_contain("notification handler failed"));
        assert!(logs_contain("notification handler panicked"));
        assert!(logs_contain("undecodable notification"));
    }
}
