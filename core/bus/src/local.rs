// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process broker.
//!
//! Every connection obtained from the same [`LocalBroker`] shares one
//! subscription table. Plain subscribers receive every matching message;
//! subscribers sharing a queue group on the same pattern receive each
//! message exactly once among them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::errors::BusError;
use crate::message::Message;
use crate::subject;
use crate::subscription::{Subscription, SubscriptionId};
use crate::{Bus, Connector};

/// Scheme accepted in the server list passed to [`Connector::connect`]
pub const LOCAL_SCHEME: &str = "local://";

#[derive(Debug)]
struct Entry {
    pattern: String,
    queue: Option<String>,
    owner: String,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct SubscriptionTable {
    // subscription id -> entry
    entries: HashMap<SubscriptionId, Entry>,
}

impl SubscriptionTable {
    fn insert(&mut self, id: SubscriptionId, entry: Entry) {
        self.entries.insert(id, entry);
    }

    fn remove(&mut self, id: &SubscriptionId) -> Option<Entry> {
        self.entries.remove(id)
    }

    /// Deliver the message to all the matching subscribers and return the
    /// ids of the subscriptions found closed on the way.
    fn dispatch(&self, msg: &Message) -> (usize, Vec<SubscriptionId>) {
        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut groups: HashMap<(&str, &str), Vec<(&SubscriptionId, &Entry)>> = HashMap::new();

        for (id, entry) in self.entries.iter() {
            if !subject::matches(&entry.pattern, &msg.subject) {
                continue;
            }

            match entry.queue.as_deref() {
                Some(queue) => groups
                    .entry((entry.pattern.as_str(), queue))
                    .or_default()
                    .push((id, entry)),
                None => {
                    if entry.tx.send(msg.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(*id);
                    }
                }
            }
        }

        for ((pattern, queue), members) in groups {
            // start from a random member and take the first one still alive
            let start = rand::rng().random_range(0..members.len());
            let mut sent = false;
            for i in 0..members.len() {
                let (id, entry) = members[(start + i) % members.len()];
                if entry.tx.send(msg.clone()).is_ok() {
                    trace!(%pattern, %queue, owner = %entry.owner, "queue group member selected");
                    sent = true;
                    break;
                }
                closed.push(*id);
            }
            if sent {
                delivered += 1;
            } else {
                debug!(%pattern, %queue, "no live member in queue group");
            }
        }

        (delivered, closed)
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    table: RwLock<SubscriptionTable>,
    next_id: AtomicU64,
}

impl BrokerInner {
    fn deliver(&self, msg: Message) {
        let (delivered, closed) = self.table.read().dispatch(&msg);

        if !closed.is_empty() {
            let mut table = self.table.write();
            for id in closed {
                debug!(%id, "removing closed subscription");
                table.remove(&id);
            }
        }

        if delivered == 0 {
            trace!(subject = %msg.subject, "no subscriber for message, dropped");
        }
    }
}

/// Shared in-process broker
#[derive(Debug, Clone, Default)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

impl LocalBroker {
    pub fn new() -> Self {
        LocalBroker::default()
    }

    /// Open a connection with the given identity
    pub fn bus(&self, identity: impl Into<String>) -> LocalBus {
        LocalBus {
            broker: self.inner.clone(),
            identity: identity.into(),
        }
    }

    /// Number of live subscriptions known to the broker
    pub fn subscription_count(&self) -> usize {
        self.inner.table.read().entries.len()
    }

    /// Number of live subscriptions whose pattern matches the subject
    pub fn interest(&self, subject: &str) -> usize {
        self.inner
            .table
            .read()
            .entries
            .values()
            .filter(|e| subject::matches(&e.pattern, subject))
            .count()
    }
}

#[async_trait]
impl Connector for LocalBroker {
    type Bus = LocalBus;

    async fn connect(&self, servers: &[String], identity: &str) -> Result<LocalBus, BusError> {
        let server = servers
            .iter()
            .find(|s| s.starts_with(LOCAL_SCHEME))
            .ok_or_else(|| {
                BusError::ConnectionError(format!(
                    "no {} server among {:?}",
                    LOCAL_SCHEME, servers
                ))
            })?;

        debug!(%server, %identity, "connected to local broker");
        Ok(self.bus(identity))
    }
}

/// Connection handle to a [`LocalBroker`]
#[derive(Debug, Clone)]
pub struct LocalBus {
    broker: Arc<BrokerInner>,
    identity: String,
}

#[async_trait]
impl Bus for LocalBus {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
    ) -> Result<Subscription, BusError> {
        subject::validate_pattern(subject)?;
        if let Some(q) = queue
            && (q.is_empty() || q.chars().any(char::is_whitespace))
        {
            return Err(BusError::InvalidQueue(q.to_string()));
        }

        let id = SubscriptionId(self.broker.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        self.broker.table.write().insert(
            id,
            Entry {
                pattern: subject.to_string(),
                queue: queue.map(str::to_string),
                owner: self.identity.clone(),
                tx,
            },
        );

        debug!(%id, %subject, ?queue, identity = %self.identity, "subscribed");
        Ok(Subscription::new(id, subject, queue.map(str::to_string), rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        match self.broker.table.write().remove(&id) {
            Some(entry) => {
                debug!(%id, subject = %entry.pattern, "unsubscribed");
                Ok(())
            }
            None => Err(BusError::SubscriptionNotFound(id)),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        subject::validate_subject(subject)?;
        trace!(%subject, len = payload.len(), "publish");
        self.broker.deliver(Message::new(subject, payload));
        Ok(())
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), BusError> {
        subject::validate_subject(subject)?;
        subject::validate_subject(reply)?;
        trace!(%subject, %reply, len = payload.len(), "publish request");
        self.broker
            .deliver(Message::new(subject, payload).with_reply(reply));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;

    #[tokio::test]
    #[traced_test]
    async fn test_publish_subscribe() {
        let broker = LocalBroker::new();
        let bus = broker.bus("test");

        let mut sub = bus.subscribe("foo.*", None).await.unwrap();
        bus.publish("foo.bar", Bytes::from_static(b"1")).await.unwrap();
        bus.publish("foo.bar.baz", Bytes::from_static(b"2")).await.unwrap();
        bus.publish("foo.qux", Bytes::from_static(b"3")).await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.subject, "foo.bar");
        assert_eq!(first.payload, Bytes::from_static(b"1"));
        assert_eq!(first.reply, None);

        let second = sub.next().await.unwrap();
        assert_eq!(second.subject, "foo.qux");
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let broker = LocalBroker::new();
        let bus = broker.bus("test");

        let sub = bus.subscribe("foo", None).await.unwrap();
        assert_eq!(broker.subscription_count(), 1);

        bus.unsubscribe(sub.id()).await.unwrap();
        assert_eq!(broker.subscription_count(), 0);

        let err = bus.unsubscribe(sub.id()).await.unwrap_err();
        assert_eq!(err, BusError::SubscriptionNotFound(sub.id()));
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_released() {
        let broker = LocalBroker::new();
        let bus = broker.bus("test");

        let sub = bus.subscribe("foo", None).await.unwrap();
        drop(sub);
        assert_eq!(broker.subscription_count(), 1);

        bus.publish("foo", Bytes::new()).await.unwrap();
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_group_delivers_once() {
        let broker = LocalBroker::new();
        let a = broker.bus("replica-a");
        let b = broker.bus("replica-b");
        let observer = broker.bus("observer");

        let mut sub_a = a.subscribe("work.*", Some("workers")).await.unwrap();
        let mut sub_b = b.subscribe("work.*", Some("workers")).await.unwrap();
        let mut sub_obs = observer.subscribe("work.*", None).await.unwrap();

        for i in 0..100 {
            observer
                .publish("work.item", Bytes::from(i.to_string()))
                .await
                .unwrap();
        }

        let mut count_a = 0;
        while sub_a.try_next().is_some() {
            count_a += 1;
        }
        let mut count_b = 0;
        while sub_b.try_next().is_some() {
            count_b += 1;
        }
        let mut count_obs = 0;
        while sub_obs.try_next().is_some() {
            count_obs += 1;
        }

        assert_eq!(count_a + count_b, 100);
        assert_eq!(count_obs, 100);
    }

    #[tokio::test]
    async fn test_timed_request() {
        let broker = LocalBroker::new();
        let server = broker.bus("server");
        let client = broker.bus("client");

        let mut sub = server.subscribe("echo", None).await.unwrap();
        let responder = tokio::spawn(async move {
            let msg = sub.next().await.unwrap();
            let reply = msg.reply.unwrap();
            server.publish(&reply, msg.payload).await.unwrap();
        });

        let reply = client
            .timed_request("echo", Bytes::from_static(b"hello"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"hello"));
        responder.await.unwrap();

        // the inbox is released, only the (dropped) echo subscription is left
        assert_eq!(broker.subscription_count(), 1);
        assert_eq!(broker.interest("echo"), 1);
    }

    #[tokio::test]
    async fn test_timed_request_timeout() {
        let broker = LocalBroker::new();
        let client = broker.bus("client");

        let err = client
            .timed_request("nobody.home", Bytes::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Timeout("nobody.home".to_string()));
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_timed_request_publish_failure_releases_inbox() {
        let broker = LocalBroker::new();
        let client = broker.bus("client");

        let err = client
            .timed_request("nobody.*", Bytes::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidSubject(_)));
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_connect() {
        let broker = LocalBroker::new();

        let bus = broker
            .connect(&["local://default".to_string()], "svc")
            .await
            .unwrap();
        assert_eq!(bus.identity(), "svc");

        let err = broker
            .connect(&["nats://127.0.0.1:4222".to_string()], "svc")
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_invalid_subjects() {
        let broker = LocalBroker::new();
        let bus = broker.bus("test");

        assert!(bus.publish("foo.*", Bytes::new()).await.is_err());
        assert!(bus.subscribe("foo..bar", None).await.is_err());
        assert!(bus.subscribe("foo", Some("bad queue")).await.is_err());
    }
}
