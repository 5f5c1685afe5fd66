// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Publish/subscribe transport used by mited services.
//!
//! The [`Bus`] trait captures the operations the RPC and notification
//! layers need from a subject-based message bus. [`LocalBroker`] provides an
//! in-process implementation with token wildcards and queue groups.

pub mod errors;
pub mod local;
pub mod message;
pub mod subject;
pub mod subscription;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;
use uuid::Uuid;

pub use errors::BusError;
pub use local::{LocalBroker, LocalBus};
pub use message::Message;
pub use subscription::{Subscription, SubscriptionId};

/// Prefix of the private reply subjects
pub const INBOX_PREFIX: &str = "_INBOX";

/// A connected handle to a message bus
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Name used by this connection on the bus
    fn identity(&self) -> &str;

    /// Allocate a globally unique subject suitable for replies
    fn new_inbox(&self) -> String {
        format!("{}.{}", INBOX_PREFIX, Uuid::new_v4().simple())
    }

    /// Subscribe to a subject pattern, optionally as member of a queue group
    async fn subscribe(&self, subject: &str, queue: Option<&str>)
    -> Result<Subscription, BusError>;

    /// Release a subscription
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;

    /// Publish a message without reply subject
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Publish a message carrying the subject the receiver should reply to
    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), BusError>;

    /// Publish a request and wait for the first reply
    async fn timed_request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let inbox = self.new_inbox();
        let mut sub = self.subscribe(&inbox, None).await?;

        let res = match self.publish_request(subject, &inbox, payload).await {
            Ok(()) => tokio::time::timeout(timeout, sub.next()).await,
            Err(e) => {
                if let Err(unsub) = self.unsubscribe(sub.id()).await {
                    trace!(error = %unsub, %inbox, "inbox already released");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.unsubscribe(sub.id()).await {
            trace!(error = %e, %inbox, "inbox already released");
        }

        match res {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(subject.to_string())),
        }
    }
}

/// Something that can open a connection to a bus
#[async_trait]
pub trait Connector: Send + Sync {
    type Bus: Bus;

    /// Connect to one of the servers, announcing the given identity
    async fn connect(&self, servers: &[String], identity: &str) -> Result<Self::Bus, BusError>;
}
