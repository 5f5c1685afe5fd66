// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

use tokio::sync::mpsc;

use crate::message::Message;

/// Identifier of a subscription, unique per broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving side of a subscription.
///
/// Messages are delivered in publish order. Dropping the subscription
/// stops delivery; the bus releases it lazily.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    subject: String,
    queue: Option<String>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        subject: impl Into<String>,
        queue: Option<String>,
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Subscription {
            id,
            subject: subject.into(),
            queue,
            rx,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Wait for the next message. Returns None once the subscription
    /// has been removed from the bus.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Return a message if one is already queued
    pub fn try_next(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}
