// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Subscription loops shared by services and APIs.
//!
//! Every subscription is drained by its own task. Each message is handled on
//! a separate task holding a drain watch, so that stopping waits for the
//! in-flight work to complete.

use std::future::Future;
use std::sync::Arc;

use mited_bus::{Bus, Message, Subscription, SubscriptionId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::notification::NotificationHandler;
use crate::subject::notification_queue_group;

pub(crate) struct Running {
    cancellation_token: CancellationToken,
    drain_signal: drain::Signal,
    drain_watch: drain::Watch,
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<SubscriptionId>,
}

impl Running {
    pub(crate) fn new() -> Self {
        let (drain_signal, drain_watch) = drain::channel();
        Running {
            cancellation_token: CancellationToken::new(),
            drain_signal,
            drain_watch,
            tasks: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Run `on_message` on its own task for every message of the subscription
    pub(crate) fn listen<F, Fut>(&mut self, mut sub: Subscription, on_message: F)
    where
        F: Fn(Message) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscriptions.push(sub.id());

        let token = self.cancellation_token.clone();
        let watch = self.drain_watch.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(subject = %sub.subject(), "subscription loop cancelled");
                        break;
                    }
                    msg = sub.next() => match msg {
                        Some(msg) => {
                            let fut = on_message(msg);
                            let watch = watch.clone();
                            tokio::spawn(
                                async move {
                                    fut.await;
                                    drop(watch);
                                }
                                .in_current_span(),
                            );
                        }
                        None => {
                            debug!(subject = %sub.subject(), "subscription closed");
                            break;
                        }
                    }
                }
            }
        }
        .in_current_span());

        self.tasks.push(handle);
    }

    /// Subscribe every subject of a notification handler, with the queue
    /// group of the consuming service
    pub(crate) async fn listen_notifications(
        &mut self,
        bus: &Arc<dyn Bus>,
        consumer: &str,
        handler: &NotificationHandler,
    ) -> Result<(), mited_bus::BusError> {
        for subject in handler.pattern().subjects() {
            let queue = notification_queue_group(&subject, consumer);
            let sub = bus.subscribe(&subject, Some(&queue)).await?;
            info!(handler = %handler.name(), %subject, %queue, "starting notification handler");

            let handler = Arc::new(handler.clone());
            self.listen(sub, move |msg| {
                let handler = handler.clone();
                async move { handler.deliver(msg).await }
            });
        }
        Ok(())
    }

    /// Stop the loops, release the subscriptions and wait for in-flight
    /// handlers
    pub(crate) async fn shutdown(self, bus: &Arc<dyn Bus>) {
        let Running {
            cancellation_token,
            drain_signal,
            drain_watch,
            tasks,
            subscriptions,
        } = self;

        cancellation_token.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "subscription loop failed");
            }
        }

        for id in subscriptions {
            if let Err(e) = bus.unsubscribe(id).await {
                warn!(%id, error = %e, "cannot release subscription");
            }
        }

        drop(drain_watch);
        debug!("draining in-flight handlers");
        drain_signal.drain().await;
    }
}
