// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! RPC services: registration, dispatch and lifecycle.
//!
//! A [`Service`] subscribes `rpc.<layer>.<name>.<version>.*` for every
//! declared version, in the queue group shared by all its replicas. Each
//! inbound request is routed by the (version, method) pair read from its
//! subject, executed on its own task, and answered with a chunked reply
//! stream on the request's reply subject.

use std::sync::Arc;

use mited_bus::{Bus, Message};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use mited_config::component::configuration::Configuration;

use crate::chunk::ReplyStream;
use crate::client::RemoteService;
use crate::config::ServiceConfiguration;
use crate::endpoints::EndpointTable;
use crate::errors::{RpcError, ServiceError};
use crate::handler::{self, Args, Method, Request};
use crate::listener::Running;
use crate::notification::{NotificationHandler, Notifier};
use crate::status;
use crate::subject::{decompose_rpc_subject, rpc_queue_group, rpc_version_subject};

/// Routes inbound requests to the endpoint table and streams the replies
pub struct Dispatcher {
    name: String,
    chunk_size: usize,
    endpoints: EndpointTable,
    bus: Arc<dyn Bus>,
}

impl Dispatcher {
    pub fn new(
        name: impl Into<String>,
        chunk_size: usize,
        endpoints: EndpointTable,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Dispatcher {
            name: name.into(),
            chunk_size,
            endpoints,
            bus,
        }
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// Route, decode and execute a request, returning the reply to stream
    pub async fn process(&self, msg: &Message) -> ReplyStream {
        match self.execute(msg).await {
            Ok(reply) if reply.status == status::OK => {
                match ReplyStream::ok(&reply.body, self.chunk_size) {
                    Ok(stream) => stream,
                    Err(e) => self.failure(&msg.subject, e),
                }
            }
            // a handler choosing its own status is answered unchunked
            Ok(reply) => ReplyStream::single(reply.status, reply.body),
            Err(e) => self.failure(&msg.subject, e),
        }
    }

    fn failure(&self, subject: &str, err: RpcError) -> ReplyStream {
        if err.is_fault() {
            error!(%subject, error = %err, "request failed");
        } else {
            debug!(%subject, status = err.status(), error = %err, "request rejected");
        }
        ReplyStream::error(&err)
    }

    async fn execute(&self, msg: &Message) -> Result<handler::Reply, RpcError> {
        let (version, method) = decompose_rpc_subject(&msg.subject)
            .ok_or_else(|| RpcError::NotFound(msg.subject.clone()))?;
        let method = self.endpoints.resolve(version, method)?;

        let args = match serde_json::from_slice::<Value>(&msg.payload) {
            Ok(Value::Array(args)) => Args::new(args),
            Ok(other) => {
                return Err(RpcError::BadRequest(format!(
                    "arguments must be a list, got {}",
                    other
                )));
            }
            Err(e) => return Err(RpcError::BadRequest(e.to_string())),
        };

        trace!(subject = %msg.subject, method = %method.name(), args = args.len(), "executing");
        let request = Request::rpc(&self.name, version, &msg.subject, msg.reply.clone());
        handler::execute(method.handler(), request, args).await
    }

    /// Handle one request end to end. Every request carrying a reply subject
    /// gets exactly one terminated reply stream.
    pub async fn handle(&self, msg: Message) {
        let stream = self.process(&msg).await;

        let Some(reply) = msg.reply.as_deref() else {
            debug!(subject = %msg.subject, "request without reply subject, reply dropped");
            return;
        };

        let status = stream.status();
        let mut chunks = 0usize;
        // chunk order is the reassembly order
        for envelope in stream {
            let payload = match envelope.encode() {
                Ok(p) => p,
                Err(e) => {
                    error!(subject = %msg.subject, error = %e, "cannot encode reply");
                    return;
                }
            };
            if let Err(e) = self.bus.publish(reply, payload).await {
                warn!(subject = %msg.subject, %reply, error = %e, "cannot publish reply");
                return;
            }
            chunks += 1;
        }

        debug!(subject = %msg.subject, status, chunks, "request served");
    }
}

/// Collects the descriptor, methods and notification handlers of a service
pub struct ServiceBuilder {
    config: ServiceConfiguration,
    methods: Vec<Method>,
    notification_handlers: Vec<NotificationHandler>,
}

impl ServiceBuilder {
    pub fn new(config: ServiceConfiguration) -> Self {
        ServiceBuilder {
            config,
            methods: Vec::new(),
            notification_handlers: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.extend(methods);
        self
    }

    pub fn notification_handler(mut self, handler: NotificationHandler) -> Self {
        self.notification_handlers.push(handler);
        self
    }

    pub fn build(self, bus: Arc<dyn Bus>) -> Result<Service, ServiceError> {
        self.config.validate()?;

        let endpoints = EndpointTable::build(
            self.methods,
            self.config.versions(),
            self.config.version_policy(),
        )?;

        let notifier = Notifier::new(
            bus.clone(),
            self.config.layer(),
            self.config.name(),
            self.config.notification_version().unwrap_or_default(),
            self.config.notification_topics(),
        );

        let dispatcher = Dispatcher::new(
            self.config.name(),
            self.config.chunk_size(),
            endpoints,
            bus.clone(),
        );

        Ok(Service {
            inner: Arc::new(ServiceInner {
                config: self.config,
                dispatcher: Arc::new(dispatcher),
                notification_handlers: self.notification_handlers,
                notifier,
                bus,
                running: Mutex::new(None),
            }),
        })
    }
}

struct ServiceInner {
    config: ServiceConfiguration,
    dispatcher: Arc<Dispatcher>,
    notification_handlers: Vec<NotificationHandler>,
    notifier: Notifier,
    bus: Arc<dyn Bus>,
    running: Mutex<Option<Running>>,
}

/// A versioned RPC service
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    pub fn builder(config: ServiceConfiguration) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        self.inner.config.name()
    }

    pub fn config(&self) -> &ServiceConfiguration {
        &self.inner.config
    }

    pub fn endpoints(&self) -> &EndpointTable {
        self.inner.dispatcher.endpoints()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Publish a notification on one of the declared topics
    pub async fn notify<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), RpcError> {
        self.inner.notifier.notify(topic, payload).await
    }

    /// Proxy to another service reachable on the same bus, using the
    /// configured call timeout
    pub fn remote_service(&self, name: &str, version: &str) -> RemoteService {
        RemoteService::new(
            self.inner.bus.clone(),
            self.inner.config.layer(),
            name,
            version,
            self.inner.config.call_timeout(),
        )
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Subscribe every declared version and notification handler
    pub async fn start(&self) -> Result<(), ServiceError> {
        if self.is_running() {
            return Err(ServiceError::AlreadyStarted(self.name().to_string()));
        }

        let mut running = Running::new();
        if let Err(e) = self.subscribe_all(&mut running).await {
            running.shutdown(&self.inner.bus).await;
            return Err(e);
        }

        let lost = {
            let mut guard = self.inner.running.lock();
            if guard.is_some() {
                // a concurrent start won the race
                Some(running)
            } else {
                *guard = Some(running);
                None
            }
        };
        if let Some(running) = lost {
            running.shutdown(&self.inner.bus).await;
            return Err(ServiceError::AlreadyStarted(self.name().to_string()));
        }

        info!(service = %self.name(), layer = %self.inner.config.layer(), "service started");
        Ok(())
    }

    async fn subscribe_all(&self, running: &mut Running) -> Result<(), ServiceError> {
        let config = &self.inner.config;
        let queue = rpc_queue_group(config.layer(), config.name());

        for version in config.versions() {
            let subject = rpc_version_subject(config.layer(), config.name(), version);
            let sub = self.inner.bus.subscribe(&subject, Some(&queue)).await?;
            info!(%subject, %queue, "listening for requests");

            let dispatcher = self.inner.dispatcher.clone();
            running.listen(sub, move |msg| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.handle(msg).await }
            });
        }

        for handler in &self.inner.notification_handlers {
            running
                .listen_notifications(&self.inner.bus, config.name(), handler)
                .await?;
        }

        Ok(())
    }

    /// Stop listening and wait for the requests being served
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let running = self
            .inner
            .running
            .lock()
            .take()
            .ok_or_else(|| ServiceError::NotStarted(self.name().to_string()))?;

        running.shutdown(&self.inner.bus).await;
        info!(service = %self.name(), "service stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}
