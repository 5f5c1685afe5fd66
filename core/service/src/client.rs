// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client side of the RPC protocol.
//!
//! A [`MethodProxy`] owns nothing but its subject: every call allocates a
//! private inbox, subscribes to it before publishing the request, collects
//! the reply chunks until the terminator and always releases the inbox,
//! whatever the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mited_bus::{Bus, BusError, Subscription};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::chunk::{Assembly, ChunkAssembler};
use crate::config::ClientConfiguration;
use crate::envelope::Envelope;
use crate::errors::RpcError;
use crate::subject::{Layer, rpc_subject};

/// Invokes one remote method
pub struct MethodProxy {
    bus: Arc<dyn Bus>,
    subject: String,
    timeout: Duration,
}

impl MethodProxy {
    pub fn new(bus: Arc<dyn Bus>, subject: impl Into<String>, timeout: Duration) -> Self {
        MethodProxy {
            bus,
            subject: subject.into(),
            timeout,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call the method with positional arguments and return the decoded
    /// result
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        let payload = Bytes::from(serde_json::to_vec(&args)?);

        let inbox = self.bus.new_inbox();
        // subscribe first, a reply must never arrive before its inbox exists
        let mut sub = self.bus.subscribe(&inbox, None).await?;
        trace!(subject = %self.subject, %inbox, "calling");

        let res = match tokio::time::timeout(self.timeout, self.exchange(&inbox, &mut sub, payload))
            .await
        {
            Ok(res) => res,
            Err(_) => {
                debug!(subject = %self.subject, timeout = ?self.timeout, "call timed out");
                Err(RpcError::Timeout(self.subject.clone()))
            }
        };

        if let Err(e) = self.bus.unsubscribe(sub.id()).await {
            warn!(%inbox, error = %e, "cannot release inbox");
        }

        res
    }

    /// Same as [`MethodProxy::call`], decoding the result into `T`
    pub async fn call_as<T: DeserializeOwned>(&self, args: Vec<Value>) -> Result<T, RpcError> {
        let value = self.call(args).await?;
        serde_json::from_value(value).map_err(|e| RpcError::InvalidReply(e.to_string()))
    }

    async fn exchange(
        &self,
        inbox: &str,
        sub: &mut Subscription,
        payload: Bytes,
    ) -> Result<Value, RpcError> {
        self.bus.publish_request(&self.subject, inbox, payload).await?;

        let mut assembler = ChunkAssembler::new();
        loop {
            let msg = sub.next().await.ok_or(BusError::Closed)?;
            let envelope = Envelope::decode(&msg.payload)?;

            if let Assembly::Complete(value) = assembler.push(envelope)? {
                trace!(subject = %self.subject, chunks = assembler.chunks(), "call complete");
                return Ok(value);
            }
        }
    }
}

impl std::fmt::Debug for MethodProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodProxy")
            .field("subject", &self.subject)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Proxy to one version of a remote service. Method proxies are created on
/// first use and cached.
#[derive(Clone)]
pub struct RemoteService {
    bus: Arc<dyn Bus>,
    layer: Layer,
    name: String,
    version: String,
    timeout: Duration,
    proxies: Arc<RwLock<HashMap<String, Arc<MethodProxy>>>>,
}

impl RemoteService {
    pub fn new(
        bus: Arc<dyn Bus>,
        layer: Layer,
        name: impl Into<String>,
        version: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        RemoteService {
            bus,
            layer,
            name: name.into(),
            version: version.into(),
            timeout,
            proxies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_config(
        bus: Arc<dyn Bus>,
        config: &ClientConfiguration,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        RemoteService::new(bus, config.layer(), name, version, config.timeout())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn method(&self, method: &str) -> Arc<MethodProxy> {
        if let Some(proxy) = self.proxies.read().get(method) {
            return proxy.clone();
        }

        self.proxies
            .write()
            .entry(method.to_string())
            .or_insert_with(|| {
                Arc::new(MethodProxy::new(
                    self.bus.clone(),
                    rpc_subject(self.layer, &self.name, &self.version, method),
                    self.timeout,
                ))
            })
            .clone()
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.method(method).call(args).await
    }

    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, RpcError> {
        self.method(method).call_as(args).await
    }
}

impl std::fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("layer", &self.layer)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}
