// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! HTTP-fronted API layer.
//!
//! Routes are registered per path and HTTP verb, for a list of versions or
//! for every version. Unlike RPC subjects, versions appear as-is in the
//! resulting paths (`/1.0/items`). The HTTP server itself is provided by the
//! embedding application; it lists the routes with [`Api::routes`] and
//! forwards each request to [`Api::call`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use mited_bus::Bus;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use mited_config::component::configuration::Configuration;

use crate::client::RemoteService;
use crate::config::ServiceConfiguration;
use crate::errors::{RpcError, ServiceError};
use crate::handler::{
    self, Args, Handler, Reply, Request, ResponseKind, async_handler, sync_handler,
    versions_or_wildcard,
};
use crate::listener::Running;
use crate::notification::{NotificationHandler, Notifier};
use crate::subject::{Layer, WILDCARD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    pub fn as_method(&self) -> http::Method {
        match self {
            HttpVerb::Get => http::Method::GET,
            HttpVerb::Post => http::Method::POST,
            HttpVerb::Put => http::Method::PUT,
            HttpVerb::Delete => http::Method::DELETE,
        }
    }
}

impl Display for HttpVerb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

impl TryFrom<&http::Method> for HttpVerb {
    type Error = RpcError;

    fn try_from(method: &http::Method) -> Result<Self, Self::Error> {
        if *method == http::Method::GET {
            Ok(HttpVerb::Get)
        } else if *method == http::Method::POST {
            Ok(HttpVerb::Post)
        } else if *method == http::Method::PUT {
            Ok(HttpVerb::Put)
        } else if *method == http::Method::DELETE {
            Ok(HttpVerb::Delete)
        } else {
            Err(RpcError::MethodNotAllowed(method.to_string()))
        }
    }
}

impl FromStr for HttpVerb {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = http::Method::from_bytes(s.to_ascii_uppercase().as_bytes())
            .map_err(|_| RpcError::MethodNotAllowed(s.to_string()))?;
        HttpVerb::try_from(&method)
    }
}

/// One API route: verb, path relative to the version, and handler
#[derive(Clone)]
pub struct Route {
    verb: HttpVerb,
    path: String,
    name: String,
    versions: Vec<String>,
    kind: ResponseKind,
    handler: Handler,
}

impl Route {
    fn with_handler(verb: HttpVerb, path: impl Into<String>, handler: Handler) -> Self {
        let path = path.into();
        Route {
            verb,
            name: path.clone(),
            path,
            versions: vec![WILDCARD.to_string()],
            kind: ResponseKind::default(),
            handler,
        }
    }

    pub fn new<F, Fut, R>(verb: HttpVerb, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        R: Into<Reply>,
    {
        Route::with_handler(verb, path, async_handler(f))
    }

    pub fn sync<F, R>(verb: HttpVerb, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Result<R, RpcError> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Route::with_handler(verb, path, sync_handler(f))
    }

    pub fn get<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        R: Into<Reply>,
    {
        Route::new(HttpVerb::Get, path, f)
    }

    pub fn post<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        R: Into<Reply>,
    {
        Route::new(HttpVerb::Post, path, f)
    }

    pub fn put<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        R: Into<Reply>,
    {
        Route::new(HttpVerb::Put, path, f)
    }

    pub fn delete<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        R: Into<Reply>,
    {
        Route::new(HttpVerb::Delete, path, f)
    }

    pub fn versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions = versions_or_wildcard(versions);
        self
    }

    /// Route name, defaults to the path
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn verb(&self) -> HttpVerb {
        self.verb
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn route_name(&self) -> &str {
        &self.name
    }

    pub fn response_kind(&self) -> ResponseKind {
        self.kind
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("versions", &self.versions)
            .finish()
    }
}

// path -> verb -> route
type PathTable = BTreeMap<String, HashMap<HttpVerb, Arc<Route>>>;

pub struct ApiBuilder {
    config: ServiceConfiguration,
    routes: Vec<Route>,
    notification_handlers: Vec<NotificationHandler>,
}

impl ApiBuilder {
    pub fn new(config: ServiceConfiguration) -> Self {
        ApiBuilder {
            config: config.with_layer(Layer::Middleware),
            routes: Vec::new(),
            notification_handlers: Vec::new(),
        }
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    pub fn notification_handler(mut self, handler: NotificationHandler) -> Self {
        self.notification_handlers.push(handler);
        self
    }

    pub fn build(self, bus: Arc<dyn Bus>) -> Result<Api, ServiceError> {
        self.config.validate()?;
        let policy = self.config.version_policy();

        // version -> path -> verb -> route, as declared
        let mut endpoints: HashMap<String, PathTable> = HashMap::new();
        endpoints.insert(WILDCARD.to_string(), PathTable::new());
        for route in self.routes {
            let route = Arc::new(route);
            for version in &route.versions {
                policy.check(version, self.config.versions())?;
                endpoints
                    .entry(version.clone())
                    .or_default()
                    .entry(route.path.clone())
                    .or_default()
                    .insert(route.verb, route.clone());
            }
        }

        // concrete paths: wildcard routes first, overridden by the
        // version specific ones
        let mut resolved = PathTable::new();
        for version in self.config.versions() {
            for table in [endpoints.get(WILDCARD), endpoints.get(version)]
                .into_iter()
                .flatten()
            {
                for (path, verbs) in table {
                    let full = format!("/{}{}", version, path);
                    let entry = resolved.entry(full).or_default();
                    for (verb, route) in verbs {
                        entry.insert(*verb, route.clone());
                    }
                }
            }
        }

        let notifier = Notifier::new(
            bus.clone(),
            self.config.layer(),
            self.config.name(),
            self.config.notification_version().unwrap_or_default(),
            self.config.notification_topics(),
        );

        Ok(Api {
            inner: Arc::new(ApiInner {
                config: self.config,
                resolved,
                notification_handlers: self.notification_handlers,
                notifier,
                bus,
                running: Mutex::new(None),
            }),
        })
    }
}

struct ApiInner {
    config: ServiceConfiguration,
    resolved: PathTable,
    notification_handlers: Vec<NotificationHandler>,
    notifier: Notifier,
    bus: Arc<dyn Bus>,
    running: Mutex<Option<Running>>,
}

/// An API gateway: versioned HTTP routes plus bus access
#[derive(Clone)]
pub struct Api {
    inner: Arc<ApiInner>,
}

impl Api {
    pub fn builder(config: ServiceConfiguration) -> ApiBuilder {
        ApiBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        self.inner.config.name()
    }

    pub fn config(&self) -> &ServiceConfiguration {
        &self.inner.config
    }

    /// Every concrete (verb, path) served, ordered by path then verb
    pub fn routes(&self) -> Vec<(HttpVerb, String)> {
        let mut routes: Vec<(HttpVerb, String)> = self
            .inner
            .resolved
            .iter()
            .flat_map(|(path, verbs)| verbs.keys().map(move |verb| (*verb, path.clone())))
            .collect();
        routes.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        routes
    }

    pub fn route(&self, verb: HttpVerb, path: &str) -> Result<Arc<Route>, RpcError> {
        let verbs = self
            .inner
            .resolved
            .get(path)
            .ok_or_else(|| RpcError::NotFound(path.to_string()))?;
        verbs
            .get(&verb)
            .cloned()
            .ok_or_else(|| RpcError::MethodNotAllowed(format!("{} {}", verb, path)))
    }

    /// Invoke the handler serving `verb path`
    pub async fn call(&self, verb: HttpVerb, path: &str, args: Args) -> Result<Reply, RpcError> {
        let route = self.route(verb, path)?;
        let version = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();

        debug!(%verb, %path, route = %route.route_name(), "calling route");
        let request = Request::http(self.name(), version, verb, path);
        handler::execute(&route.handler, request, args).await
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub async fn notify<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), RpcError> {
        self.inner.notifier.notify(topic, payload).await
    }

    /// Proxy to a backend service reachable on the bus
    pub fn remote_service(&self, name: &str, version: &str) -> RemoteService {
        RemoteService::new(
            self.inner.bus.clone(),
            Layer::Service,
            name,
            version,
            self.inner.config.call_timeout(),
        )
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Start the notification handlers
    pub async fn start(&self) -> Result<(), ServiceError> {
        if self.is_running() {
            return Err(ServiceError::AlreadyStarted(self.name().to_string()));
        }

        let mut running = Running::new();
        for handler in &self.inner.notification_handlers {
            if let Err(e) = running
                .listen_notifications(&self.inner.bus, self.name(), handler)
                .await
            {
                running.shutdown(&self.inner.bus).await;
                return Err(e.into());
            }
        }

        let lost = {
            let mut guard = self.inner.running.lock();
            if guard.is_some() {
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

        for (verb, path) in self.routes() {
            info!(%verb, %path, "route");
        }
        info!(api = %self.name(), "api started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ServiceError> {
        let running = self
            .inner
            .running
            .lock()
            .take()
            .ok_or_else(|| ServiceError::NotStarted(self.name().to_string()))?;

        running.shutdown(&self.inner.bus).await;
        info!(api = %self.name(), "api stopped");
        Ok(())
    }
}
