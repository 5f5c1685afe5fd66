// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Handler contract shared by RPC methods and API routes.
//!
//! A handler receives a [`Request`] describing where the call came from and
//! the decoded positional [`Args`], and produces something convertible into
//! a [`Reply`]. Handlers may be async ([`Method::new`]) or plain functions
//! ([`Method::sync`]); both are driven the same way by the dispatcher.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

use crate::api::HttpVerb;
use crate::errors::RpcError;
use crate::status;
use crate::subject::WILDCARD;

/// Extra headers returned by a handler. Only meaningful for HTTP fronts.
pub type Headers = Vec<(String, String)>;

/// Future returned by a registered handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, RpcError>> + Send>>;

/// Type-erased handler
pub type Handler = Arc<dyn Fn(Request, Args) -> HandlerFuture + Send + Sync>;

/// Where a call entered the process
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Rpc {
        subject: String,
        reply: Option<String>,
    },
    Http {
        verb: HttpVerb,
        path: String,
    },
}

/// Call context handed to every handler
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    origin: Origin,
    name: String,
    version: String,
}

impl Request {
    pub fn rpc(
        name: impl Into<String>,
        version: impl Into<String>,
        subject: impl Into<String>,
        reply: Option<String>,
    ) -> Self {
        Request {
            origin: Origin::Rpc {
                subject: subject.into(),
                reply,
            },
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn http(
        name: impl Into<String>,
        version: impl Into<String>,
        verb: HttpVerb,
        path: impl Into<String>,
    ) -> Self {
        Request {
            origin: Origin::Http {
                verb,
                path: path.into(),
            },
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Name of the service or API serving the call
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version the call was addressed to, as it appears on the wire
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Decoded positional arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(args: Vec<Value>) -> Self {
        Args(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Typed accessor. A missing or ill-typed argument is a bad request.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| RpcError::BadRequest(format!("missing argument {}", index)))?;

        T::deserialize(value)
            .map_err(|e| RpcError::BadRequest(format!("argument {}: {}", index, e)))
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(args: Vec<Value>) -> Self {
        Args(args)
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Args::default()
    }
}

/// Result of a handler: `result`, `(result, status)` or
/// `(result, status, headers)`
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub body: Value,
    pub status: u16,
    pub headers: Headers,
}

impl Reply {
    pub fn new(body: impl Into<Value>) -> Self {
        Reply {
            body: body.into(),
            status: status::OK,
            headers: Headers::new(),
        }
    }

    pub fn json<T: serde::Serialize>(body: &T) -> Result<Self, RpcError> {
        Ok(Reply::new(serde_json::to_value(body)?))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl From<Value> for Reply {
    fn from(body: Value) -> Self {
        Reply::new(body)
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Reply::new(body)
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Reply::new(body)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::new(Value::Null)
    }
}

impl From<(Value, u16)> for Reply {
    fn from((body, status): (Value, u16)) -> Self {
        Reply::new(body).with_status(status)
    }
}

impl From<(Value, u16, Headers)> for Reply {
    fn from((body, status, headers): (Value, u16, Headers)) -> Self {
        Reply {
            body,
            status,
            headers,
        }
    }
}

/// How an HTTP front should render the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Json,
    Text,
    Raw,
}

pub(crate) fn async_handler<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    R: Into<Reply>,
{
    let f = Arc::new(f);
    Arc::new(move |request: Request, args: Args| -> HandlerFuture {
        let f = f.clone();
        Box::pin(async move { f(request, args).await.map(Into::into) })
    })
}

pub(crate) fn sync_handler<F, R>(f: F) -> Handler
where
    F: Fn(Request, Args) -> Result<R, RpcError> + Send + Sync + 'static,
    R: Into<Reply>,
{
    let f = Arc::new(f);
    Arc::new(move |request: Request, args: Args| -> HandlerFuture {
        let f = f.clone();
        Box::pin(async move { f(request, args).map(Into::into) })
    })
}

/// Versions list with the wildcard default applied
pub(crate) fn versions_or_wildcard<I, S>(versions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let versions: Vec<String> = versions.into_iter().map(Into::into).collect();
    if versions.is_empty() {
        vec![WILDCARD.to_string()]
    } else {
        versions
    }
}

/// Descriptor of an RPC method: exposed name, target versions and handler
#[derive(Clone)]
pub struct Method {
    name: String,
    versions: Vec<String>,
    kind: ResponseKind,
    handler: Handler,
}

impl Method {
    pub fn new<F, Fut, R>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        R: Into<Reply>,
    {
        Method {
            name: name.into(),
            versions: vec![WILDCARD.to_string()],
            kind: ResponseKind::default(),
            handler: async_handler(f),
        }
    }

    pub fn sync<F, R>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Args) -> Result<R, RpcError> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Method {
            name: name.into(),
            versions: vec![WILDCARD.to_string()],
            kind: ResponseKind::default(),
            handler: sync_handler(f),
        }
    }

    /// Restrict the method to the given versions. An empty list means
    /// every version.
    pub fn versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions = versions_or_wildcard(versions);
        self
    }

    pub fn kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_versions(&self) -> &[String] {
        &self.versions
    }

    pub fn response_kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl Debug for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("versions", &self.versions)
            .field("kind", &self.kind)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a handler on its own task. A panic is reported as an internal error.
pub(crate) async fn execute(handler: &Handler, request: Request, args: Args) -> Result<Reply, RpcError> {
    let fut = handler(request, args);
    match tokio::spawn(fut.in_current_span()).await {
        Ok(res) => res,
        Err(e) if e.is_panic() => Err(RpcError::Internal(format!(
            "handler panicked: {}",
            panic_message(e.into_panic().as_ref())
        ))),
        Err(e) => Err(RpcError::internal(e)),
    }
}
