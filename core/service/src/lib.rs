// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Versioned RPC services over a publish/subscribe bus.
//!
//! Services expose methods on `rpc.<layer>.<name>.<version>.<method>`
//! subjects and answer with chunked `{status, body}` reply streams. Remote
//! methods are called through [`RemoteService`] proxies, and services talk
//! to each other asynchronously through notifications.

pub mod api;
pub mod chunk;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod envelope;
pub mod errors;
pub mod handler;
mod listener;
pub mod notification;
pub mod service;
pub mod status;
pub mod subject;

pub use api::{Api, ApiBuilder, HttpVerb, Route};
pub use client::{MethodProxy, RemoteService};
pub use config::{ClientConfiguration, ServiceConfiguration};
pub use endpoints::{EndpointTable, VersionPolicy};
pub use envelope::Envelope;
pub use errors::{RpcError, ServiceError};
pub use handler::{Args, Headers, Method, Origin, Reply, Request, ResponseKind};
pub use notification::{
    NotificationHandler, NotificationPattern, Notifier, Segment, TopicPublisher, VersionPattern,
};
pub use service::{Dispatcher, Service, ServiceBuilder};
pub use subject::Layer;
