// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use mited_bus::BusError;
use mited_config::component::configuration::ConfigurationError;
use serde_json::Value;
use thiserror::Error;

use crate::status;

/// Errors produced while serving or calling a remote method.
///
/// Every variant maps to the status carried by a reply envelope. `Remote`
/// is the only one whose body is forwarded verbatim; the others are
/// reported with the reason phrase of their status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("method not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: Value },
    #[error("Call timeout for: \"{0}\"")]
    Timeout(String),
    #[error("invalid reply: {0}")]
    InvalidReply(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("unknown notification topic: {0}")]
    UnknownTopic(String),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

impl RpcError {
    /// Domain error carrying its own status and body
    pub fn remote(status: u16, body: impl Into<Value>) -> Self {
        RpcError::Remote {
            status,
            body: body.into(),
        }
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        RpcError::Internal(detail.to_string())
    }

    pub fn status(&self) -> u16 {
        match self {
            RpcError::NotFound(_) | RpcError::UnknownTopic(_) => status::NOT_FOUND,
            RpcError::BadRequest(_) => status::BAD_REQUEST,
            RpcError::MethodNotAllowed(_) => status::METHOD_NOT_ALLOWED,
            RpcError::Remote { status, .. } => *status,
            RpcError::Timeout(_) => status::GATEWAY_TIMEOUT,
            RpcError::Internal(_) | RpcError::InvalidReply(_) | RpcError::Bus(_) => {
                status::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Body sent back to a caller
    pub fn body(&self) -> Value {
        match self {
            RpcError::Remote { body, .. } => body.clone(),
            other => Value::from(status::reason_phrase(other.status())),
        }
    }

    /// Human readable message: the body of a remote error, the description
    /// of any other error
    pub fn message(&self) -> String {
        match self {
            RpcError::Remote {
                body: Value::String(s),
                ..
            } => s.clone(),
            RpcError::Remote { body, .. } => body.to_string(),
            other => other.to_string(),
        }
    }

    /// True for failures whose detail must stay on the server
    pub fn is_fault(&self) -> bool {
        self.status() == status::INTERNAL_SERVER_ERROR && !matches!(self, RpcError::Remote { .. })
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Internal(format!("serialization error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigurationError),
    #[error("Handler version {version} is not in parent versions {declared:?}")]
    InconsistentVersion {
        version: String,
        declared: Vec<String>,
    },
    #[error("bus error: {0}")]
    BusError(#[from] BusError),
    #[error("already started: {0}")]
    AlreadyStarted(String),
    #[error("not started: {0}")]
    NotStarted(String),
}
