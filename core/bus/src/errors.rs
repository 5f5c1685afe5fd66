// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::SubscriptionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
    #[error("invalid queue group: {0}")]
    InvalidQueue(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),
    #[error("request timeout on subject {0}")]
    Timeout(String),
    #[error("subscription closed")]
    Closed,
}
