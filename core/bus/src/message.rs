// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;

/// A message delivered by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// concrete subject the message was published to
    pub subject: String,
    /// subject the receiver should answer to, if any
    pub reply: Option<String>,
    /// opaque payload
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Message {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        Message {
            reply: Some(reply.into()),
            ..self
        }
    }
}
