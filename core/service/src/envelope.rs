// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The `{"status": <int>, "body": <any>}` wrapper carried by every reply.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;
use crate::status;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: u16,
    pub body: Value,
}

impl Envelope {
    pub fn new(status: u16, body: impl Into<Value>) -> Self {
        Envelope {
            status,
            body: body.into(),
        }
    }

    /// End-of-stream marker: an envelope whose body is the empty string
    pub fn terminator(status: u16) -> Self {
        Envelope::new(status, "")
    }

    pub fn is_ok(&self) -> bool {
        self.status == status::OK
    }

    pub fn is_terminator(&self) -> bool {
        matches!(&self.body, Value::String(s) if s.is_empty())
    }

    pub fn encode(&self) -> Result<Bytes, RpcError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(buf).map_err(|e| RpcError::InvalidReply(e.to_string()))
    }
}

impl From<&RpcError> for Envelope {
    fn from(err: &RpcError) -> Self {
        Envelope::new(err.status(), err.body())
    }
}

fn with_reason(status: u16) -> Envelope {
    Envelope::new(status, status::reason_phrase(status))
}

pub fn ok(body: impl Into<Value>) -> Envelope {
    Envelope::new(status::OK, body)
}

pub fn bad_request() -> Envelope {
    with_reason(status::BAD_REQUEST)
}

pub fn not_found() -> Envelope {
    with_reason(status::NOT_FOUND)
}

pub fn method_not_allowed() -> Envelope {
    with_reason(status::METHOD_NOT_ALLOWED)
}

pub fn internal_server_error() -> Envelope {
    with_reason(status::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_format() {
        let env = ok(json!({"foo": "bar"}));
        let encoded = env.encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(raw, json!({"status": 200, "body": {"foo": "bar"}}));

        let decoded = Envelope::decode(br#"{"body": "FOO", "status": 123}"#).unwrap();
        assert_eq!(decoded, Envelope::new(123, "FOO"));
        assert!(!decoded.is_ok());
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(
            Envelope::decode(b"not json"),
            Err(RpcError::InvalidReply(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"status": "ok"}"#),
            Err(RpcError::InvalidReply(_))
        ));
    }

    #[test]
    fn test_terminator() {
        assert!(Envelope::terminator(200).is_terminator());
        assert!(!ok("\"\"").is_terminator());
        assert!(!ok(Value::Null).is_terminator());
    }

    #[test]
    fn test_helpers() {
        assert_eq!(bad_request(), Envelope::new(400, "Bad Request"));
        assert_eq!(not_found(), Envelope::new(404, "Not Found"));
        assert_eq!(method_not_allowed(), Envelope::new(405, "Method Not Allowed"));
        assert_eq!(
            internal_server_error(),
            Envelope::new(500, "Internal Server Error")
        );
        assert_eq!(
            Envelope::from(&RpcError::remote(123, "FOO")),
            Envelope::new(123, "FOO")
        );
    }
}
