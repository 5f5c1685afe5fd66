// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Reply statuses, loosely derived from HTTP.

use http::StatusCode;

pub const OK: u16 = 200;
pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const METHOD_NOT_ALLOWED: u16 = 405;
pub const INTERNAL_SERVER_ERROR: u16 = 500;
pub const GATEWAY_TIMEOUT: u16 = 504;

/// Canonical reason phrase of a status, "Unknown" when there is none
pub fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(OK), "OK");
        assert_eq!(reason_phrase(BAD_REQUEST), "Bad Request");
        assert_eq!(reason_phrase(NOT_FOUND), "Not Found");
        assert_eq!(reason_phrase(INTERNAL_SERVER_ERROR), "Internal Server Error");
        assert_eq!(reason_phrase(GATEWAY_TIMEOUT), "Gateway Timeout");
        assert_eq!(reason_phrase(123), "Unknown");
        assert_eq!(reason_phrase(7), "Unknown");
    }
}
