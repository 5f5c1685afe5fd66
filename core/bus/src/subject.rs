// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Subject grammar and token-wildcard matching.
//!
//! A subject is a non-empty list of tokens separated by `.`. Subscription
//! patterns may use `*` to match exactly one token and `>` as the last token
//! to match one or more trailing tokens.

use crate::errors::BusError;

pub const SEPARATOR: char = '.';
pub const WILDCARD: &str = "*";
pub const FULL_WILDCARD: &str = ">";

fn check_tokens(subject: &str) -> Result<(), BusError> {
    if subject.is_empty() {
        return Err(BusError::InvalidSubject("empty subject".to_string()));
    }

    for token in subject.split(SEPARATOR) {
        if token.is_empty() {
            return Err(BusError::InvalidSubject(format!(
                "empty token in subject {}",
                subject
            )));
        }
        if token.chars().any(char::is_whitespace) {
            return Err(BusError::InvalidSubject(format!(
                "whitespace in subject {}",
                subject
            )));
        }
    }

    Ok(())
}

/// Validate a subject used for publishing: no wildcards allowed
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    check_tokens(subject)?;

    if subject
        .split(SEPARATOR)
        .any(|t| t == WILDCARD || t == FULL_WILDCARD)
    {
        return Err(BusError::InvalidSubject(format!(
            "wildcards are not allowed when publishing: {}",
            subject
        )));
    }

    Ok(())
}

/// Validate a subscription pattern
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    check_tokens(pattern)?;

    let tokens: Vec<&str> = pattern.split(SEPARATOR).collect();
    if let Some(pos) = tokens.iter().position(|t| *t == FULL_WILDCARD)
        && pos != tokens.len() - 1
    {
        return Err(BusError::InvalidSubject(format!(
            "'>' must be the last token: {}",
            pattern
        )));
    }

    Ok(())
}

/// Check whether a concrete subject matches a subscription pattern
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split(SEPARATOR);
    let mut subject_tokens = subject.split(SEPARATOR);

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (None, None) => return true,
            (Some(FULL_WILDCARD), Some(_)) => return true,
            (Some(WILDCARD), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            _ => return false,
        }
    }
}
