//! Whether a failed request is worth repeating on a later run.
//!
//! Timeouts, refused connections, body IO and 5xx answers are transient.
//! Every 4xx (429 included), malformed payloads and request construction
//! problems are permanent.

use reqwest::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// A later run may succeed
    Transient,
    Permanent,
}

/// Classify a reqwest failure.
pub fn classify_error(error: &reqwest::Error) -> RetryDecision {
    if let Some(status) = error.status() {
        return classify_status(status);
    }

    let decision = if error.is_builder() || error.is_decode() || error.is_redirect() {
        RetryDecision::Permanent
    } else {
        // timeouts, connect failures and IO while streaming the body
        RetryDecision::Transient
    };
    tracing::debug!("Request failed before a status ({:?}): {}", decision, error);
    decision
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: StatusCode) -> RetryDecision {
    let decision = if status.is_server_error() {
        RetryDecision::Transient
    } else {
        RetryDecision::Permanent
    };
    tracing::debug!("HTTP {} classified as {:?}", status.as_u16(), decision);
    decision
}
