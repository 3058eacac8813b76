//! Error taxonomy for the ingestion pipeline.
//!
//! Decode-level errors and device mismatches are expected noise and are
//! recovered inside [`EventStream::next`](crate::stream::EventStream::next).
//! Transport and auth errors propagate to the supervisor, which renews,
//! reconnects, and eventually degrades the reachability gauge.

use std::time::Duration;
use thiserror::Error;

/// Failures talking to an upstream HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, request timeout.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Upstream rejected the bearer token (HTTP 401).
    #[error("upstream rejected the bearer token")]
    Unauthorized,

    /// Any other non-success HTTP status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// Server closed the push subscription.
    #[error("subscription closed by server")]
    Closed,

    /// No bytes (not even keep-alives) arrived within the idle window.
    #[error("subscription idle for {0:?}")]
    Idle(Duration),

    /// Success status, but the body did not decode.
    #[error("malformed response body: {0}")]
    MalformedBody(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => {
                TransportError::Unauthorized
            }
            Some(status) => TransportError::Status(status.as_u16()),
            None => TransportError::ConnectFailed(err.to_string()),
        }
    }
}

/// Failures of the two-step login exchange.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("identity service rejected the username or password")]
    InvalidCredentials,

    #[error("no access token issued for this account")]
    NoTokenIssued,

    #[error("token lookup failed with status {0}")]
    TokenLookupFailed(u16),

    #[error("issued access token is already expired")]
    TokenExpired,

    #[error("malformed identity service response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the two decode layers of a pushed message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The outer `{data, ttl, published_at, coreid}` object did not parse.
    #[error("malformed event envelope: {0}")]
    MalformedEnvelope(String),

    /// The inner `{temp, target, heatStatus, coolStatus}` object did not parse.
    #[error("malformed measurement payload: {0}")]
    MalformedMeasurement(String),
}

/// Outcome of pulling one message off the event stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// Keep-alive or message without payload.
    #[error("empty message")]
    Empty,

    #[error("decode failed: {0}")]
    DecodeFailed(#[from] DecodeError),

    #[error("event from device {actual}, monitoring {expected}")]
    DeviceMismatch { expected: String, actual: String },

    /// Reconnect budget exhausted.
    #[error("gave up after {attempts} consecutive reconnect attempts")]
    Timeout { attempts: u32 },

    /// Credential renewal failed while reconnecting.
    #[error("credential renewal failed: {0}")]
    Auth(#[from] AuthError),
}

impl StreamError {
    /// True for per-message noise that the stream skips over.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            StreamError::Empty | StreamError::DecodeFailed(_) | StreamError::DeviceMismatch { .. }
        )
    }
}

/// Failures resolving the monitored device.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocateError {
    #[error("no device at index {index} ({available} devices on account)")]
    NoDevice { index: usize, available: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Anything that ends one supervised pipeline session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
