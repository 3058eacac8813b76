//! Long-lived push subscription filtered to the monitored device.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──open──▶ Subscribing ──ok──▶ Streaming ──message──▶ Decoding
//!      ▲                      │                  │                      │
//!      └─────── error ────────┘◀── disconnect ───┘◀──── skip / yield ────┘
//! ```
//!
//! [`EventStream::next`] hides disconnects: it reconnects with the current
//! credential (renewing it first when expired) until the reconnect budget
//! is spent, then surfaces [`StreamError::Timeout`].

use crate::credentials::{Credential, CredentialStore};
use crate::device::Device;
use crate::error::{DecodeError, StreamError, TransportError};
use crate::measurement::Measurement;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

mod envelope;
mod http;
pub mod sse;


pub use envelope::{decode_envelope, decode_measurement, decode_message, encode_message, RawEvent};
pub use http::HttpEventSource;

/// Opens push subscriptions.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens a subscription for `device_id` authenticated with `credential`.
    async fn subscribe(
        &self,
        credential: &Credential,
        device_id: &str,
    ) -> Result<Box<dyn EventFeed>, TransportError>;
}

/// One open subscription yielding raw message data.
#[async_trait]
pub trait EventFeed: Send {
    /// Waits for the next message. Any error ends the subscription.
    async fn next_message(&mut self) -> Result<String, TransportError>;
}

/// Where the stream is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Subscribing,
    Streaming,
    Decoding,
}

/// Bounds on consecutive reconnect attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts allowed within `window` before giving up
    pub max_attempts: u32,
    /// Attempts older than this no longer count
    pub window: Duration,
    /// Delay before the second attempt, doubled for each further one
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt + 1` (no delay before the first).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Decoded measurements from one device's push subscription.
pub struct EventStream {
    source: Arc<dyn EventSource>,
    credentials: Arc<CredentialStore>,
    device: Device,
    policy: ReconnectPolicy,
    state: StreamState,
    feed: Option<Box<dyn EventFeed>>,
    attempts: u32,
    window_start: Option<Instant>,
    force_renew: bool,
}

impl EventStream {
    /// Creates a disconnected stream. The first [`next`](Self::next) subscribes.
    pub fn new(
        source: Arc<dyn EventSource>,
        credentials: Arc<CredentialStore>,
        device: Device,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            source,
            credentials,
            device,
            policy,
            state: StreamState::Disconnected,
            feed: None,
            attempts: 0,
            window_start: None,
            force_renew: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Opens a subscription with `credential`, replacing any open one.
    pub async fn open(&mut self, credential: &Credential) -> Result<(), TransportError> {
        self.close();
        self.state = StreamState::Subscribing;

        match self.source.subscribe(credential, &self.device.id).await {
            Ok(feed) => {
                self.feed = Some(feed);
                self.state = StreamState::Streaming;
                info!(device_id = %self.device.id, "Event stream subscribed");
                Ok(())
            }
            Err(e) => {
                self.state = StreamState::Disconnected;
                Err(e)
            }
        }
    }

    /// Drops the current subscription, if any.
    pub fn close(&mut self) {
        self.feed = None;
        self.state = StreamState::Disconnected;
    }

    /// Waits for the next measurement from the monitored device.
    ///
    /// Empty messages, undecodable messages and events from other devices
    /// are skipped. Disconnects trigger a reconnect.
    ///
    /// # Errors
    /// - `Timeout` when the reconnect budget is exhausted
    /// - `Auth` when the credential could not be renewed
    pub async fn next(&mut self) -> Result<Measurement, StreamError> {
        loop {
            let Some(feed) = self.feed.as_mut() else {
                self.reconnect().await?;
                continue;
            };

            match feed.next_message().await {
                Ok(data) => {
                    self.attempts = 0;
                    self.window_start = None;

                    self.state = StreamState::Decoding;
                    let outcome = envelope::decode_message(&data, &self.device.id);
                    self.state = StreamState::Streaming;

                    match outcome {
                        Ok(measurement) => return Ok(measurement),
                        Err(e) => self.log_skip(&e),
                    }
                }
                Err(e) => {
                    warn!(device_id = %self.device.id, error = %e, "Event stream disconnected");
                    if e == TransportError::Unauthorized {
                        self.force_renew = true;
                    }
                    self.close();
                }
            }
        }
    }

    /// Re-opens the subscription within the reconnect budget.
    async fn reconnect(&mut self) -> Result<(), StreamError> {
        loop {
            let now = Instant::now();
            match self.window_start {
                Some(start) if now.duration_since(start) <= self.policy.window => {}
                _ => {
                    self.window_start = Some(now);
                    self.attempts = 0;
                }
            }

            if self.attempts >= self.policy.max_attempts {
                let attempts = self.attempts;
                self.attempts = 0;
                self.window_start = None;
                return Err(StreamError::Timeout { attempts });
            }

            let delay = self.policy.backoff(self.attempts);
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before reconnect");
                tokio::time::sleep(delay).await;
            }
            self.attempts += 1;

            let credential = if std::mem::take(&mut self.force_renew) {
                self.credentials.renew().await?
            } else {
                self.credentials.valid().await?
            };

            match self.open(&credential).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        device_id = %self.device.id,
                        attempt = self.attempts,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Event stream subscribe failed"
                    );
                    if e == TransportError::Unauthorized {
                        self.force_renew = true;
                    }
                }
            }
        }
    }

    fn log_skip(&self, err: &StreamError) {
        match err {
            StreamError::DecodeFailed(DecodeError::MalformedMeasurement(reason)) => {
                warn!(device_id = %self.device.id, reason = %reason, "Skipping undecodable measurement")
            }
            StreamError::DeviceMismatch { actual, .. } => {
                trace!(origin = %actual, "Skipping event from other device")
            }
            other => debug!(reason = %other, "Skipping message"),
        }
    }
}
