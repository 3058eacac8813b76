//! Push subscription over HTTP Server-Sent Events.

use super::sse::{SseEvent, SseParser};
use super::{EventFeed, EventSource};
use crate::credentials::Credential;
use crate::device::check_response_status;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Opens `GET {base_url}/devices/{id}/events` with the bearer token in the
/// `Authorization` header.
///
/// The client must not carry an overall request timeout: the response body
/// is the subscription and stays open indefinitely. Waiting for the response
/// head is bounded by `response_timeout` (defaults to `idle_timeout`), and
/// body liveness by `idle_timeout`.
pub struct HttpEventSource {
    http_client: Client,
    base_url: String,
    idle_timeout: Duration,
    response_timeout: Duration,
}

impl HttpEventSource {
    pub fn new(http_client: Client, base_url: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            idle_timeout,
            response_timeout: idle_timeout,
        }
    }

    /// Overrides how long to wait for the response status and headers.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn subscribe(
        &self,
        credential: &Credential,
        device_id: &str,
    ) -> Result<Box<dyn EventFeed>, TransportError> {
        let url = format!("{}/devices/{}/events", self.base_url, device_id);
        debug!(url = %url, "Subscribing to event stream");

        let request = self
            .http_client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .bearer_auth(&credential.bearer_token)
            .send();

        let response = tokio::time::timeout(self.response_timeout, request)
            .await
            .map_err(|_| {
                TransportError::ConnectFailed(format!(
                    "no response within {:?}",
                    self.response_timeout
                ))
            })??;

        check_response_status(&response)?;

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Box::new(HttpEventFeed {
            chunks,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            idle_timeout: self.idle_timeout,
        }))
    }
}

/// One open SSE response body.
struct HttpEventFeed {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    idle_timeout: Duration,
}

#[async_trait]
impl EventFeed for HttpEventFeed {
    async fn next_message(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event.data);
            }

            // Any bytes, keep-alive comments included, reset the idle window.
            match tokio::time::timeout(self.idle_timeout, self.chunks.next()).await {
                Err(_) => return Err(TransportError::Idle(self.idle_timeout)),
                Ok(None) => return Err(TransportError::Closed),
                Ok(Some(Err(e))) => return Err(TransportError::ConnectFailed(e.to_string())),
                Ok(Some(Ok(bytes))) => {
                    trace!(bytes = bytes.len(), "Event stream chunk");
                    self.pending.extend(self.parser.feed(&bytes));
                }
            }
        }
    }
}
