//! Background ingestion loop.
//!
//! One supervised task drives
//! `CredentialStore → DeviceLocator → EventStream → MeasurementCache`
//! for the lifetime of the process. A failed session degrades the
//! reachability gauge, waits `restart_delay`, and starts over with a full
//! re-authentication. The task never exits on its own.

use crate::credentials::{Credential, CredentialStore};
use crate::device::{Device, DeviceLocator, DeviceSelection};
use crate::error::{PipelineError, StreamError};
use crate::measurement::MeasurementCache;
use crate::stream::{EventSource, EventStream, ReconnectPolicy};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Retry delay after a failed high-activity trigger.
const HIGH_ACTIVITY_RETRY: Duration = Duration::from_secs(60);

/// Process-wide pipeline state shared with the HTTP handlers.
pub struct PipelineState {
    credentials: Arc<CredentialStore>,
    cache: Arc<MeasurementCache>,
    device: Mutex<Option<Device>>,
    ready: AtomicBool,
    restarts: AtomicU64,
}

impl PipelineState {
    pub fn new(credentials: Arc<CredentialStore>, cache: Arc<MeasurementCache>) -> Self {
        Self {
            credentials,
            cache,
            device: Mutex::new(None),
            ready: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn cache(&self) -> &Arc<MeasurementCache> {
        &self.cache
    }

    /// The monitored device, once resolved.
    pub fn device(&self) -> Option<Device> {
        self.device_slot().clone()
    }

    fn set_device(&self, device: Device) {
        *self.device_slot() = Some(device);
    }

    /// Marks the pipeline initialized; `/ready` reports 200 from then on.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// True once a credential and the device have been resolved.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of times the supervisor restarted a failed session.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    fn device_slot(&self) -> std::sync::MutexGuard<'_, Option<Device>> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Tunables for the supervisor.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub device_selection: DeviceSelection,
    /// High-activity window requested from the device; zero disables the trigger
    pub high_activity_window: Duration,
    /// Pause between a failed session and the next one
    pub restart_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            device_selection: DeviceSelection::default(),
            high_activity_window: Duration::from_secs(120),
            restart_delay: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Supervises the ingestion loop.
pub struct Supervisor {
    state: Arc<PipelineState>,
    locator: Arc<DeviceLocator>,
    events: Arc<dyn EventSource>,
    settings: PipelineSettings,
}

impl Supervisor {
    pub fn new(
        state: Arc<PipelineState>,
        locator: Arc<DeviceLocator>,
        events: Arc<dyn EventSource>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            state,
            locator,
            events,
            settings,
        }
    }

    /// Starts the supervised loop (non-blocking).
    ///
    /// Returns a JoinHandle that can be aborted at shutdown.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs sessions forever, restarting after each failure.
    pub async fn run(self) {
        info!("Starting ingestion pipeline");
        let mut session: u64 = 0;

        loop {
            let err = match self.run_session(session).await {
                Ok(never) => match never {},
                Err(e) => e,
            };

            match &err {
                PipelineError::Stream(StreamError::Timeout { attempts }) => warn!(
                    attempts = *attempts,
                    "Event stream reconnect budget exhausted, restarting pipeline"
                ),
                other => error!(error = %other, "Pipeline session failed, restarting"),
            }

            self.state.cache.mark_unreachable();
            self.state.restarts.fetch_add(1, Ordering::Relaxed);
            session += 1;

            debug!(delay_secs = self.settings.restart_delay.as_secs_f64(), "Waiting before restart");
            tokio::time::sleep(self.settings.restart_delay).await;
        }
    }

    /// One authenticated session. Only returns on failure.
    async fn run_session(&self, session: u64) -> Result<Infallible, PipelineError> {
        let credentials = &self.state.credentials;

        // First session may reuse a seeded credential; restarts always re-authenticate.
        let credential = if session == 0 {
            credentials.valid().await?
        } else {
            credentials.renew().await?
        };

        let device = self.resolve_device(&credential).await?;
        self.state.mark_ready();

        let mut stream = EventStream::new(
            Arc::clone(&self.events),
            Arc::clone(credentials),
            device.clone(),
            self.settings.reconnect.clone(),
        );
        let mut high_activity_until: Option<Instant> = None;

        loop {
            self.keep_high_activity(&device, &mut high_activity_until).await;

            // A quiet device must not let the window lapse: wake at the deadline
            // and re-trigger. Dropping `next()` only loses an unfinished wait.
            let measurement = match high_activity_until {
                Some(deadline) => tokio::select! {
                    result = stream.next() => result?,
                    _ = tokio::time::sleep_until(deadline) => continue,
                },
                None => stream.next().await?,
            };
            info!(
                device_id = %device.id,
                temperature = measurement.temperature,
                target = measurement.target,
                heating = measurement.heating,
                cooling = measurement.cooling,
                "Measurement received"
            );
            self.state.cache.publish(measurement);
        }
    }

    /// Looks the device up once; later sessions reuse it.
    async fn resolve_device(&self, credential: &Credential) -> Result<Device, PipelineError> {
        if let Some(device) = self.state.device() {
            return Ok(device);
        }
        let device = self
            .locator
            .locate(credential, self.settings.device_selection)
            .await?;
        self.state.set_device(device.clone());
        Ok(device)
    }

    /// Re-triggers high-activity mode when the previous window has elapsed.
    ///
    /// Failures are logged and never abort the session.
    async fn keep_high_activity(&self, device: &Device, until: &mut Option<Instant>) {
        let window = self.settings.high_activity_window;
        if window.is_zero() {
            return;
        }
        let now = Instant::now();
        if matches!(until, Some(deadline) if *deadline > now) {
            return;
        }

        let result = match self.state.credentials.valid().await {
            Ok(credential) => {
                self.locator
                    .start_high_activity_mode(&credential, &device.id, window)
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                *until = Some(now + window);
            }
            Err(reason) => {
                warn!(device_id = %device.id, error = %reason, "Failed to start high-activity mode");
                *until = Some(now + HIGH_ACTIVITY_RETRY);
            }
        }
    }
}
