use crate::auth::GRAINFATHER_BASE_URL;
use crate::device::{DeviceSelection, PARTICLE_BASE_URL};
use crate::pipeline::PipelineSettings;
use crate::stream::ReconnectPolicy;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = concat!("grainfather-exporter/", env!("CARGO_PKG_VERSION"));

/// Complete exporter configuration
///
/// Secrets (username, password, pre-issued token) are not read from the
/// file; they come from the command line or environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub grainfather: GrainfatherConfig,
    #[serde(default)]
    pub particle: ParticleConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Identity service
#[derive(Debug, Clone, Deserialize)]
pub struct GrainfatherConfig {
    #[serde(default = "default_grainfather_base_url")]
    pub base_url: String,
}

fn default_grainfather_base_url() -> String {
    GRAINFATHER_BASE_URL.to_string()
}

impl Default for GrainfatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_grainfather_base_url(),
        }
    }
}

/// Device relay API
#[derive(Debug, Clone, Deserialize)]
pub struct ParticleConfig {
    #[serde(default = "default_particle_base_url")]
    pub base_url: String,
}

fn default_particle_base_url() -> String {
    PARTICLE_BASE_URL.to_string()
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            base_url: default_particle_base_url(),
        }
    }
}

/// Outbound HTTP deadlines
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whole-request deadline for REST calls (login, token lookup, devices)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect deadline, also applied to the event subscription
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Client for short request/response calls.
    pub fn rest_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()
    }

    /// Client for the push subscription: no overall deadline, the body never ends.
    /// The subscriber bounds the wait for the response head itself.
    pub fn stream_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()
    }
}

/// Event subscription liveness and reconnect budget
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// No bytes for this long counts as a disconnect (3 missed 30 s keep-alives)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_window_secs")]
    pub reconnect_window_secs: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_reconnect_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,
}

fn default_idle_timeout_secs() -> u64 {
    90
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_window_secs() -> u64 {
    60
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_max_ms() -> u64 {
    30_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_window_secs: default_reconnect_window_secs(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            reconnect_backoff_max_ms: default_reconnect_backoff_max_ms(),
        }
    }
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            window: Duration::from_secs(self.reconnect_window_secs),
            initial_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            max_backoff: Duration::from_millis(self.reconnect_backoff_max_ms),
        }
    }
}

/// Monitored device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Position in the account's device listing (single-device accounts use 0)
    #[serde(default)]
    pub index: usize,
    /// High-activity window to request; 0 disables the trigger
    #[serde(default = "default_high_activity_minutes")]
    pub high_activity_minutes: u32,
}

fn default_high_activity_minutes() -> u32 {
    2
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            index: 0,
            high_activity_minutes: default_high_activity_minutes(),
        }
    }
}

/// Supervisor behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    /// Renew the credential this long before it expires
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,
}

fn default_restart_delay_secs() -> u64 {
    30
}

fn default_refresh_margin_secs() -> i64 {
    90
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            restart_delay_secs: default_restart_delay_secs(),
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

/// Metrics endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:9400".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl ExporterConfig {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            device_selection: DeviceSelection {
                index: self.device.index,
            },
            high_activity_window: Duration::from_secs(u64::from(self.device.high_activity_minutes) * 60),
            restart_delay: Duration::from_secs(self.pipeline.restart_delay_secs),
            reconnect: self.stream.reconnect_policy(),
        }
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pipeline.refresh_margin_secs)
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ExporterConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ExporterConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
