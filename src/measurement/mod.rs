// Fermenter readings and the single-slot cache shared with the metrics endpoint

use chrono::{DateTime, Utc};
use serde::Serialize;

mod cache;

pub use cache::{CacheSnapshot, MeasurementCache};

/// Decoded state of the monitored controller at one point in time.
///
/// Temperature and target are only meaningful together; the struct is
/// `Copy` and always replaced as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Measurement {
    /// Current fermenter temperature
    pub temperature: f64,

    /// Target (setpoint) temperature
    pub target: f64,

    /// Heating element active
    pub heating: bool,

    /// Cooling active
    pub cooling: bool,

    /// Publish time reported by the relay, or local receive time
    pub observed_at: DateTime<Utc>,
}
