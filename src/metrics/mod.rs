//! Prometheus text exposition of the cached measurement.

use crate::measurement::{CacheSnapshot, MeasurementCache};
use std::fmt::Write;
use std::sync::Arc;

pub const NAMESPACE: &str = "grainfather";

/// Renders gauges from the [`MeasurementCache`] on each scrape.
///
/// Reading is a struct copy under a short lock; a scrape never waits on
/// upstream I/O. Stale values keep being served after the pipeline goes
/// down, with `grainfather_up 0`.
#[derive(Clone)]
pub struct MetricsExporter {
    cache: Arc<MeasurementCache>,
    version: &'static str,
}

impl MetricsExporter {
    pub fn new(cache: Arc<MeasurementCache>) -> Self {
        Self {
            cache,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Export metrics in Prometheus format
    pub fn render(&self) -> String {
        render_snapshot(&self.cache.snapshot(), self.version)
    }
}

fn gauge(output: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(output, "# HELP {}_{} {}", NAMESPACE, name, help);
    let _ = writeln!(output, "# TYPE {}_{} gauge", NAMESPACE, name);
    let _ = writeln!(output, "{}_{} {}", NAMESPACE, name, value);
}

fn bool_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Renders one snapshot. Measurement gauges are omitted until the first
/// measurement arrives.
pub fn render_snapshot(snapshot: &CacheSnapshot, version: &str) -> String {
    let mut output = String::new();

    let up = snapshot.reachable && snapshot.measurement.is_some();
    gauge(
        &mut output,
        "up",
        "Whether the ingestion pipeline currently has a live measurement",
        bool_value(up),
    );

    if let Some(m) = &snapshot.measurement {
        gauge(&mut output, "temperature", "Fermenter temperature", m.temperature);
        gauge(&mut output, "target", "Fermenter target", m.target);
        gauge(&mut output, "heating", "Heating element active", bool_value(m.heating));
        gauge(&mut output, "cooling", "Cooling active", bool_value(m.cooling));
        gauge(
            &mut output,
            "last_measurement_timestamp_seconds",
            "Unix time of the last measurement",
            m.observed_at.timestamp_millis() as f64 / 1000.0,
        );
    }

    let _ = writeln!(
        output,
        "# HELP {}_measurements_total Measurements received since startup",
        NAMESPACE
    );
    let _ = writeln!(output, "# TYPE {}_measurements_total counter", NAMESPACE);
    let _ = writeln!(output, "{}_measurements_total {}", NAMESPACE, snapshot.updates);

    let _ = writeln!(
        output,
        "# HELP {}_exporter_build_info Exporter build information",
        NAMESPACE
    );
    let _ = writeln!(output, "# TYPE {}_exporter_build_info gauge", NAMESPACE);
    let _ = writeln!(
        output,
        "{}_exporter_build_info{{version=\"{}\"}} 1",
        NAMESPACE, version
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use chrono::{TimeZone, Utc};

    fn measurement() -> Measurement {
        Measurement {
            temperature: 18.5,
            target: 19.0,
            heating: false,
            cooling: true,
            observed_at: Utc.timestamp_opt(1_770_000_000, 500_000_000).unwrap(),
        }
    }

    #[test]
    fn test_no_data_yet() {
        let out = render_snapshot(&CacheSnapshot::default(), "0.1.0");

        assert!(out.contains("grainfather_up 0\n"));
        assert!(!out.contains("grainfather_temperature"));
        assert!(!out.contains("grainfather_target"));
        assert!(out.contains("grainfather_measurements_total 0\n"));
        assert!(out.contains("grainfather_exporter_build_info{version=\"0.1.0\"} 1\n"));
    }

    #[test]
    fn test_live_measurement() {
        let snapshot = CacheSnapshot {
            measurement: Some(measurement()),
            reachable: true,
            updates: 3,
        };
        let out = render_snapshot(&snapshot, "0.1.0");

        assert!(out.contains("# TYPE grainfather_temperature gauge\n"));
        assert!(out.contains("grainfather_temperature 18.5\n"));
        assert!(out.contains("grainfather_target 19\n"));
        assert!(out.contains("grainfather_heating 0\n"));
        assert!(out.contains("grainfather_cooling 1\n"));
        assert!(out.contains("grainfather_last_measurement_timestamp_seconds 1770000000.5\n"));
        assert!(out.contains("grainfather_up 1\n"));
        assert!(out.contains("grainfather_measurements_total 3\n"));
    }

    #[test]
    fn test_stale_measurement_still_served_when_down() {
        let snapshot = CacheSnapshot {
            measurement: Some(measurement()),
            reachable: false,
            updates: 1,
        };
        let out = render_snapshot(&snapshot, "0.1.0");

        assert!(out.contains("grainfather_up 0\n"));
        assert!(out.contains("grainfather_temperature 18.5\n"));
    }

    #[test]
    fn test_exporter_reads_cache() {
        let cache = Arc::new(MeasurementCache::new());
        let exporter = MetricsExporter::new(Arc::clone(&cache));
        assert!(exporter.render().contains("grainfather_up 0\n"));

        cache.publish(measurement());
        let out = exporter.render();
        assert!(out.contains("grainfather_up 1\n"));
        assert!(out.contains(&format!(
            "grainfather_exporter_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )));
    }
}
