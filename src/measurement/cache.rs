use super::Measurement;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Everything a scrape needs, copied out under one read lock.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheSnapshot {
    /// Last published measurement, `None` until the first one arrives
    pub measurement: Option<Measurement>,

    /// False before the first measurement and after the pipeline gives up
    pub reachable: bool,

    /// Number of measurements published since startup
    pub updates: u64,
}

/// Last known measurement plus a liveness flag.
///
/// One writer (the ingestion loop) and any number of readers (scrapes).
/// Critical sections are a struct copy, so readers never wait on network I/O
/// and never see a half-written measurement.
#[derive(Debug, Default)]
pub struct MeasurementCache {
    inner: RwLock<CacheSnapshot>,
}

impl MeasurementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached measurement and marks the pipeline reachable.
    pub fn publish(&self, measurement: Measurement) {
        let mut slot = self.write();
        slot.measurement = Some(measurement);
        slot.reachable = true;
        slot.updates += 1;
    }

    /// Returns the last published measurement, or `None` if there is no data yet.
    pub fn read(&self) -> Option<Measurement> {
        self.read_lock().measurement
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        *self.read_lock()
    }

    /// Degrades reachability while keeping the stale measurement available.
    pub fn mark_unreachable(&self) {
        self.write().reachable = false;
    }

    pub fn is_reachable(&self) -> bool {
        self.read_lock().reachable
    }

    // A panicking writer cannot leave a Copy snapshot torn, so poisoning is ignored.
    fn read_lock(&self) -> RwLockReadGuard<'_, CacheSnapshot> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheSnapshot> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn measurement(temperature: f64, target: f64) -> Measurement {
        Measurement {
            temperature,
            target,
            heating: false,
            cooling: true,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_cache_has_no_data() {
        let cache = MeasurementCache::new();
        assert_eq!(cache.read(), None);

        let snap = cache.snapshot();
        assert!(snap.measurement.is_none());
        assert!(!snap.reachable);
        assert_eq!(snap.updates, 0);
    }

    #[test]
    fn test_publish_then_read() {
        let cache = MeasurementCache::new();
        let m = measurement(18.5, 19.0);
        cache.publish(m);

        assert_eq!(cache.read(), Some(m));
        assert!(cache.is_reachable());
        assert_eq!(cache.snapshot().updates, 1);
    }

    #[test]
    fn test_latest_publish_wins() {
        let cache = MeasurementCache::new();
        cache.publish(measurement(18.0, 19.0));
        cache.publish(measurement(18.7, 19.0));

        assert_eq!(cache.read().unwrap().temperature, 18.7);
        assert_eq!(cache.snapshot().updates, 2);
    }

    #[test]
    fn test_unreachable_keeps_stale_value() {
        let cache = MeasurementCache::new();
        let m = measurement(18.5, 19.0);
        cache.publish(m);
        cache.mark_unreachable();

        let snap = cache.snapshot();
        assert_eq!(snap.measurement, Some(m));
        assert!(!snap.reachable);

        cache.publish(measurement(18.6, 19.0));
        assert!(cache.is_reachable());
    }

    #[test]
    fn test_concurrent_reads_never_torn() {
        let cache = Arc::new(MeasurementCache::new());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut seen = 0u64;
                    while !done.load(Ordering::Relaxed) {
                        if let Some(m) = cache.read() {
                            // Writer always publishes target = temperature + 1
                            assert_eq!(m.target, m.temperature + 1.0);
                            seen += 1;
                        }
                    }
                    seen
                })
            })
            .collect();

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..10_000 {
                    let t = i as f64;
                    cache.publish(measurement(t, t + 1.0));
                }
            })
        };

        writer.join().unwrap();
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        let last = cache.read().unwrap();
        assert_eq!(last.temperature, 9999.0);
        assert_eq!(cache.snapshot().updates, 10_000);
    }
}
