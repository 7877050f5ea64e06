//! Privilege elevation metrics (§4.4 "Metrics:").
//!
//! Atomics-backed counters so the metrics can be read from any thread
//! without locking the elevation mutex itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point-in-time read of [`PrivilegeMetrics`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub elevated_nanos_total: u64,
    pub last_error: Option<String>,
}

/// Global counters for every `with_privileges` call, regardless of
/// `OperationTag`.
pub struct PrivilegeMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    elevated_nanos_total: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Default for PrivilegeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegeMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            elevated_nanos_total: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, elevated_for: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.elevated_nanos_total
            .fetch_add(elevated_for.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, error: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elevated_nanos_total: self.elevated_nanos_total.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|g| g.clone()),
        }
    }
}
