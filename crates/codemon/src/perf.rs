// perf.rs - Timing instrumentation for build passes and watcher dispatch
//
// Controlled via the CODEMON_PERF environment variable.
//
// Usage:
//   CODEMON_PERF=1 codemon          # Log phase durations
//   CODEMON_PERF=verbose codemon    # Also warn when a phase exceeds its threshold

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static PERF_ENABLED: OnceLock<bool> = OnceLock::new();

static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

/// Check if performance timing is enabled
pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("CODEMON_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("CODEMON_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// ```
/// use codemon::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("build:probe");
/// // ... do work ...
/// ```
pub struct TimingGuard {
    start: Instant,
    name: &'static str,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: None,
            enabled: is_enabled(),
        }
    }

    /// Create a timing guard that warns (in verbose mode) past `threshold_ms`
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: Some(threshold_ms),
            enabled: is_enabled(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consume the guard without logging and return the duration
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        std::mem::forget(self);
        elapsed
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Aggregated timings for one build pass
#[derive(Debug, Default, Clone)]
pub struct BuildMetrics {
    /// Time spent indexing and filtering tests
    pub index_duration: Option<Duration>,
    /// Time spent probing all tests
    pub probe_duration: Option<Duration>,
    /// Time spent encoding and writing the map
    pub persist_duration: Option<Duration>,
    /// Slowest single probe
    pub slowest_probe: Option<(String, Duration)>,
}

impl BuildMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the slowest probe seen so far
    pub fn record_probe(&mut self, test: &str, duration: Duration) {
        let slower = self
            .slowest_probe
            .as_ref()
            .map_or(true, |(_, slowest)| duration > *slowest);
        if slower {
            self.slowest_probe = Some((test.to_string(), duration));
        }
    }

    pub fn log_summary(&self) {
        if !is_enabled() {
            return;
        }

        log::info!("[PERF] === Build Pass Summary ===");
        if let Some(d) = self.index_duration {
            log::info!("[PERF] Index: {:?}", d);
        }
        if let Some(d) = self.probe_duration {
            log::info!("[PERF] Probe: {:?}", d);
        }
        if let Some((test, d)) = &self.slowest_probe {
            log::info!("[PERF] Slowest probe: {} ({:?})", test, d);
        }
        if let Some(d) = self.persist_duration {
            log::info!("[PERF] Persist: {:?}", d);
        }
    }
}
