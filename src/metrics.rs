//! Run metrics.
//!
//! A [`RunTimer`] marks the phases of one `run` call (compile,
//! instantiate, execute) and produces a [`RunMetrics`] record that the
//! runner logs and keeps for inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Metrics of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,

    /// Compilation time in microseconds (0 on cache hit)
    pub compile_time_us: u64,

    /// Linking and instantiation time in microseconds
    pub instantiate_time_us: u64,

    /// Time spent in entry points in microseconds
    pub execute_time_us: u64,

    /// Whether the module cache was hit
    pub cache_hit: bool,

    /// Exit code, when the run ended with the exit signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl RunMetrics {
    /// Total run time
    pub fn total(&self) -> Duration {
        Duration::from_micros(self.compile_time_us + self.instantiate_time_us + self.execute_time_us)
    }
}

/// Timer for the phases of a run
pub struct RunTimer {
    started_at: DateTime<Utc>,
    start: Instant,
    compiled_at: Option<Instant>,
    instantiated_at: Option<Instant>,
    cache_hit: bool,
}

impl RunTimer {
    /// Start timing
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            compiled_at: None,
            instantiated_at: None,
            cache_hit: false,
        }
    }

    /// Mark the end of compilation
    pub fn mark_compiled(&mut self, cache_hit: bool) {
        self.compiled_at = Some(Instant::now());
        self.cache_hit = cache_hit;
    }

    /// Mark the end of instantiation
    pub fn mark_instantiated(&mut self) {
        self.instantiated_at = Some(Instant::now());
    }

    /// Stop timing
    pub fn finish(&self, exit_code: Option<i32>) -> RunMetrics {
        let now = Instant::now();
        let compiled = self.compiled_at.unwrap_or(now);
        let instantiated = self.instantiated_at.unwrap_or(now).max(compiled);

        RunMetrics {
            started_at: self.started_at,
            compile_time_us: micros(compiled - self.start),
            instantiate_time_us: micros(instantiated - compiled),
            execute_time_us: micros(now - instantiated),
            cache_hit: self.cache_hit,
            exit_code,
        }
    }
}

fn micros(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_phases() {
        let mut timer = RunTimer::start();
        std::thread::sleep(Duration::from_millis(2));
        timer.mark_compiled(true);
        timer.mark_instantiated();

        let metrics = timer.finish(Some(0));
        assert!(metrics.cache_hit);
        assert!(metrics.compile_time_us >= 2000);
        assert_eq!(metrics.exit_code, Some(0));
        assert!(metrics.total() >= Duration::from_millis(2));
    }

    #[test]
    fn test_unfinished_phases_are_zero() {
        let timer = RunTimer::start();
        let metrics = timer.finish(None);
        assert_eq!(metrics.instantiate_time_us, 0);
        assert_eq!(metrics.execute_time_us, 0);
    }

    #[test]
    fn test_metrics_serialization() {
        let metrics = RunTimer::start().finish(None);
        let json = serde_json::to_string(&metrics).unwrap();
        assert!(json.contains("compileTimeUs"));
        assert!(!json.contains("exitCode"));
    }
}
