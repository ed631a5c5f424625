//! Engine tuning knobs, with environment overrides for deployment.

use std::time::Duration;

use crate::job::RetryPolicy;

/// Configuration for the qualification engine.
///
/// Defaults are sized for a single-node deployment scoring against a
/// rate-limited external service: a small worker pool and a sweep that fails
/// runs after ten minutes without progress.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size, shared across all active runs.
    pub max_concurrent: usize,
    /// Retry policy applied to transient scoring failures.
    pub retry: RetryPolicy,
    /// How often the sweep scans for stalled runs.
    pub sweep_interval: Duration,
    /// A running run with no progress for this long is considered stalled.
    pub run_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry: RetryPolicy::default(),
            sweep_interval: Duration::from_secs(60),
            run_timeout: Duration::from_secs(600),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `QUALIFORGE_*` environment variables, falling back
    /// to defaults for anything unset or unparseable.
    ///
    /// Recognized variables:
    /// - `QUALIFORGE_MAX_CONCURRENT`: worker pool size
    /// - `QUALIFORGE_MAX_ATTEMPTS`: scoring attempts per domain
    /// - `QUALIFORGE_SWEEP_INTERVAL_SECS`: sweep cadence in seconds
    /// - `QUALIFORGE_RUN_TIMEOUT_MINUTES`: stall timeout in minutes
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_attempts = env_parse("QUALIFORGE_MAX_ATTEMPTS", defaults.retry.max_attempts);
        let sweep_secs = env_parse(
            "QUALIFORGE_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        );
        let timeout_minutes = env_parse(
            "QUALIFORGE_RUN_TIMEOUT_MINUTES",
            defaults.run_timeout.as_secs() / 60,
        );
        Self {
            max_concurrent: env_parse("QUALIFORGE_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            retry: RetryPolicy {
                max_attempts,
                ..defaults.retry
            },
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            run_timeout: Duration::from_secs(timeout_minutes.saturating_mul(60)),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The interval is floored at one millisecond; the sweep timer cannot
    /// run with a zero period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_production_sized() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.run_timeout, Duration::from_secs(600));
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::default()
            .with_max_concurrent(16)
            .with_sweep_interval(Duration::from_secs(5))
            .with_run_timeout(Duration::from_secs(120));
        assert_eq!(config.max_concurrent, 16);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.run_timeout, Duration::from_secs(120));
    }

    #[test]
    fn zero_knobs_are_clamped() {
        let config = EngineConfig::default()
            .with_max_concurrent(0)
            .with_sweep_interval(Duration::ZERO);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.sweep_interval, Duration::from_millis(1));
    }

    // Single test so the process-global environment is never touched from
    // two tests at once.
    #[test]
    fn from_env_reads_overrides_and_ignores_garbage() {
        unsafe {
            std::env::set_var("QUALIFORGE_MAX_CONCURRENT", "9");
            std::env::set_var("QUALIFORGE_MAX_ATTEMPTS", "7");
            std::env::set_var("QUALIFORGE_SWEEP_INTERVAL_SECS", "15");
            std::env::set_var("QUALIFORGE_RUN_TIMEOUT_MINUTES", "3");
        }
        let config = EngineConfig::from_env();
        assert_eq!(config.max_concurrent, 9);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.run_timeout, Duration::from_secs(180));

        unsafe {
            std::env::set_var("QUALIFORGE_MAX_CONCURRENT", "not-a-number");
            std::env::set_var("QUALIFORGE_SWEEP_INTERVAL_SECS", "0");
        }
        let config = EngineConfig::from_env();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));

        unsafe {
            std::env::remove_var("QUALIFORGE_MAX_CONCURRENT");
            std::env::remove_var("QUALIFORGE_MAX_ATTEMPTS");
            std::env::remove_var("QUALIFORGE_SWEEP_INTERVAL_SECS");
            std::env::remove_var("QUALIFORGE_RUN_TIMEOUT_MINUTES");
        }
    }
}
