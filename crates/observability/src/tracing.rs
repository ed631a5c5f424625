//! Tracing initialization.
//!
//! Deployments get one JSON object per line on stdout, filtered by
//! `RUST_LOG` (default `info`). Development can opt into a compact
//! human-readable format.

use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    #[default]
    Json,
    /// Single-line format for local development.
    Compact,
}

/// Initialize tracing with JSON output.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::Json);
}

/// Initialize tracing with an explicit output format.
pub fn init_with(format: LogFormat) {
    let _ = try_init_with(format);
}

/// Like [`init_with`], but reports whether this call installed the global
/// subscriber. Returns `false` when one was already installed.
pub fn try_init_with(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Compact => builder.compact().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        assert!(try_init_with(LogFormat::Compact));
        assert!(!try_init_with(LogFormat::Json));
        // The public entrypoint tolerates repeat calls too.
        init();
    }
}
