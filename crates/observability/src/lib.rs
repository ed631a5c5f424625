//! Shared observability setup for qualiforge processes.

/// Initialize process-wide tracing with the default JSON output.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (output format, filters).
pub mod tracing;

pub use tracing::LogFormat;
