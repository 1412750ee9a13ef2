//! Process-wide tracing setup.

/// Tracing subscriber configuration (filter, JSON formatting).
pub mod tracing;

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}
