//! Tracing/logging setup shared by the cart engine binaries and tests.

/// Tracing configuration (filters, formatters).
pub mod tracing;

/// Initialize process-wide logging with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Initialize human-readable logging captured by the test harness.
pub fn init_for_tests() {
    tracing::init_test("debug");
}
