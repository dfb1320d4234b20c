//! Progress values and the reporter capability handed to background work.

/// Percent complete. Nominally 0..=100, but the relay never enforces the range
/// or monotonicity; values are delivered exactly as they were sent.
pub type ProgressValue = u32;

/// Drained values at or above this mark the job as complete.
pub const COMPLETE: ProgressValue = 100;

/// Capability for reporting progress from any thread. Implement this to feed a
/// relay, a log, or an FFI callback.
pub trait ProgressReporter: Send + Sync {
    fn send(&self, value: ProgressValue);
}

/// A no-op reporter for when progress reporting is not needed.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn send(&self, _value: ProgressValue) {}
}

/// Helper to report a value if a reporter is provided.
pub fn emit_progress(reporter: Option<&dyn ProgressReporter>, value: ProgressValue) {
    if let Some(r) = reporter {
        r.send(value);
    }
}

/// Clamp a delivered value into 0..=100 for display.
pub fn clamp_percent(value: ProgressValue) -> u8 {
    value.min(COMPLETE) as u8
}
