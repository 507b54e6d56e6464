//! Fractional progress mapping for polled operations.

/// Progress reported once an operation has succeeded.
pub const PROGRESS_DONE: f64 = 100.0;

/// Map a poll attempt onto the `[start, end]` progress band.
///
/// `progress = start + min(attempt / max_attempts, 1) * (end - start)`.
/// A zero `max_attempts` maps to `start`.
pub fn poll_progress(attempt: u32, max_attempts: u32, start: f64, end: f64) -> f64 {
    if max_attempts == 0 {
        return start;
    }
    let fraction = (attempt as f64 / max_attempts as f64).min(1.0);
    start + fraction * (end - start)
}

/// Round a progress value to a whole percentage in `0..=100`.
pub fn to_percent(progress: f64) -> u8 {
    progress.round().clamp(0.0, 100.0) as u8
}
