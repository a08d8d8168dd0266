//! ---
//! apex_section: "01-core-functionality"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Clock helpers shared across the validator runtime."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock as fractional seconds since the Unix epoch, matching the wire timestamp.
pub fn epoch_seconds_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Convert a duration into microseconds, saturating at `u64::MAX`.
pub fn duration_to_micros(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(1_000_000)
        .saturating_add(u64::from(duration.subsec_micros()))
}
