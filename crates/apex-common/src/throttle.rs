//! ---
//! apex_section: "01-core-functionality"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Rate limiting for repetitive log lines on hot paths."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Lets a log line through at most once per interval and counts what it held back.
///
/// Shared by reference between tasks; the state lives behind a short mutex.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_emit: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    /// Create a throttle that opens once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// Create a throttle whose first opening is one full interval from now.
    pub fn deferred(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_emit: Some(Instant::now()),
                suppressed: 0,
            }),
        }
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `Some(suppressed)` when the caller should log now, where `suppressed` is the
    /// number of calls swallowed since the previous emission. Returns `None` otherwise.
    pub fn check(&self) -> Option<u64> {
        self.check_at(Instant::now())
    }

    /// Same as [`LogThrottle::check`] against an explicit instant.
    pub fn check_at(&self, now: Instant) -> Option<u64> {
        let mut state = self.state.lock();
        let open = match state.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if open {
            state.last_emit = Some(now);
            Some(std::mem::take(&mut state.suppressed))
        } else {
            state.suppressed += 1;
            None
        }
    }

    /// Calls swallowed since the last emission.
    pub fn suppressed(&self) -> u64 {
        self.state.lock().suppressed
    }
}
