//! Injectable wall clock.

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// Time-based invalidation (the TLS credential cache) compares against this
/// instead of calling `Utc::now()` directly so expiry behavior is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
