use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Millisecond wall clock that never goes backwards. Used to stamp
/// `landed_at` so rows written later never carry an earlier landing time.
pub struct LandingClock {
    last_millis: AtomicI64,
}

impl LandingClock {
    pub fn new() -> Self {
        LandingClock {
            last_millis: AtomicI64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.observe(Utc::now().timestamp_millis())
    }

    fn observe(&self, wall_millis: i64) -> DateTime<Utc> {
        let previous = self.last_millis.fetch_max(wall_millis, Ordering::SeqCst);
        let millis = previous.max(wall_millis);
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl Default for LandingClock {
    fn default() -> Self {
        Self::new()
    }
}
