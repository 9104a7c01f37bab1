//! SimClock - Simulated Time
//!
//! TigerStyle: Deterministic, controllable time for stamping statements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::constants::DST_TIME_ADVANCE_MS_MAX;

/// A simulated clock for deterministic testing.
///
/// TigerStyle:
/// - Time only moves forward
/// - No reliance on system time
/// - Clones share the same timeline
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    /// Current time in milliseconds since epoch
    current_ms: Arc<AtomicU64>,
}

impl SimClock {
    /// Create a new clock starting at the Unix epoch.
    ///
    /// # Example
    /// ```
    /// use statement_store::dst::SimClock;
    /// let clock = SimClock::new();
    /// assert_eq!(clock.now_ms(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::at_ms(0)
    }

    /// Create a clock starting at the given millisecond timestamp.
    #[must_use]
    pub fn at_ms(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Get current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Get current time as `DateTime<Utc>`.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        i64::try_from(self.now_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Advance time by the given milliseconds.
    ///
    /// # Panics
    /// Panics if ms exceeds `DST_TIME_ADVANCE_MS_MAX`.
    ///
    /// # Returns
    /// The new current time.
    pub fn advance_ms(&self, ms: u64) -> u64 {
        // Precondition
        assert!(
            ms <= DST_TIME_ADVANCE_MS_MAX,
            "advance_ms({ms}) exceeds max ({DST_TIME_ADVANCE_MS_MAX})"
        );

        let old_time = self.current_ms.fetch_add(ms, Ordering::SeqCst);
        let new_time = old_time.saturating_add(ms);

        // Postcondition
        assert!(new_time >= old_time, "time must not go backwards");
        new_time
    }

    /// Advance by `ms` and return the new time as a timestamp.
    ///
    /// Convenient for giving each stored statement a distinct `created_at`.
    pub fn tick(&self, ms: u64) -> DateTime<Utc> {
        self.advance_ms(ms);
        self.now()
    }
}
