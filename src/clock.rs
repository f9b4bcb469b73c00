//! Wall-clock access for the settlement cutoff.
//!
//! Settlement compares "now" against a daily local cutoff, so the clock
//! reports naive local time in a fixed offset. Tests swap in `FixedClock`.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, Utc};
use std::sync::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current UTC instant.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Offset used to derive local wall time.
    fn offset(&self) -> FixedOffset;

    /// Current local wall time.
    fn now_local(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.offset()).naive_local()
    }

    /// Convert a stored UTC timestamp to local wall time.
    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.offset()).naive_local()
    }
}

/// The real system clock.
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// `offset_minutes = None` uses the host's local offset.
    pub fn new(offset_minutes: Option<i32>) -> Self {
        let offset = offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| Local::now().offset().fix());
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// A settable clock for tests and replays.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    /// A clock frozen at the given local wall time in `offset`.
    pub fn at_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let utc = DateTime::<Utc>::from_naive_utc_and_offset(local - offset, Utc);
        Self {
            now: Mutex::new(utc),
            offset,
        }
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        let utc = DateTime::<Utc>::from_naive_utc_and_offset(local - self.offset, Utc);
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = utc;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}
