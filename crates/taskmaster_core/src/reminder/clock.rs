use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use time::{Duration, OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync {
    /// Current instant, expressed in the local offset.
    fn now(&self) -> OffsetDateTime;
}

/// Reads the local UTC offset, falling back to UTC when it cannot be
/// determined (for example once other threads are running on unix).
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

#[derive(Debug)]
pub struct SystemClock {
    offset_secs: AtomicI32,
    follow_local: bool,
}

impl SystemClock {
    /// A clock pinned to `offset`.
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            offset_secs: AtomicI32::new(offset.whole_seconds()),
            follow_local: false,
        }
    }

    pub fn local() -> Self {
        Self::following_local(local_offset())
    }

    /// Re-reads the local offset on every call so a daylight saving change
    /// is picked up. When the platform refuses to report it (unix once other
    /// threads are running) the last known offset is kept.
    pub fn following_local(initial: UtcOffset) -> Self {
        Self {
            follow_local: true,
            ..Self::new(initial)
        }
    }

    pub fn offset(&self) -> UtcOffset {
        if self.follow_local
            && let Ok(current) = UtcOffset::current_local_offset()
        {
            self.offset_secs
                .store(current.whole_seconds(), Ordering::Relaxed);
            return current;
        }
        UtcOffset::from_whole_seconds(self.offset_secs.load(Ordering::Relaxed))
            .unwrap_or(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset())
    }
}

#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(instant: OffsetDateTime) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    pub fn set(&self, instant: OffsetDateTime) {
        match self.instant.lock() {
            Ok(mut guard) => *guard = instant,
            Err(poisoned) => *poisoned.into_inner() = instant,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        match self.instant.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
