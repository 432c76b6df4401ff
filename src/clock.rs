//! Monotonic time and ID generation (C1), kept minimal and behind a trait so
//! tests can freeze time instead of sleeping real seconds.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn now_utc(&self) -> chrono::DateTime<chrono::Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// A clock that only advances when told to, for deterministic TTL/sweep tests.
#[cfg(test)]
pub struct FakeClock {
    inner: std::sync::Mutex<FakeClockState>,
}

#[cfg(test)]
struct FakeClockState {
    instant: Instant,
    utc: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(FakeClockState {
                instant: Instant::now(),
                utc: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&chrono::Utc),
            }),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut state = self.inner.lock().unwrap();
        state.instant += d;
        state.utc += chrono::Duration::from_std(d).unwrap();
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.inner.lock().unwrap().instant
    }

    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.lock().unwrap().utc
    }
}

pub fn new_worker_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}

pub fn new_session_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_both_axes() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        let u0 = clock.now_utc();
        clock.advance(Duration::from_secs(90));
        assert!(clock.now() >= t0 + Duration::from_secs(90));
        assert_eq!(clock.now_utc() - u0, chrono::Duration::seconds(90));
    }

    #[test]
    fn worker_and_session_ids_are_distinct() {
        assert_ne!(new_worker_id(), new_worker_id());
        assert_ne!(new_session_id(), new_session_id());
    }
}
