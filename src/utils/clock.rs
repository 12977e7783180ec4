use chrono::{DateTime, TimeZone, Utc};

/// Wall-clock source in Unix milliseconds.
///
/// The engine and the keep-alive holder both measure elapsed time as
/// differences of wall-clock readings, so they can be compared after a
/// suspend/resume cycle and persisted across process restarts.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
pub use test_clock::ManualClock;
