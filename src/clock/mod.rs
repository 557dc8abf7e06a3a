pub mod mock;
mod system;

#[cfg(test)]
pub use self::mock::MockClock;

pub use self::system::SystemClock;

use std::fmt;
use std::time::Duration;

/// A wire timestamp: seconds and microseconds, as carried by capture records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn new(sec: u64, usec: u32) -> Self {
        Timestamp(Duration::new(sec, 0) + Duration::from_micros(u64::from(usec)))
    }

    pub fn from_micros(micros: u64) -> Self {
        Timestamp(Duration::from_micros(micros))
    }

    /// Build from fractional seconds, e.g. `0.050`.
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp(Duration::from_micros((secs.max(0.0) * 1e6).round() as u64))
    }

    pub fn sec(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn usec(&self) -> u32 {
        self.0.subsec_micros()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    pub fn relative_to(&self, origin: Timestamp) -> Timestamp {
        Timestamp(self.since(origin))
    }
}

impl std::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec(), self.usec())
    }
}

/// A trait for getting the current time
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock timestamp
    fn now(&self) -> Timestamp;
}
