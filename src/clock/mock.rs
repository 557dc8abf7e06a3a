#[cfg(test)]
use crate::clock::{Clock, Timestamp};
#[cfg(test)]
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

#[cfg(test)]
#[derive(Clone)]
/// A test clock you can manually advance.
pub struct MockClock {
    inner: Arc<Mutex<Timestamp>>,
}

#[cfg(test)]
impl MockClock {
    /// Start the mock at the given timestamp.
    pub fn new(start: Timestamp) -> Self {
        MockClock {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by `d`.
    pub fn advance(&self, d: Duration) {
        let mut t = self.inner.lock().unwrap();
        *t = *t + d;
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        *self.inner.lock().unwrap()
    }
}
