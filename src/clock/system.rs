use crate::clock::{Clock, Timestamp};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::from_micros(since_epoch.as_micros() as u64)
    }
}
