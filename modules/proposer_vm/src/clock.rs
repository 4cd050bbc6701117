//! Wall clock that tests can pin to a fixed instant
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Default, Clone)]
pub struct Clock {
    faked: Option<SystemTime>,
}

impl Clock {
    pub fn time(&self) -> SystemTime {
        self.faked.unwrap_or_else(SystemTime::now)
    }

    /// Pin the clock to `time`
    pub fn set(&mut self, time: SystemTime) {
        self.faked = Some(time);
    }

    /// Return to the system clock
    pub fn sync(&mut self) {
        self.faked = None;
    }
}

/// Drop sub-second precision; block timestamps are whole seconds
pub fn truncate_to_second(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => UNIX_EPOCH + Duration::from_secs(since.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}
