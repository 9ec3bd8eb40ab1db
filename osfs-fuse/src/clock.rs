use osfs::{Clock, TimeSpec};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock timestamps for files packed on the host.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeSpec {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => TimeSpec::new(elapsed.as_secs() as i64, elapsed.subsec_nanos()),
            Err(_) => TimeSpec::ZERO,
        }
    }
}
