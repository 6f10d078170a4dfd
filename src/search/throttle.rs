//! Rate limiting for repetitive log lines.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Lets one log line through per interval. Callers check [`ready`] and skip
/// the log call otherwise, so a failing loop cannot flood the output.
///
/// [`ready`]: LogThrottle::ready
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    suppressed: Mutex<u64>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            suppressed: Mutex::new(0),
        }
    }

    /// Whether a line may be logged now. Returns the number of lines
    /// suppressed since the last one that got through.
    pub fn ready(&self) -> Option<u64> {
        let now = Instant::now();
        let mut last = self.last.lock();
        let mut suppressed = self.suppressed.lock();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => {
                *suppressed += 1;
                None
            }
            _ => {
                *last = Some(now);
                Some(std::mem::take(&mut *suppressed))
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}
