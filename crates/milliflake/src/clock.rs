use jiff::Timestamp;
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
    /// Block and wait until the clock reaches the target time.
    fn wait_until(&self, target: Timestamp);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn wait_until(&self, target: Timestamp) {
        // Poll in a loop to handle spurious wakeups. The loop condition is
        // re-evaluated after each sleep so we don't over-sleep past the target.
        loop {
            let now = Timestamp::now();
            if now >= target {
                return;
            }
            // Sleep the remaining milliseconds. A minimum of 1 ms yields the
            // processor instead of hot-spinning on sub-millisecond gaps.
            let remaining_ms = (target.as_millisecond() - now.as_millisecond()).max(1) as u64;
            std::thread::sleep(Duration::from_millis(remaining_ms));
        }
    }
}
