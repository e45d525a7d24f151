//! Broadcast rate limiting.
//!
//! Pointer-move and camera-change presence broadcasts are throttled to
//! bound network and CPU cost; only the outgoing update is limited,
//! local feedback stays instant. Time is injected so behavior is
//! deterministic under test.

use std::time::{Duration, Instant};

/// Leading-edge throttle: the first call passes, later calls pass only
/// after the interval has elapsed.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Whether an event at `now` may go out. Passing consumes the slot.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_passes_immediately() {
        let mut throttle = Throttle::new(Duration::from_millis(100));
        assert!(throttle.ready(Instant::now()));
    }

    #[test]
    fn two_events_inside_interval_produce_one() {
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(throttle.ready(t0));
        assert!(!throttle.ready(t0 + Duration::from_millis(50)));
        assert!(throttle.ready(t0 + Duration::from_millis(150)));
    }

    #[test]
    fn interval_measured_from_last_pass() {
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(throttle.ready(t0));
        assert!(!throttle.ready(t0 + Duration::from_millis(99)));
        // The rejected event did not reset the window.
        assert!(throttle.ready(t0 + Duration::from_millis(100)));
    }
}
