use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Timestamp;

/// Source of protocol time, in ticks. The protocol never reads wall time itself.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Manually advanced tick counter; clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct LogicalClock {
    ticks: Arc<AtomicU64>,
}

impl LogicalClock {
    pub fn new() -> LogicalClock {
        return LogicalClock::default();
    }

    pub fn advance(&self) -> Timestamp {
        return self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
    }

    pub fn set(&self, now: Timestamp) {
        self.ticks.store(now, Ordering::SeqCst);
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        return self.ticks.load(Ordering::SeqCst);
    }
}

/// Counts protocol periods elapsed since a shared epoch.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch: Instant,
    period: Duration,
}

impl WallClock {
    pub fn new(epoch: Instant, period: Duration) -> WallClock {
        return WallClock { epoch, period };
    }
}

impl Clock for WallClock {
    fn now(&self) -> Timestamp {
        let period = self.period.as_nanos().max(1);
        return (self.epoch.elapsed().as_nanos() / period) as Timestamp;
    }
}

#[test]
fn logical_clock_is_shared_between_clones() {
    let clock = LogicalClock::new();
    let other = clock.clone();
    assert_eq!(1, clock.advance());
    assert_eq!(2, other.advance());
    assert_eq!(2, clock.now());
    clock.set(10);
    assert_eq!(10, other.now());
}

#[test]
fn wall_clock_counts_whole_periods() {
    let clock = WallClock::new(Instant::now() - Duration::from_millis(250), Duration::from_millis(100));
    assert!(clock.now() >= 2);
}
