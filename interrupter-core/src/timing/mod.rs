//! Monotonic time source and deadline waits.
//!
//! Playback and the softstart pre-charge block their own thread until a
//! deadline. [`Timebase`] is the seam: [`HostTimebase`] waits on the OS
//! monotonic clock with a selectable [`WaitStrategy`], [`ManualTimebase`] is a
//! virtual clock for simulations and tests that jumps straight to the deadline.

use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use serde::Deserialize;

/// Spin margin used by [`WaitStrategy::default`].
pub const DEFAULT_SPIN_MARGIN_US: u32 = 1_000;

/// Monotonic clock with a blocking "wait until deadline" primitive.
///
/// Timestamps are offsets from an origin fixed when the timebase is created.
pub trait Timebase: Send + Sync {
    fn now(&self) -> Duration;

    /// Blocks the calling thread until `now() >= deadline`.
    fn wait_until(&self, deadline: Duration);

    fn wait(&self, duration: Duration) {
        self.wait_until(self.now() + duration);
    }
}

/// How [`HostTimebase`] waits for a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WaitStrategy {
    /// Busy-wait the whole interval. Lowest jitter, one core pinned.
    Spin,
    /// Sleep until `spin_margin_us` before the deadline, then spin.
    Sleep {
        #[serde(default = "default_spin_margin_us")]
        spin_margin_us: u32,
    },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Sleep {
            spin_margin_us: DEFAULT_SPIN_MARGIN_US,
        }
    }
}

const fn default_spin_margin_us() -> u32 {
    DEFAULT_SPIN_MARGIN_US
}

/// Wall-clock timebase backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct HostTimebase {
    origin: Instant,
    strategy: WaitStrategy,
}

impl HostTimebase {
    #[must_use]
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            origin: Instant::now(),
            strategy,
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> WaitStrategy {
        self.strategy
    }
}

impl Default for HostTimebase {
    fn default() -> Self {
        Self::new(WaitStrategy::default())
    }
}

impl Timebase for HostTimebase {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wait_until(&self, deadline: Duration) {
        if let WaitStrategy::Sleep { spin_margin_us } = self.strategy {
            let margin = Duration::from_micros(u64::from(spin_margin_us));
            let remaining = deadline.saturating_sub(self.now());
            if remaining > margin {
                thread::sleep(remaining - margin);
            }
        }

        while self.now() < deadline {
            core::hint::spin_loop();
        }
    }
}

/// Virtual clock shared between threads.
///
/// `wait_until` advances the clock to the deadline instead of blocking, so a
/// multi-second playback session completes instantly with exact timestamps.
#[derive(Clone, Debug, Default)]
pub struct ManualTimebase {
    now_ns: Arc<AtomicU64>,
}

impl ManualTimebase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now_ns.fetch_add(as_nanos(duration), Ordering::AcqRel);
    }
}

impl Timebase for ManualTimebase {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns.load(Ordering::Acquire))
    }

    fn wait_until(&self, deadline: Duration) {
        self.now_ns.fetch_max(as_nanos(deadline), Ordering::AcqRel);
    }
}

impl<T: Timebase + ?Sized> Timebase for Arc<T> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn wait_until(&self, deadline: Duration) {
        (**self).wait_until(deadline);
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_wait_jumps_to_deadline_and_never_rewinds() {
        let clock = ManualTimebase::new();
        clock.wait_until(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(500));

        clock.wait_until(Duration::from_millis(100));
        assert_eq!(clock.now(), Duration::from_millis(500));

        clock.wait(Duration::from_micros(250));
        assert_eq!(clock.now(), Duration::from_micros(500_250));
    }

    #[test]
    fn manual_clones_share_one_clock() {
        let clock = ManualTimebase::new();
        let other = clock.clone();
        other.advance(Duration::from_secs(2));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn host_wait_reaches_deadline_with_either_strategy() {
        for strategy in [
            WaitStrategy::Spin,
            WaitStrategy::Sleep { spin_margin_us: 200 },
        ] {
            let clock = HostTimebase::new(strategy);
            let deadline = clock.now() + Duration::from_millis(3);
            clock.wait_until(deadline);
            assert!(clock.now() >= deadline, "{strategy:?} returned early");
        }
    }

    #[test]
    fn host_wait_returns_immediately_for_past_deadline() {
        let clock = HostTimebase::new(WaitStrategy::default());
        clock.wait(Duration::from_millis(1));
        let before = clock.now();
        clock.wait_until(Duration::ZERO);
        assert!(clock.now() - before < Duration::from_millis(50));
    }
}
