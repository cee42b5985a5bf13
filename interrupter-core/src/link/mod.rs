//! Background reachability monitor.
//!
//! A single thread polls a [`ReachabilityProbe`] on a fixed interval and
//! publishes the result through atomics. It is the only writer, so readers
//! never lock.

use core::fmt;
use core::time::Duration;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, info};

/// Interval between probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Checks whether the peer is reachable. Runs on the monitor thread.
pub trait ReachabilityProbe: Send + 'static {
    fn probe(&mut self) -> bool;
}

impl<F> ReachabilityProbe for F
where
    F: FnMut() -> bool + Send + 'static,
{
    fn probe(&mut self) -> bool {
        self()
    }
}

/// Last observed link state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkStatus {
    /// No probe has completed yet.
    #[default]
    Unknown,
    Up,
    Down,
}

impl LinkStatus {
    const fn to_raw(self) -> u8 {
        match self {
            LinkStatus::Unknown => 0,
            LinkStatus::Up => 1,
            LinkStatus::Down => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LinkStatus::Up,
            2 => LinkStatus::Down,
            _ => LinkStatus::Unknown,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            LinkStatus::Unknown => "unknown",
            LinkStatus::Up => "up",
            LinkStatus::Down => "down",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Default)]
struct LinkShared {
    status: AtomicU8,
    stop: AtomicBool,
}

/// Handle to the monitor thread. Dropping it stops the thread.
pub struct LinkMonitor {
    shared: Arc<LinkShared>,
    thread: Option<JoinHandle<()>>,
}

impl LinkMonitor {
    /// Starts polling `probe` every `interval`, beginning immediately.
    pub fn spawn(mut probe: impl ReachabilityProbe, interval: Duration) -> io::Result<Self> {
        let shared = Arc::new(LinkShared::default());
        let worker = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name("link-monitor".into())
            .spawn(move || {
                let mut previous = LinkStatus::Unknown;
                while !worker.stop.load(Ordering::Acquire) {
                    let status = if probe.probe() {
                        LinkStatus::Up
                    } else {
                        LinkStatus::Down
                    };
                    worker.status.store(status.to_raw(), Ordering::Release);
                    if status == previous {
                        debug!("link: probe {status}");
                    } else {
                        info!("link: {previous} -> {status}");
                        previous = status;
                    }
                    thread::park_timeout(interval);
                }
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn status(&self) -> LinkStatus {
        LinkStatus::from_raw(self.shared.status.load(Ordering::Acquire))
    }

    /// Stops the thread and waits for the probe in flight to return.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for LinkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LinkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkMonitor")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
