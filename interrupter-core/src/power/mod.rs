//! Two-relay softstart sequencer.
//!
//! Power comes up in two stages: the softstart relay feeds the load through a
//! current-limiting resistor for the pre-charge interval, then the full-power
//! relay bypasses the resistor and the softstart relay drops out. Releasing
//! both relays is the safe state, and any relay failure mid-sequence falls
//! back to it.

use core::fmt;
use core::time::Duration;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::hardware::{
    FULL_POWER_TONE, HardwareError, Relay, RelayDriver, RelayState, STARTUP_TONE,
};
use crate::lock;
use crate::telemetry::{TelemetryEvent, TelemetryLog};
use crate::timing::Timebase;

/// Pre-charge hold through the limiting resistor.
pub const DEFAULT_PRECHARGE: Duration = Duration::from_secs(20);

/// Pre-charge is held in this many slices; abort is observed between them.
pub const PRECHARGE_SLICES: u32 = 20;

/// Progress reported once pre-charge has elapsed.
const PRECHARGE_DONE: u8 = 90;
const FULL_POWER_CLOSED: u8 = 95;
const COMPLETE: u8 = 100;

/// Coarse power stage derived from [`PowerState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerPhase {
    Off,
    Softstart,
    FullPower,
}

impl fmt::Display for PowerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerPhase::Off => "off",
            PowerPhase::Softstart => "softstart",
            PowerPhase::FullPower => "full-power",
        })
    }
}

/// Point-in-time view of the sequencer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerState {
    pub softstart_active: bool,
    /// `0..=100`, monotonic within one sequence.
    pub progress: u8,
    pub full_power: bool,
}

impl PowerState {
    #[must_use]
    pub const fn phase(&self) -> PowerPhase {
        if self.full_power {
            PowerPhase::FullPower
        } else if self.softstart_active {
            PowerPhase::Softstart
        } else {
            PowerPhase::Off
        }
    }
}

/// Power sequencing failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerError {
    /// A sequence is already running, or full power is already up.
    AlreadyActive,
    /// Power-off was requested before the sequence completed.
    Aborted,
    Hardware(HardwareError),
    /// The sequence thread could not be started.
    Spawn(io::ErrorKind),
}

impl fmt::Display for PowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerError::AlreadyActive => f.write_str("power sequence already active"),
            PowerError::Aborted => f.write_str("power sequence aborted"),
            PowerError::Hardware(error) => write!(f, "power sequence failed: {error}"),
            PowerError::Spawn(kind) => write!(f, "could not start power sequence: {kind}"),
        }
    }
}

impl std::error::Error for PowerError {}

impl From<HardwareError> for PowerError {
    fn from(error: HardwareError) -> Self {
        PowerError::Hardware(error)
    }
}

/// Releases both relays on drop unless the sequence committed.
struct FailSafeRelays<'a, R: RelayDriver> {
    relays: &'a mut R,
    committed: bool,
}

impl<'a, R: RelayDriver> FailSafeRelays<'a, R> {
    fn new(relays: &'a mut R) -> Self {
        Self {
            relays,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<R: RelayDriver> Drop for FailSafeRelays<'_, R> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        warn!("power: fail-safe releasing both relays");
        if let Err(error) = self.relays.release_all() {
            error!("power: fail-safe release failed {error}");
        }
    }
}

/// Clears `softstart_active` when the sequence ends, however it ends.
struct ActiveSlot<'a>(&'a AtomicBool);

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct PowerShared<R, T> {
    relays: Mutex<R>,
    timebase: T,
    telemetry: Arc<TelemetryLog>,
    precharge: Duration,
    softstart_active: AtomicBool,
    progress: AtomicU8,
    full_power: AtomicBool,
    abort: AtomicBool,
    fault: Mutex<Option<HardwareError>>,
}

impl<R: RelayDriver, T: Timebase> PowerShared<R, T> {
    fn state(&self) -> PowerState {
        PowerState {
            softstart_active: self.softstart_active.load(Ordering::Acquire),
            progress: self.progress.load(Ordering::Acquire),
            full_power: self.full_power.load(Ordering::Acquire),
        }
    }

    fn drive(&self, relays: &mut R, relay: Relay, state: RelayState) -> Result<(), HardwareError> {
        relays.drive(relay, state)?;
        info!("power: relay {relay} {state}");
        self.telemetry
            .record(self.timebase.now(), TelemetryEvent::Relay(relay, state));
        Ok(())
    }

    /// Runs the sequence on the calling thread and records its outcome.
    fn run(&self) -> Result<(), PowerError> {
        let _slot = ActiveSlot(&self.softstart_active);
        let result = self.sequence();
        match result {
            Ok(()) => {}
            Err(PowerError::Hardware(error)) => {
                error!("power: sequence failed {error}");
                *lock(&self.fault) = Some(error);
                self.telemetry
                    .record(self.timebase.now(), TelemetryEvent::PowerFault(error));
                self.reset();
            }
            Err(other) => {
                info!("power: sequence stopped {other}");
                self.reset();
            }
        }
        result
    }

    fn sequence(&self) -> Result<(), PowerError> {
        let mut relays = lock(&self.relays);
        if self.abort.load(Ordering::Acquire) {
            return Err(PowerError::Aborted);
        }

        let mut guard = FailSafeRelays::new(&mut *relays);
        self.drive(guard.relays, Relay::Softstart, RelayState::Energized)?;

        let start = self.timebase.now();
        let slice = self.precharge / PRECHARGE_SLICES;
        for step in 1..=PRECHARGE_SLICES {
            self.timebase.wait_until(start + slice * step);
            if self.abort.load(Ordering::Acquire) {
                return Err(PowerError::Aborted);
            }
            let progress = step * u32::from(PRECHARGE_DONE) / PRECHARGE_SLICES;
            self.progress
                .store(u8::try_from(progress).unwrap_or(PRECHARGE_DONE), Ordering::Release);
        }

        self.drive(guard.relays, Relay::FullPower, RelayState::Energized)?;
        self.progress.store(FULL_POWER_CLOSED, Ordering::Release);
        self.drive(guard.relays, Relay::Softstart, RelayState::Released)?;
        self.full_power.store(true, Ordering::Release);
        self.progress.store(COMPLETE, Ordering::Release);

        if let Err(error) = guard.relays.chime(FULL_POWER_TONE) {
            warn!("power: completion chime failed {error}");
        }
        guard.commit();
        info!("power: full power");
        Ok(())
    }

    fn reset(&self) {
        self.full_power.store(false, Ordering::Release);
        self.progress.store(0, Ordering::Release);
    }
}

/// Serialized softstart/full-power state machine over a [`RelayDriver`].
pub struct PowerSequencer<R, T> {
    shared: Arc<PowerShared<R, T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R, T> PowerSequencer<R, T>
where
    R: RelayDriver + 'static,
    T: Timebase + 'static,
{
    /// Takes ownership of the relays, forces them to the safe state, lights
    /// the ready indicator and plays the startup tone.
    pub fn new(
        mut relays: R,
        timebase: T,
        precharge: Duration,
        telemetry: Arc<TelemetryLog>,
    ) -> Result<Self, HardwareError> {
        relays.release_all()?;
        if let Err(error) = relays.set_ready(true) {
            warn!("power: ready indicator failed {error}");
        }
        if let Err(error) = relays.chime(STARTUP_TONE) {
            warn!("power: startup chime failed {error}");
        }

        Ok(Self {
            shared: Arc::new(PowerShared {
                relays: Mutex::new(relays),
                timebase,
                telemetry,
                precharge,
                softstart_active: AtomicBool::new(false),
                progress: AtomicU8::new(0),
                full_power: AtomicBool::new(false),
                abort: AtomicBool::new(false),
                fault: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Lock-free status read.
    #[must_use]
    pub fn query_status(&self) -> PowerState {
        self.shared.state()
    }

    /// Last relay failure seen by a sequence.
    #[must_use]
    pub fn last_fault(&self) -> Option<HardwareError> {
        *lock(&self.shared.fault)
    }

    #[must_use]
    pub fn precharge(&self) -> Duration {
        self.shared.precharge
    }

    fn claim(&self) -> Result<(), PowerError> {
        self.shared
            .softstart_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PowerError::AlreadyActive)?;
        // Full power stays up until end_power_sequence releases it.
        if self.shared.full_power.load(Ordering::Acquire) {
            self.shared.softstart_active.store(false, Ordering::Release);
            return Err(PowerError::AlreadyActive);
        }
        self.shared.abort.store(false, Ordering::Release);
        self.shared.progress.store(0, Ordering::Release);
        *lock(&self.shared.fault) = None;
        Ok(())
    }

    /// Starts the sequence on a background thread and returns immediately.
    pub fn begin_softstart(&self) -> Result<(), PowerError> {
        self.claim()?;
        info!(
            "power: softstart begin precharge={}ms",
            self.shared.precharge.as_millis()
        );

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("softstart".into())
            .spawn(move || {
                let _ = shared.run();
            });

        match spawned {
            Ok(handle) => {
                let previous = lock(&self.worker).replace(handle);
                if let Some(previous) = previous {
                    let _ = previous.join();
                }
                Ok(())
            }
            Err(error) => {
                self.shared.softstart_active.store(false, Ordering::Release);
                error!("power: softstart thread failed to start {error}");
                Err(PowerError::Spawn(error.kind()))
            }
        }
    }

    /// Runs the whole sequence on the caller's thread.
    pub fn power_on_blocking(&self) -> Result<(), PowerError> {
        self.claim()?;
        info!("power: blocking power-on");
        self.shared.run()
    }

    /// Aborts a running pre-charge and releases both relays.
    ///
    /// Blocks until a running sequence observes the abort, at most one
    /// pre-charge slice.
    pub fn end_power_sequence(&self) -> Result<(), HardwareError> {
        self.shared.abort.store(true, Ordering::Release);
        let mut relays = lock(&self.shared.relays);
        let result = relays.release_all();
        self.shared.reset();
        drop(relays);

        let now = self.shared.timebase.now();
        match result {
            Ok(()) => {
                for relay in [Relay::FullPower, Relay::Softstart] {
                    self.shared
                        .telemetry
                        .record(now, TelemetryEvent::Relay(relay, RelayState::Released));
                }
                info!("power: off");
            }
            Err(error) => {
                error!("power: release failed {error}");
                self.shared
                    .telemetry
                    .record(now, TelemetryEvent::PowerFault(error));
            }
        }
        result
    }

    /// Waits for a background sequence to finish.
    pub fn join_sequence(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("power: softstart thread panicked");
        }
    }
}

impl<R, T> Drop for PowerSequencer<R, T> {
    fn drop(&mut self) {
        self.shared.abort.store(true, Ordering::Release);
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
