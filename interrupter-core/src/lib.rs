// Shared logic for the interrupter drive controller.
//
// Hardware access stays behind the traits in `hardware` so the same controller
// runs against a pulse-generator daemon on the target and against the simulated
// outputs used by the emulator and the test suites.

pub mod config;
pub mod controller;
pub mod hardware;
pub mod limits;
pub mod link;
pub mod playback;
pub mod power;
pub mod repl;
pub mod telemetry;
pub mod timing;

pub use config::{ControllerConfig, Profile};
pub use controller::{DriveController, DriveError, DriveMode, DriveRequest, ModeError};
pub use limits::{DutyCycle, LimitError, PulseSpec, SafetyLimiter, SafetyLimits};
pub use power::{PowerError, PowerPhase, PowerSequencer, PowerState};
pub use timing::{HostTimebase, ManualTimebase, Timebase, WaitStrategy};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every guarded value here is left consistent between writes, and the
/// outputs must stay controllable after a panic on another thread.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
