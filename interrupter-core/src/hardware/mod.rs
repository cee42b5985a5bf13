//! Hardware seams consumed by the controller.
//!
//! The pulse output and the two power relays are external devices. The core
//! only talks to them through [`PulseChannel`] and [`RelayDriver`], which keeps
//! the drive logic identical between the target daemon, the emulator and tests.

use core::fmt;
use core::time::Duration;

use crate::limits::DutyCycle;

pub mod pins;

pub use pins::{OutputLine, PinAssignment, PinMap, Polarity};

/// Widest single pulse the hardware trigger primitive resolves accurately.
///
/// Anything wider is emitted as an explicit two-edge [`Waveform`].
pub const TRIGGER_MAX_WIDTH_US: u32 = 100;

/// Trailing low segment appended to single-pulse waveforms.
pub const WAVEFORM_TAIL: Duration = Duration::from_micros(1);

/// Static output level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[must_use]
    pub const fn from_high(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

/// Operation that was in flight when a channel write failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOp {
    Level,
    Pwm,
    Trigger,
    Waveform,
    Abort,
}

/// Relay lines switched by the power sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relay {
    /// Feeds the load through the current-limiting resistor.
    Softstart,
    /// Bypasses the limiting resistor.
    FullPower,
}

impl Relay {
    /// Output line that carries this relay's coil drive.
    #[must_use]
    pub const fn line(self) -> OutputLine {
        match self {
            Relay::Softstart => OutputLine::Softstart,
            Relay::FullPower => OutputLine::FullPower,
        }
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relay::Softstart => "softstart",
            Relay::FullPower => "full-power",
        })
    }
}

/// Logical relay state, independent of the coil polarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Energized,
    Released,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelayState::Energized => "energized",
            RelayState::Released => "released",
        })
    }
}

/// Failure reported by a hardware driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardwareError {
    /// The pulse output rejected a write. `code` is the driver's raw status.
    Channel { op: ChannelOp, code: i32 },
    /// A relay coil could not be driven.
    Relay { relay: Relay, code: i32 },
    /// The device backend is not reachable.
    Unavailable,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareError::Channel { op, code } => {
                write!(f, "pulse channel {op:?} write failed (code {code})")
            }
            HardwareError::Relay { relay, code } => {
                write!(f, "{relay} relay write failed (code {code})")
            }
            HardwareError::Unavailable => f.write_str("hardware backend unavailable"),
        }
    }
}

impl std::error::Error for HardwareError {}

/// One segment of a generated waveform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveEdge {
    pub level: Level,
    pub hold: Duration,
}

/// Precisely timed edge sequence handed to the pulse generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Waveform {
    edges: [WaveEdge; 2],
}

impl Waveform {
    /// Assert for exactly `width_us`, then deassert.
    #[must_use]
    pub const fn single_pulse(width_us: u32) -> Self {
        Self {
            edges: [
                WaveEdge {
                    level: Level::High,
                    hold: Duration::from_micros(width_us as u64),
                },
                WaveEdge {
                    level: Level::Low,
                    hold: WAVEFORM_TAIL,
                },
            ],
        }
    }

    #[must_use]
    pub fn edges(&self) -> &[WaveEdge] {
        &self.edges
    }

    /// Time the output spends asserted.
    #[must_use]
    pub fn high_time(&self) -> Duration {
        self.edges
            .iter()
            .filter(|edge| edge.level.is_high())
            .map(|edge| edge.hold)
            .sum()
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.edges.iter().map(|edge| edge.hold).sum()
    }
}

/// The single interrupter output.
pub trait PulseChannel: Send {
    /// Drives the pin to a static level.
    fn set_level(&mut self, level: Level) -> Result<(), HardwareError>;

    /// Starts periodic pulse generation. A zero duty or frequency stops it.
    fn set_pwm(&mut self, frequency_hz: f64, duty: DutyCycle) -> Result<(), HardwareError>;

    /// Fires one pulse through the hardware trigger primitive.
    fn trigger(&mut self, width_us: u32) -> Result<(), HardwareError>;

    /// Transmits a waveform and blocks until it has been sent.
    fn transmit(&mut self, waveform: &Waveform) -> Result<(), HardwareError>;

    /// Cancels any waveform in flight and frees its resources.
    fn abort_waveform(&mut self) -> Result<(), HardwareError>;

    /// Stops every output path and leaves the pin deasserted.
    ///
    /// All steps are attempted; the first failure is reported.
    fn halt(&mut self) -> Result<(), HardwareError> {
        let aborted = self.abort_waveform();
        let zeroed = self.set_pwm(0.0, DutyCycle::ZERO);
        let lowered = self.set_level(Level::Low);
        aborted.and(zeroed).and(lowered)
    }
}

/// Audible status tone on the speaker line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration: Duration,
}

impl Tone {
    #[must_use]
    pub const fn new(frequency_hz: u32, duration: Duration) -> Self {
        Self {
            frequency_hz,
            duration,
        }
    }
}

/// Played once the controller has initialised its outputs.
pub const STARTUP_TONE: Tone = Tone::new(444, Duration::from_millis(200));

/// Played when the full-power relay has closed.
pub const FULL_POWER_TONE: Tone = Tone::new(784, Duration::from_millis(1_000));

/// Relay coils plus the small indicator outputs that live beside them.
pub trait RelayDriver: Send {
    /// Drives a relay to the requested logical state.
    fn drive(&mut self, relay: Relay, state: RelayState) -> Result<(), HardwareError>;

    /// Releases both relays. Both writes are attempted even if the first fails.
    fn release_all(&mut self) -> Result<(), HardwareError> {
        let full = self.drive(Relay::FullPower, RelayState::Released);
        let soft = self.drive(Relay::Softstart, RelayState::Released);
        full.and(soft)
    }

    /// Plays a status tone. Drivers without a speaker ignore it.
    fn chime(&mut self, tone: Tone) -> Result<(), HardwareError> {
        let _ = tone;
        Ok(())
    }

    /// Switches the ready indicator.
    fn set_ready(&mut self, lit: bool) -> Result<(), HardwareError> {
        let _ = lit;
        Ok(())
    }
}
