//! Safety bounds shared by every drive mode.
//!
//! [`SafetyLimits`] is the static configuration. [`SafetyLimiter`] applies it to
//! caller-supplied timing parameters and owns the only bound that may change at
//! runtime, the on-time used for note playback.
//!
//! The single-pulse path clamps while the duty path rejects. Both behaviours
//! are relied on by operators and must stay asymmetric.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use log::warn;

/// Parts-per-million value representing a 100 % duty cycle.
pub const DUTY_FULL_SCALE: u32 = 1_000_000;

const MICROS_PER_SECOND: f64 = 1_000_000.0;
const MICROS_PER_MILLI: f64 = 1_000.0;
const MILLIS_PER_SECOND: f64 = 1_000.0;

/// Duty cycle in parts per million, the resolution of the pulse generator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DutyCycle(u32);

impl DutyCycle {
    pub const ZERO: Self = Self(0);
    pub const FULL: Self = Self(DUTY_FULL_SCALE);

    /// Saturates at [`DutyCycle::FULL`].
    #[must_use]
    pub const fn from_ppm(ppm: u32) -> Self {
        if ppm > DUTY_FULL_SCALE {
            Self::FULL
        } else {
            Self(ppm)
        }
    }

    /// Converts a fraction to the nearest part per million. Values outside
    /// `0.0..=1.0` (and NaN) saturate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction.is_nan() || fraction <= 0.0 {
            Self::ZERO
        } else if fraction >= 1.0 {
            Self::FULL
        } else {
            Self((fraction * f64::from(DUTY_FULL_SCALE)).round() as u32)
        }
    }

    #[must_use]
    pub const fn ppm(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn fraction(self) -> f64 {
        f64::from(self.0) / f64::from(DUTY_FULL_SCALE)
    }

    #[must_use]
    pub fn percent(self) -> f64 {
        self.fraction() * 100.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DutyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}%", self.percent())
    }
}

/// Sanitised pulse parameters ready to program into the channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseSpec {
    pub on_time_us: u32,
    pub frequency_hz: f64,
    pub duty: DutyCycle,
}

impl PulseSpec {
    #[must_use]
    pub fn period_us(&self) -> f64 {
        MICROS_PER_SECOND / self.frequency_hz
    }

    #[must_use]
    pub fn off_time_us(&self) -> f64 {
        self.period_us() - f64::from(self.on_time_us)
    }
}

/// Process-wide timing bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetyLimits {
    /// Longest pulse any mode may emit.
    pub max_on_time_us: u32,
    /// Shortest gap between pulses in the periodic modes.
    pub min_off_time_ms: u32,
    /// Highest duty cycle accepted for bursts, in percent.
    pub max_duty_cycle_pct: f64,
    /// Pulse width used for note playback. Adjustable at runtime.
    pub max_midi_on_time_us: u32,
}

impl SafetyLimits {
    #[must_use]
    pub const fn new(
        max_on_time_us: u32,
        min_off_time_ms: u32,
        max_duty_cycle_pct: f64,
        max_midi_on_time_us: u32,
    ) -> Self {
        Self {
            max_on_time_us,
            min_off_time_ms,
            max_duty_cycle_pct,
            max_midi_on_time_us,
        }
    }

    /// Rejects limit sets that would make every request fail or the playback
    /// width exceed the global ceiling.
    pub fn check(&self) -> Result<(), LimitError> {
        if self.max_on_time_us == 0 {
            return Err(LimitError::InvalidLimits("max_on_time_us must be positive"));
        }
        if !self.max_duty_cycle_pct.is_finite()
            || self.max_duty_cycle_pct <= 0.0
            || self.max_duty_cycle_pct > 100.0
        {
            return Err(LimitError::InvalidLimits(
                "max_duty_cycle_pct must be within 0-100",
            ));
        }
        if self.max_midi_on_time_us == 0 || self.max_midi_on_time_us > self.max_on_time_us {
            return Err(LimitError::InvalidLimits(
                "max_midi_on_time_us must be within 1..=max_on_time_us",
            ));
        }
        Ok(())
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self::new(200, 5, 1.0, 100)
    }
}

/// Caller input that violates a safety bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LimitError {
    OffTimeTooSmall {
        off_time_ms: f64,
        min_off_time_ms: u32,
    },
    OnTimeExceedsLimit {
        on_time_us: f64,
        max_on_time_us: u32,
    },
    OnTimeOutOfRange {
        on_time_us: u32,
        max_on_time_us: u32,
    },
    InvalidRate {
        bps: f64,
    },
    DutyCycleExceeded {
        duty_pct: f64,
        max_duty_cycle_pct: f64,
    },
    DutyOutOfRange {
        duty_pct: f64,
    },
    InvalidFrequency {
        frequency_hz: u32,
    },
    InvalidLimits(&'static str),
}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitError::OffTimeTooSmall {
                off_time_ms,
                min_off_time_ms,
            } => write!(
                f,
                "off-time {off_time_ms:.3}ms is below the {min_off_time_ms}ms minimum"
            ),
            LimitError::OnTimeExceedsLimit {
                on_time_us,
                max_on_time_us,
            } => write!(
                f,
                "derived on-time {on_time_us:.1}us exceeds the {max_on_time_us}us ceiling"
            ),
            LimitError::OnTimeOutOfRange {
                on_time_us,
                max_on_time_us,
            } => write!(
                f,
                "on-time {on_time_us}us must be between 1 and {max_on_time_us}us"
            ),
            LimitError::InvalidRate { bps } => {
                write!(f, "burst rate {bps} must be a positive number")
            }
            LimitError::DutyCycleExceeded {
                duty_pct,
                max_duty_cycle_pct,
            } => write!(
                f,
                "duty cycle {duty_pct:.3}% exceeds the {max_duty_cycle_pct}% maximum"
            ),
            LimitError::DutyOutOfRange { duty_pct } => {
                write!(f, "duty cycle {duty_pct}% must be within 0-100%")
            }
            LimitError::InvalidFrequency { frequency_hz } => {
                write!(f, "frequency {frequency_hz}Hz must be positive")
            }
            LimitError::InvalidLimits(reason) => write!(f, "invalid safety limits: {reason}"),
        }
    }
}

impl std::error::Error for LimitError {}

/// Applies [`SafetyLimits`] to timing requests.
#[derive(Debug)]
pub struct SafetyLimiter {
    limits: SafetyLimits,
    midi_on_time_us: AtomicU32,
}

impl SafetyLimiter {
    pub fn new(limits: SafetyLimits) -> Result<Self, LimitError> {
        limits.check()?;
        Ok(Self {
            limits,
            midi_on_time_us: AtomicU32::new(limits.max_midi_on_time_us),
        })
    }

    /// Current limits, including the live playback on-time.
    #[must_use]
    pub fn limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_midi_on_time_us: self.midi_on_time_us(),
            ..self.limits
        }
    }

    #[must_use]
    pub fn max_on_time_us(&self) -> u32 {
        self.limits.max_on_time_us
    }

    #[must_use]
    pub fn midi_on_time_us(&self) -> u32 {
        self.midi_on_time_us.load(Ordering::Acquire)
    }

    /// Accepts `1..=max_on_time_us`.
    pub fn set_midi_max_on_time(&self, on_time_us: u32) -> Result<(), LimitError> {
        if on_time_us == 0 || on_time_us > self.limits.max_on_time_us {
            return Err(LimitError::OnTimeOutOfRange {
                on_time_us,
                max_on_time_us: self.limits.max_on_time_us,
            });
        }
        self.midi_on_time_us.store(on_time_us, Ordering::Release);
        Ok(())
    }

    /// Caps a single pulse to the ceiling. Never fails.
    #[must_use]
    pub fn clamp_single_pulse(&self, on_time_us: u32) -> u32 {
        let clamped = on_time_us.min(self.limits.max_on_time_us);
        if clamped != on_time_us {
            warn!(
                "limits: single pulse clamped requested={on_time_us}us applied={clamped}us"
            );
        }
        clamped
    }

    /// Fixed on/off timing. A short off-time is rejected; a long on-time is
    /// clamped with a warning.
    pub fn validate_pwm(&self, on_time_us: u32, off_time_ms: u32) -> Result<PulseSpec, LimitError> {
        if off_time_ms < self.limits.min_off_time_ms {
            return Err(LimitError::OffTimeTooSmall {
                off_time_ms: f64::from(off_time_ms),
                min_off_time_ms: self.limits.min_off_time_ms,
            });
        }

        let on_time_us = if on_time_us > self.limits.max_on_time_us {
            warn!(
                "limits: pwm on-time clamped requested={on_time_us}us applied={}us",
                self.limits.max_on_time_us
            );
            self.limits.max_on_time_us
        } else {
            on_time_us
        };

        let on_ms = f64::from(on_time_us) / MICROS_PER_MILLI;
        let total_ms = on_ms + f64::from(off_time_ms);
        if total_ms <= 0.0 {
            return Err(LimitError::OffTimeTooSmall {
                off_time_ms: f64::from(off_time_ms),
                min_off_time_ms: self.limits.min_off_time_ms,
            });
        }

        Ok(PulseSpec {
            on_time_us,
            frequency_hz: MILLIS_PER_SECOND / total_ms,
            duty: DutyCycle::from_fraction(on_ms / total_ms),
        })
    }

    /// Duty/frequency timing. Strict: an on-time above the ceiling is an error.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn validate_duty(&self, duty_pct: f64, frequency_hz: u32) -> Result<PulseSpec, LimitError> {
        if frequency_hz == 0 {
            return Err(LimitError::InvalidFrequency { frequency_hz });
        }
        if !(0.0..=100.0).contains(&duty_pct) {
            return Err(LimitError::DutyOutOfRange { duty_pct });
        }

        let period_us = MICROS_PER_SECOND / f64::from(frequency_hz);
        let on_time_us = duty_pct / 100.0 * period_us;
        if on_time_us > f64::from(self.limits.max_on_time_us) {
            return Err(LimitError::OnTimeExceedsLimit {
                on_time_us,
                max_on_time_us: self.limits.max_on_time_us,
            });
        }

        Ok(PulseSpec {
            on_time_us: on_time_us.floor() as u32,
            frequency_hz: f64::from(frequency_hz),
            duty: DutyCycle::from_fraction(duty_pct / 100.0),
        })
    }

    /// Burst timing. Checks run in a fixed order and the first failure wins:
    /// rate, on-time range, off-time, duty cycle.
    pub fn validate_burst(&self, bps: f64, on_time_us: u32) -> Result<PulseSpec, LimitError> {
        if !bps.is_finite() || bps <= 0.0 {
            return Err(LimitError::InvalidRate { bps });
        }

        if on_time_us == 0 || on_time_us > self.limits.max_on_time_us {
            return Err(LimitError::OnTimeOutOfRange {
                on_time_us,
                max_on_time_us: self.limits.max_on_time_us,
            });
        }

        let period_ms = MILLIS_PER_SECOND / bps;
        let on_ms = f64::from(on_time_us) / MICROS_PER_MILLI;
        let off_time_ms = period_ms - on_ms;
        if off_time_ms < f64::from(self.limits.min_off_time_ms) {
            return Err(LimitError::OffTimeTooSmall {
                off_time_ms,
                min_off_time_ms: self.limits.min_off_time_ms,
            });
        }

        let duty_pct = on_ms / period_ms * 100.0;
        if duty_pct > self.limits.max_duty_cycle_pct {
            return Err(LimitError::DutyCycleExceeded {
                duty_pct,
                max_duty_cycle_pct: self.limits.max_duty_cycle_pct,
            });
        }

        Ok(PulseSpec {
            on_time_us,
            frequency_hz: bps,
            duty: DutyCycle::from_fraction(duty_pct / 100.0),
        })
    }

    /// Duty that yields the playback on-time at `frequency_hz`, capped at 100 %.
    #[must_use]
    pub fn midi_note_drive(&self, frequency_hz: f64) -> DutyCycle {
        let fraction = f64::from(self.midi_on_time_us()) * frequency_hz / MICROS_PER_SECOND;
        DutyCycle::from_fraction(fraction.min(1.0))
    }
}
