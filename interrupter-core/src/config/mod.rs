//! Controller configuration and the two board profiles.
//!
//! The mono and polyphonic boards differ in limits, pin map and note policy.
//! Neither is treated as canonical: a [`Profile`] picks one set wholesale and
//! [`ConfigOverrides`] adjusts individual values on top of it.

use core::fmt;
use core::time::Duration;

use serde::Deserialize;

use crate::hardware::pins::{POLY_BENCH_PINS, PinMap, STANDARD_PINS};
use crate::limits::SafetyLimits;
use crate::playback::{NoteOutput, PlaybackPolicy, PlaybackSettings};
use crate::power::DEFAULT_PRECHARGE;
use crate::timing::WaitStrategy;

/// Named board profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Mono board with active-low relays and a 1 % duty ceiling.
    #[default]
    Standard,
    /// Polyphonic bench board with active-high relays and no retrigger lockout.
    PolyBench,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Standard, Profile::PolyBench];

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Profile::Standard => "standard",
            Profile::PolyBench => "poly-bench",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.tag().eq_ignore_ascii_case(tag))
    }

    #[must_use]
    pub fn config(self) -> ControllerConfig {
        match self {
            Profile::Standard => ControllerConfig {
                profile: self,
                limits: SafetyLimits::new(200, 5, 1.0, 100),
                policy: PlaybackPolicy::Mono,
                note_block_time: Duration::from_micros(1_000),
                note_output: NoteOutput::Pwm,
                wait_strategy: WaitStrategy::default(),
                precharge: DEFAULT_PRECHARGE,
                pins: PinMap::new(&STANDARD_PINS),
            },
            Profile::PolyBench => ControllerConfig {
                profile: self,
                limits: SafetyLimits::new(125, 10, 10.0, 100),
                policy: PlaybackPolicy::Poly { max_notes: 4 },
                note_block_time: Duration::ZERO,
                note_output: NoteOutput::Pwm,
                wait_strategy: WaitStrategy::default(),
                precharge: DEFAULT_PRECHARGE,
                pins: PinMap::new(&POLY_BENCH_PINS),
            },
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Everything a controller needs at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerConfig {
    pub profile: Profile,
    pub limits: SafetyLimits,
    pub policy: PlaybackPolicy,
    /// Retrigger lockout between two note triggers.
    pub note_block_time: Duration,
    pub note_output: NoteOutput,
    pub wait_strategy: WaitStrategy,
    /// Softstart pre-charge hold.
    pub precharge: Duration,
    pub pins: PinMap,
}

impl ControllerConfig {
    #[must_use]
    pub const fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings::new(self.policy, self.note_block_time, self.note_output)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Profile::default().config()
    }
}

/// Partial configuration, typically read from a TOML file. Absent fields
/// keep the profile's value.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub profile: Option<Profile>,
    #[serde(default)]
    pub limits: LimitOverrides,
    #[serde(default)]
    pub playback: PlaybackOverrides,
    #[serde(default)]
    pub timing: TimingOverrides,
    #[serde(default)]
    pub power: PowerOverrides,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitOverrides {
    pub max_on_time_us: Option<u32>,
    pub min_off_time_ms: Option<u32>,
    pub max_duty_cycle_pct: Option<f64>,
    pub max_midi_on_time_us: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackOverrides {
    pub policy: Option<PlaybackPolicy>,
    pub note_block_time_us: Option<u64>,
    pub output: Option<NoteOutput>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingOverrides {
    pub wait: Option<WaitStrategy>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerOverrides {
    pub precharge_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Resolves against `fallback`, or against the file's own `profile` when
    /// it names one.
    #[must_use]
    pub fn resolve(self, fallback: Profile) -> ControllerConfig {
        let mut config = self.profile.unwrap_or(fallback).config();
        self.apply(&mut config);
        config
    }

    /// Writes every present field into `config`. Limits are not checked here;
    /// the controller rejects an invalid set at construction.
    pub fn apply(self, config: &mut ControllerConfig) {
        let limits = &mut config.limits;
        if let Some(value) = self.limits.max_on_time_us {
            limits.max_on_time_us = value;
        }
        if let Some(value) = self.limits.min_off_time_ms {
            limits.min_off_time_ms = value;
        }
        if let Some(value) = self.limits.max_duty_cycle_pct {
            limits.max_duty_cycle_pct = value;
        }
        if let Some(value) = self.limits.max_midi_on_time_us {
            limits.max_midi_on_time_us = value;
        }

        if let Some(policy) = self.playback.policy {
            config.policy = policy;
        }
        if let Some(us) = self.playback.note_block_time_us {
            config.note_block_time = Duration::from_micros(us);
        }
        if let Some(output) = self.playback.output {
            config.note_output = output;
        }
        if let Some(wait) = self.timing.wait {
            config.wait_strategy = wait;
        }
        if let Some(ms) = self.power.precharge_ms {
            config.precharge = Duration::from_millis(ms);
        }
    }
}
