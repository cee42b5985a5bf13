//! Drive-mode state machine.
//!
//! Every mode drives the same interrupter output, so at most one is active at
//! a time. A transition holds the mode lock from start to finish: it cancels
//! any playback session, stops every output path, validates the request and
//! only then programs the channel. The channel itself sits behind a second
//! lock that is always taken after the mode lock, never before.

use core::fmt;
use core::time::Duration;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::hardware::{HardwareError, Level, PulseChannel, RelayDriver};
use crate::limits::{LimitError, PulseSpec, SafetyLimiter};
use crate::lock;
use crate::playback::{
    CancelToken, NoteEventReader, PlaybackReport, PlaybackSession, PlaybackSettings,
};
use crate::power::{PowerError, PowerSequencer, PowerState};
use crate::telemetry::{TelemetryEvent, TelemetryLog};
use crate::timing::Timebase;

mod channel;

use channel::{ArmedOutput, ChannelSink, fire_single_pulse};

/// Mutually exclusive drive modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriveMode {
    #[default]
    Idle,
    SingleShot,
    FixedPwm,
    Burst,
    ContinuousWave,
    MidiPlayback,
}

impl DriveMode {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            DriveMode::Idle => "idle",
            DriveMode::SingleShot => "single-shot",
            DriveMode::FixedPwm => "fixed-pwm",
            DriveMode::Burst => "burst",
            DriveMode::ContinuousWave => "continuous-wave",
            DriveMode::MidiPlayback => "midi-playback",
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Byte source for a playback session.
pub struct NoteStream(Box<dyn Read + Send>);

impl NoteStream {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self(Box::new(reader))
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(bytes))
    }
}

impl Read for NoteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl fmt::Debug for NoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoteStream(..)")
    }
}

/// A requested mode together with its caller-supplied parameters.
#[derive(Debug)]
pub enum DriveRequest {
    SingleShot { on_time_us: u32 },
    FixedPwm { on_time_us: u32, off_time_ms: u32 },
    FixedPwmByDuty { duty_pct: f64, frequency_hz: u32 },
    Burst { bps: f64, on_time_us: u32 },
    ContinuousWave,
    Playback(NoteStream),
}

impl DriveRequest {
    /// Mode this request enters when it succeeds.
    #[must_use]
    pub const fn target(&self) -> DriveMode {
        match self {
            DriveRequest::SingleShot { .. } => DriveMode::SingleShot,
            DriveRequest::FixedPwm { .. } | DriveRequest::FixedPwmByDuty { .. } => {
                DriveMode::FixedPwm
            }
            DriveRequest::Burst { .. } => DriveMode::Burst,
            DriveRequest::ContinuousWave => DriveMode::ContinuousWave,
            DriveRequest::Playback(_) => DriveMode::MidiPlayback,
        }
    }
}

/// Redundant transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeError {
    /// The requested mode is already running; nothing was changed.
    AlreadyActive(DriveMode),
}

impl fmt::Display for ModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeError::AlreadyActive(mode) => write!(f, "{mode} already active"),
        }
    }
}

impl std::error::Error for ModeError {}

/// Error returned by controller operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DriveError {
    Limit(LimitError),
    Mode(ModeError),
    Hardware(HardwareError),
    Power(PowerError),
    /// The playback thread could not be started.
    Spawn(io::ErrorKind),
}

impl DriveError {
    /// `true` for the idempotent "already running" outcome.
    #[must_use]
    pub const fn is_already_active(&self) -> bool {
        matches!(
            self,
            DriveError::Mode(ModeError::AlreadyActive(_))
                | DriveError::Power(PowerError::AlreadyActive)
        )
    }
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveError::Limit(error) => write!(f, "{error}"),
            DriveError::Mode(error) => write!(f, "{error}"),
            DriveError::Hardware(error) => write!(f, "{error}"),
            DriveError::Power(error) => write!(f, "{error}"),
            DriveError::Spawn(kind) => write!(f, "could not start playback: {kind}"),
        }
    }
}

impl std::error::Error for DriveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriveError::Limit(error) => Some(error),
            DriveError::Mode(error) => Some(error),
            DriveError::Hardware(error) => Some(error),
            DriveError::Power(error) => Some(error),
            DriveError::Spawn(_) => None,
        }
    }
}

impl From<LimitError> for DriveError {
    fn from(error: LimitError) -> Self {
        DriveError::Limit(error)
    }
}

impl From<ModeError> for DriveError {
    fn from(error: ModeError) -> Self {
        DriveError::Mode(error)
    }
}

impl From<HardwareError> for DriveError {
    fn from(error: HardwareError) -> Self {
        DriveError::Hardware(error)
    }
}

impl From<PowerError> for DriveError {
    fn from(error: PowerError) -> Self {
        DriveError::Power(error)
    }
}

/// Result of [`DriveController::query_playback_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub playing: bool,
}

/// Result of [`DriveController::query_burst_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BurstStatus {
    pub active: bool,
}

struct SessionHandle {
    token: CancelToken,
    thread: Option<JoinHandle<PlaybackReport>>,
}

struct ModeState {
    mode: DriveMode,
    session: Option<SessionHandle>,
}

/// State shared with the playback thread.
struct Shared<C, T> {
    channel: Mutex<C>,
    timebase: Arc<T>,
    limiter: SafetyLimiter,
    settings: PlaybackSettings,
    playing: AtomicBool,
    /// Bumped for every session started; only the newest publishes its report.
    generation: AtomicU64,
    last_playback: Mutex<Option<PlaybackReport>>,
    telemetry: Arc<TelemetryLog>,
}

impl<C: PulseChannel, T: Timebase> Shared<C, T> {
    fn channel(&self) -> MutexGuard<'_, C> {
        lock(&self.channel)
    }

    fn record(&self, event: TelemetryEvent) {
        self.telemetry.record(self.timebase.now(), event);
    }

    fn play(&self, stream: NoteStream, token: CancelToken, generation: u64) -> PlaybackReport {
        let sink = ChannelSink::new(self, token);
        let report = PlaybackSession::new(&*self.timebase, &self.limiter, self.settings)
            .run(NoteEventReader::new(stream), sink);
        if self.generation.load(Ordering::Acquire) == generation {
            *lock(&self.last_playback) = Some(report);
        } else {
            debug!(
                "controller: superseded playback ended {}",
                report.state.label()
            );
        }
        self.record(TelemetryEvent::PlaybackFinished(report.state));
        report
    }
}

/// Top-level controller owning the interrupter output and the relays.
pub struct DriveController<C, R, T> {
    mode: Mutex<ModeState>,
    shared: Arc<Shared<C, T>>,
    power: PowerSequencer<R, Arc<T>>,
}

impl<C, R, T> DriveController<C, R, T>
where
    C: PulseChannel + 'static,
    R: RelayDriver + 'static,
    T: Timebase + 'static,
{
    /// Validates the configuration, stops the output, forces the relays to
    /// the safe state and announces readiness.
    pub fn new(
        mut channel: C,
        relays: R,
        timebase: T,
        config: &ControllerConfig,
    ) -> Result<Self, DriveError> {
        let limiter = SafetyLimiter::new(config.limits)?;
        channel.halt()?;

        let timebase = Arc::new(timebase);
        let telemetry = Arc::new(TelemetryLog::new());
        let power = PowerSequencer::new(
            relays,
            Arc::clone(&timebase),
            config.precharge,
            Arc::clone(&telemetry),
        )?;

        info!(
            "controller: ready max_on={}us min_off={}ms max_duty={}% policy={:?}",
            config.limits.max_on_time_us,
            config.limits.min_off_time_ms,
            config.limits.max_duty_cycle_pct,
            config.policy
        );

        Ok(Self {
            mode: Mutex::new(ModeState {
                mode: DriveMode::Idle,
                session: None,
            }),
            shared: Arc::new(Shared {
                channel: Mutex::new(channel),
                timebase,
                limiter,
                settings: config.playback_settings(),
                playing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                last_playback: Mutex::new(None),
                telemetry,
            }),
            power,
        })
    }

    /// Active mode. A playback session that has run out reads as idle.
    #[must_use]
    pub fn mode(&self) -> DriveMode {
        let mode = lock(&self.mode).mode;
        if mode == DriveMode::MidiPlayback && !self.playing() {
            DriveMode::Idle
        } else {
            mode
        }
    }

    fn playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Runs one mode transition.
    pub fn enter_mode(&self, request: DriveRequest) -> Result<(), DriveError> {
        let mut state = lock(&self.mode);
        let target = request.target();

        if target == DriveMode::ContinuousWave && state.mode == DriveMode::ContinuousWave {
            debug!("controller: continuous wave already on");
            return Ok(());
        }
        if target == DriveMode::MidiPlayback && self.playing() {
            return Err(ModeError::AlreadyActive(DriveMode::MidiPlayback).into());
        }

        self.stop_locked(&mut state)?;

        match self.apply(&mut state, request) {
            Ok(mode) => {
                state.mode = mode;
                info!("controller: mode {mode}");
                self.shared.record(TelemetryEvent::ModeEntered(mode));
                Ok(())
            }
            Err(DriveError::Limit(error)) => {
                warn!("controller: {target} rejected {error}");
                self.shared.record(TelemetryEvent::LimitRejected(error));
                Err(error.into())
            }
            Err(error) => {
                error!("controller: {target} failed {error}");
                if let DriveError::Hardware(fault) = error {
                    self.shared.record(TelemetryEvent::HardwareFault(fault));
                }
                Err(error)
            }
        }
    }

    /// Cancels playback and stops every output path. Mode is `Idle` afterwards
    /// even when the channel write fails.
    fn stop_locked(&self, state: &mut ModeState) -> Result<(), HardwareError> {
        // The session handle is kept after cancelling so join_playback can
        // still reap a thread that is waiting on its next event.
        if let Some(session) = state.session.as_mut() {
            session.token.cancel();
            if let Some(thread) = session.thread.take_if(|thread| thread.is_finished()) {
                let _ = thread.join();
            }
        }
        self.shared.playing.store(false, Ordering::Release);
        state.mode = DriveMode::Idle;

        let result = self.shared.channel().halt();
        self.shared.record(TelemetryEvent::OutputsStopped);
        if let Err(error) = result {
            error!("controller: stop failed {error}");
            self.shared.record(TelemetryEvent::HardwareFault(error));
        }
        result
    }

    fn apply(&self, state: &mut ModeState, request: DriveRequest) -> Result<DriveMode, DriveError> {
        let limiter = &self.shared.limiter;
        match request {
            DriveRequest::SingleShot { on_time_us } => {
                if on_time_us == 0 {
                    return Err(LimitError::OnTimeOutOfRange {
                        on_time_us,
                        max_on_time_us: limiter.max_on_time_us(),
                    }
                    .into());
                }
                let width_us = limiter.clamp_single_pulse(on_time_us);
                let mut output = ArmedOutput::new(self.shared.channel());
                fire_single_pulse(&mut *output, width_us)?;
                output.commit();
                info!("controller: single shot width={width_us}us");
                Ok(DriveMode::SingleShot)
            }
            DriveRequest::FixedPwm { on_time_us: 0, .. }
            | DriveRequest::Burst { on_time_us: 0, .. } => Ok(DriveMode::Idle),
            DriveRequest::FixedPwmByDuty { duty_pct, .. } if duty_pct <= 0.0 => {
                Ok(DriveMode::Idle)
            }
            DriveRequest::FixedPwm {
                on_time_us,
                off_time_ms,
            } => {
                let spec = limiter.validate_pwm(on_time_us, off_time_ms)?;
                self.program_pwm(spec)?;
                Ok(DriveMode::FixedPwm)
            }
            DriveRequest::FixedPwmByDuty {
                duty_pct,
                frequency_hz,
            } => {
                let spec = limiter.validate_duty(duty_pct, frequency_hz)?;
                self.program_pwm(spec)?;
                Ok(DriveMode::FixedPwm)
            }
            DriveRequest::Burst { bps, on_time_us } => {
                let spec = limiter.validate_burst(bps, on_time_us)?;
                self.program_pwm(spec)?;
                Ok(DriveMode::Burst)
            }
            DriveRequest::ContinuousWave => {
                let mut output = ArmedOutput::new(self.shared.channel());
                output.set_level(Level::High)?;
                output.commit();
                Ok(DriveMode::ContinuousWave)
            }
            DriveRequest::Playback(stream) => self.spawn_playback(state, stream),
        }
    }

    fn program_pwm(&self, spec: PulseSpec) -> Result<(), HardwareError> {
        let mut output = ArmedOutput::new(self.shared.channel());
        output.set_pwm(spec.frequency_hz, spec.duty)?;
        output.commit();
        info!(
            "controller: pwm freq={:.3}Hz duty={} on={}us",
            spec.frequency_hz, spec.duty, spec.on_time_us
        );
        Ok(())
    }

    fn spawn_playback(
        &self,
        state: &mut ModeState,
        stream: NoteStream,
    ) -> Result<DriveMode, DriveError> {
        if state
            .session
            .as_ref()
            .is_some_and(|stale| stale.thread.is_some())
        {
            debug!("controller: detaching cancelled playback thread");
        }

        let token = CancelToken::new();
        let shared = Arc::clone(&self.shared);
        let session_token = token.clone();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.playing.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("playback".into())
            .spawn(move || shared.play(stream, session_token, generation));

        match spawned {
            Ok(thread) => {
                state.session = Some(SessionHandle {
                    token,
                    thread: Some(thread),
                });
                Ok(DriveMode::MidiPlayback)
            }
            Err(error) => {
                self.shared.playing.store(false, Ordering::Release);
                Err(DriveError::Spawn(error.kind()))
            }
        }
    }

    /// Stops every output and returns to idle. Idempotent.
    pub fn exit_to_idle(&self) -> Result<(), HardwareError> {
        let mut state = lock(&self.mode);
        let previous = state.mode;
        let result = self.stop_locked(&mut state);
        if previous != DriveMode::Idle {
            info!("controller: mode idle from={previous}");
            self.shared.record(TelemetryEvent::ModeEntered(DriveMode::Idle));
        }
        result
    }

    pub fn enter_single_shot(&self, on_time_us: u32) -> Result<(), DriveError> {
        self.enter_mode(DriveRequest::SingleShot { on_time_us })
    }

    /// A zero on-time turns fixed PWM off.
    pub fn enter_fixed_pwm(&self, on_time_us: u32, off_time_ms: u32) -> Result<(), DriveError> {
        self.enter_mode(DriveRequest::FixedPwm {
            on_time_us,
            off_time_ms,
        })
    }

    /// A duty of zero or less turns fixed PWM off.
    pub fn enter_fixed_pwm_by_duty(&self, duty_pct: f64, frequency_hz: u32) -> Result<(), DriveError> {
        self.enter_mode(DriveRequest::FixedPwmByDuty {
            duty_pct,
            frequency_hz,
        })
    }

    /// A zero on-time turns the burst off.
    pub fn enter_burst(&self, bps: f64, on_time_us: u32) -> Result<(), DriveError> {
        self.enter_mode(DriveRequest::Burst { bps, on_time_us })
    }

    pub fn enter_continuous_wave(&self) -> Result<(), DriveError> {
        self.enter_mode(DriveRequest::ContinuousWave)
    }

    pub fn exit_continuous_wave(&self) -> Result<(), HardwareError> {
        self.exit_to_idle()
    }

    /// Starts a playback session on its own thread.
    ///
    /// Returns `ModeError::AlreadyActive` without touching the running session
    /// when one is still playing.
    pub fn start_playback(&self, stream: impl Read + Send + 'static) -> Result<(), DriveError> {
        self.enter_mode(DriveRequest::Playback(NoteStream::new(stream)))
    }

    /// Stops playback along with every other output.
    pub fn stop_playback(&self) -> Result<(), HardwareError> {
        self.exit_to_idle()
    }

    /// Waits for the most recent playback thread and returns its report.
    pub fn join_playback(&self) -> Option<PlaybackReport> {
        let thread = lock(&self.mode)
            .session
            .as_mut()
            .and_then(|session| session.thread.take())?;
        match thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("controller: playback thread panicked");
                None
            }
        }
    }

    /// Report of the most recently started session once it has ended.
    #[must_use]
    pub fn last_playback(&self) -> Option<PlaybackReport> {
        *lock(&self.shared.last_playback)
    }

    #[must_use]
    pub fn query_playback_status(&self) -> PlaybackStatus {
        PlaybackStatus {
            playing: self.playing(),
        }
    }

    #[must_use]
    pub fn query_burst_status(&self) -> BurstStatus {
        BurstStatus {
            active: self.mode() == DriveMode::Burst,
        }
    }

    /// Adjusts the per-note on-time used by playback. Takes effect at the next
    /// note, including in a running session.
    pub fn set_midi_max_on_time(&self, on_time_us: u32) -> Result<(), DriveError> {
        self.shared.limiter.set_midi_max_on_time(on_time_us)?;
        info!("controller: midi on-time {on_time_us}us");
        Ok(())
    }

    pub fn begin_power_sequence(&self) -> Result<(), PowerError> {
        self.power.begin_softstart()
    }

    /// Runs the power-up sequence on the caller's thread.
    pub fn power_on_blocking(&self) -> Result<(), PowerError> {
        self.power.power_on_blocking()
    }

    #[must_use]
    pub fn query_power_status(&self) -> PowerState {
        self.power.query_status()
    }

    pub fn end_power_sequence(&self) -> Result<(), HardwareError> {
        self.power.end_power_sequence()
    }

    #[must_use]
    pub fn power(&self) -> &PowerSequencer<R, Arc<T>> {
        &self.power
    }

    #[must_use]
    pub fn limiter(&self) -> &SafetyLimiter {
        &self.shared.limiter
    }

    #[must_use]
    pub fn playback_settings(&self) -> PlaybackSettings {
        self.shared.settings
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryLog {
        &self.shared.telemetry
    }

    #[must_use]
    pub fn timebase(&self) -> &T {
        &self.shared.timebase
    }

    /// Offset of the controller's timebase.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.shared.timebase.now()
    }
}

impl<C, R, T> Drop for DriveController<C, R, T> {
    fn drop(&mut self) {
        let session = lock(&self.mode).session.take();
        if let Some(session) = session {
            session.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_map_to_their_modes() {
        assert_eq!(
            DriveRequest::FixedPwmByDuty {
                duty_pct: 1.0,
                frequency_hz: 50
            }
            .target(),
            DriveMode::FixedPwm
        );
        assert_eq!(
            DriveRequest::Playback(NoteStream::from_bytes(Vec::new())).target(),
            DriveMode::MidiPlayback
        );
    }

    #[test]
    fn already_active_is_success_like() {
        let error = DriveError::from(ModeError::AlreadyActive(DriveMode::MidiPlayback));
        assert!(error.is_already_active());
        assert_eq!(error.to_string(), "midi-playback already active");
        assert!(!DriveError::Spawn(io::ErrorKind::Other).is_already_active());
    }
}
