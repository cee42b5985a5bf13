//! Playback session scheduling.
//!
//! A session walks a decoded event stream against a [`Timebase`], holding a
//! running reference timestamp so relative delays never accumulate drift. All
//! output goes through a [`NoteSink`]; [`NoteSink::finish`] runs from a drop
//! guard, so cleanup happens on every exit path including decode errors and
//! panics in the sink.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use super::notes::{ActiveNotes, NoteOutput, PlaybackPolicy};
use super::{DecodeError, EventKind, NoteEvent, note_frequency};
use crate::hardware::HardwareError;
use crate::limits::{DutyCycle, SafetyLimiter};
use crate::timing::Timebase;

/// Cooperative cancellation flag handed to a playback task.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sink write failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkError {
    /// The session lost ownership of the output.
    Cancelled,
    Hardware(HardwareError),
}

impl From<HardwareError> for SinkError {
    fn from(error: HardwareError) -> Self {
        SinkError::Hardware(error)
    }
}

/// Why a note-on did not sound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Arrived inside the retrigger lockout window.
    Lockout,
    /// Polyphony cap reached.
    VoicesExhausted,
}

/// Output side of a playback session.
pub trait NoteSink {
    /// Programs periodic drive for a sounding note.
    fn sound(&mut self, frequency_hz: f64, duty: DutyCycle) -> Result<(), SinkError>;

    /// Fires a single pulse for a note.
    fn strike(&mut self, width_us: u32) -> Result<(), SinkError>;

    /// Zeroes the output.
    fn silence(&mut self) -> Result<(), SinkError>;

    fn is_cancelled(&self) -> bool;

    /// Observes skipped notes.
    fn skipped(&mut self, note: u8, reason: SkipReason) {
        let _ = (note, reason);
    }

    /// Runs exactly once when the session ends.
    fn finish(&mut self, state: &PlaybackState);
}

/// Terminal failure of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackFault {
    Decode(DecodeError),
    Hardware(HardwareError),
}

impl fmt::Display for PlaybackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackFault::Decode(error) => write!(f, "decode: {error}"),
            PlaybackFault::Hardware(error) => write!(f, "hardware: {error}"),
        }
    }
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Loading,
    Running,
    Completed,
    Aborted,
    Error(PlaybackFault),
}

impl PlaybackState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackState::Completed | PlaybackState::Aborted | PlaybackState::Error(_)
        )
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            PlaybackState::Loading => "loading",
            PlaybackState::Running => "running",
            PlaybackState::Completed => "completed",
            PlaybackState::Aborted => "aborted",
            PlaybackState::Error(_) => "error",
        }
    }
}

/// Playback tuning taken from the controller configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub policy: PlaybackPolicy,
    /// Minimum spacing between two note triggers.
    pub note_block_time: Duration,
    pub output: NoteOutput,
}

impl PlaybackSettings {
    #[must_use]
    pub const fn new(policy: PlaybackPolicy, note_block_time: Duration, output: NoteOutput) -> Self {
        Self {
            policy,
            note_block_time,
            output,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::new(
            PlaybackPolicy::Mono,
            Duration::from_micros(1_000),
            NoteOutput::Pwm,
        )
    }
}

/// Summary of a finished session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    pub state: PlaybackState,
    pub events: u32,
    pub sounded: u32,
    pub blocked: u32,
    pub dropped: u32,
    /// Timebase offset at which the session ended.
    pub ended_at: Duration,
}

/// Calls [`NoteSink::finish`] when dropped.
struct FinishGuard<S: NoteSink> {
    sink: S,
    state: PlaybackState,
}

impl<S: NoteSink> Drop for FinishGuard<S> {
    fn drop(&mut self) {
        self.sink.finish(&self.state);
    }
}

/// Scheduler for one pass over an event stream.
pub struct PlaybackSession<'a, T: ?Sized> {
    timebase: &'a T,
    limiter: &'a SafetyLimiter,
    settings: PlaybackSettings,
    notes: ActiveNotes,
    last_trigger: Option<Duration>,
    report: PlaybackReport,
}

impl<'a, T: Timebase + ?Sized> PlaybackSession<'a, T> {
    pub fn new(timebase: &'a T, limiter: &'a SafetyLimiter, settings: PlaybackSettings) -> Self {
        Self {
            timebase,
            limiter,
            settings,
            notes: ActiveNotes::new(settings.policy),
            last_trigger: None,
            report: PlaybackReport {
                state: PlaybackState::Loading,
                events: 0,
                sounded: 0,
                blocked: 0,
                dropped: 0,
                ended_at: Duration::ZERO,
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.report.state
    }

    /// Plays `events` to completion, cancellation or the first fault.
    pub fn run<I, S>(mut self, events: I, sink: S) -> PlaybackReport
    where
        I: IntoIterator<Item = Result<NoteEvent, DecodeError>>,
        S: NoteSink,
    {
        let state = self.play(events, sink);
        self.report.state = state;
        self.report.ended_at = self.timebase.now();
        info!(
            "playback: {} events={} sounded={} blocked={} dropped={} t={}ms",
            state.label(),
            self.report.events,
            self.report.sounded,
            self.report.blocked,
            self.report.dropped,
            self.report.ended_at.as_millis()
        );
        self.report
    }

    fn play<I, S>(&mut self, events: I, sink: S) -> PlaybackState
    where
        I: IntoIterator<Item = Result<NoteEvent, DecodeError>>,
        S: NoteSink,
    {
        self.report.state = PlaybackState::Running;
        let mut guard = FinishGuard {
            sink,
            state: PlaybackState::Running,
        };
        guard.state = self.drive(events, &mut guard.sink);
        guard.state
    }

    fn drive<I, S>(&mut self, events: I, sink: &mut S) -> PlaybackState
    where
        I: IntoIterator<Item = Result<NoteEvent, DecodeError>>,
        S: NoteSink,
    {
        let mut reference = self.timebase.now();

        for item in events {
            if sink.is_cancelled() {
                return PlaybackState::Aborted;
            }

            let event = match item {
                Ok(event) => event,
                Err(error) => {
                    warn!("playback: decode failed {error}");
                    return PlaybackState::Error(PlaybackFault::Decode(error));
                }
            };

            let deadline = reference + event.delay();
            self.timebase.wait_until(deadline);
            reference = deadline;
            self.report.events += 1;

            match self.handle(event, sink) {
                Ok(()) => {}
                Err(SinkError::Cancelled) => return PlaybackState::Aborted,
                Err(SinkError::Hardware(error)) => {
                    error!("playback: output fault {error}");
                    return PlaybackState::Error(PlaybackFault::Hardware(error));
                }
            }
        }

        PlaybackState::Completed
    }

    fn handle<S: NoteSink>(&mut self, event: NoteEvent, sink: &mut S) -> Result<(), SinkError> {
        match event.kind {
            EventKind::NoteOn => self.note_on(event.note, sink),
            EventKind::NoteOff => {
                if self.notes.release(event.note) {
                    debug!("playback: note-off {} silence", event.note);
                    sink.silence()?;
                }
                Ok(())
            }
            EventKind::Other(raw) => {
                debug!("playback: skipping status 0x{raw:02x}");
                Ok(())
            }
        }
    }

    fn note_on<S: NoteSink>(&mut self, note: u8, sink: &mut S) -> Result<(), SinkError> {
        let now = self.timebase.now();
        if let Some(last) = self.last_trigger {
            let since = now.saturating_sub(last);
            if since < self.settings.note_block_time {
                warn!(
                    "playback: note {note} blocked {}us after previous trigger",
                    since.as_micros()
                );
                self.report.blocked += 1;
                sink.skipped(note, SkipReason::Lockout);
                return Ok(());
            }
        }

        if !self.notes.press(note) {
            warn!("playback: note {note} dropped, all voices busy");
            self.report.dropped += 1;
            sink.skipped(note, SkipReason::VoicesExhausted);
            return Ok(());
        }

        match self.settings.output {
            NoteOutput::Pwm => {
                let frequency_hz = note_frequency(note);
                let duty = self.limiter.midi_note_drive(frequency_hz);
                debug!("playback: note-on {note} freq={frequency_hz:.2}Hz duty={duty}");
                sink.sound(frequency_hz, duty)?;
            }
            NoteOutput::Trigger => {
                let width_us = self.limiter.midi_on_time_us();
                debug!("playback: note-on {note} strike={width_us}us");
                sink.strike(width_us)?;
            }
        }

        self.last_trigger = Some(now);
        self.report.sounded += 1;
        Ok(())
    }
}
