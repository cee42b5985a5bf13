//! Guarded access to the interrupter output.

use core::ops::{Deref, DerefMut};
use std::sync::MutexGuard;
use std::sync::atomic::Ordering;

use log::{error, warn};

use super::Shared;
use crate::hardware::{HardwareError, PulseChannel, TRIGGER_MAX_WIDTH_US, Waveform};
use crate::limits::DutyCycle;
use crate::playback::{CancelToken, NoteSink, PlaybackState, SinkError, SkipReason};
use crate::telemetry::TelemetryEvent;
use crate::timing::Timebase;

/// Locked channel that halts on drop unless the new mode was committed.
pub(super) struct ArmedOutput<'a, C: PulseChannel> {
    channel: MutexGuard<'a, C>,
    committed: bool,
}

impl<'a, C: PulseChannel> ArmedOutput<'a, C> {
    pub(super) fn new(channel: MutexGuard<'a, C>) -> Self {
        Self {
            channel,
            committed: false,
        }
    }

    pub(super) fn commit(mut self) {
        self.committed = true;
    }
}

impl<C: PulseChannel> Deref for ArmedOutput<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: PulseChannel> DerefMut for ArmedOutput<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: PulseChannel> Drop for ArmedOutput<'_, C> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        warn!("controller: programming failed, halting output");
        if let Err(error) = self.channel.halt() {
            error!("controller: halt after failed programming failed {error}");
        }
    }
}

/// Fires one pulse of `width_us`.
///
/// Widths up to [`TRIGGER_MAX_WIDTH_US`] use the trigger primitive; its timing
/// resolution does not hold above that, so longer pulses go out as an explicit
/// two-edge waveform.
pub(super) fn fire_single_pulse<C: PulseChannel + ?Sized>(
    channel: &mut C,
    width_us: u32,
) -> Result<(), HardwareError> {
    if width_us <= TRIGGER_MAX_WIDTH_US {
        channel.trigger(width_us)
    } else {
        channel.transmit(&Waveform::single_pulse(width_us))
    }
}

/// Playback output bound to one session's cancel token.
///
/// Every write re-checks the token under the channel lock, so nothing from a
/// cancelled session reaches the channel once the next transition holds it.
pub(super) struct ChannelSink<'a, C, T> {
    shared: &'a Shared<C, T>,
    token: CancelToken,
}

impl<'a, C: PulseChannel, T: Timebase> ChannelSink<'a, C, T> {
    pub(super) fn new(shared: &'a Shared<C, T>, token: CancelToken) -> Self {
        Self { shared, token }
    }

    fn write<F>(&self, op: F) -> Result<(), SinkError>
    where
        F: FnOnce(&mut C) -> Result<(), HardwareError>,
    {
        let mut channel = self.shared.channel();
        if self.token.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        op(&mut *channel).map_err(SinkError::from)
    }
}

impl<C: PulseChannel, T: Timebase> NoteSink for ChannelSink<'_, C, T> {
    fn sound(&mut self, frequency_hz: f64, duty: DutyCycle) -> Result<(), SinkError> {
        self.write(|channel| channel.set_pwm(frequency_hz, duty))
    }

    fn strike(&mut self, width_us: u32) -> Result<(), SinkError> {
        self.write(|channel| fire_single_pulse(channel, width_us))
    }

    fn silence(&mut self) -> Result<(), SinkError> {
        self.write(|channel| channel.set_pwm(0.0, DutyCycle::ZERO))
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn skipped(&mut self, note: u8, reason: SkipReason) {
        self.shared.record(match reason {
            SkipReason::Lockout => TelemetryEvent::NoteBlocked(note),
            SkipReason::VoicesExhausted => TelemetryEvent::NoteDropped(note),
        });
    }

    fn finish(&mut self, state: &PlaybackState) {
        let mut channel = self.shared.channel();
        // A cancelled session's outputs were already stopped by whoever
        // cancelled it, and the channel may belong to a newer mode by now.
        if self.token.is_cancelled() {
            return;
        }
        if let Err(error) = channel.halt() {
            error!("playback: cleanup halt failed after {} {error}", state.label());
        }
        self.shared.playing.store(false, Ordering::Release);
    }
}
