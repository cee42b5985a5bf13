//! Shared status surface for the console.
//!
//! [`StatusSnapshot`] collects everything the `status` command reports in one
//! pass, and [`StatusFormatter`] keeps the rendering identical across
//! front-ends.

use core::fmt;
use core::time::Duration;

use crate::controller::DriveMode;
use crate::link::LinkStatus;
use crate::power::PowerState;
use crate::telemetry::TelemetryRecord;

/// Snapshot of the state surfaced by `status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub mode: DriveMode,
    pub playing: bool,
    pub burst_active: bool,
    pub power: PowerState,
    pub midi_on_time_us: u32,
    pub max_on_time_us: u32,
    pub link: LinkStatus,
}

/// Helper that renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the drive line (e.g. `drive mode=burst playing=false burst=on`).
    pub fn write_drive_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "drive mode={} playing={} burst={} max-on={}us midi-limit={}us",
            snapshot.mode,
            snapshot.playing,
            on_off(snapshot.burst_active),
            snapshot.max_on_time_us,
            snapshot.midi_on_time_us
        )
    }

    /// Writes the power line (e.g. `power phase=softstart progress=45% ...`).
    pub fn write_power_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let power = self.snapshot.power;
        write!(
            writer,
            "power phase={} progress={}% softstart={} full-power={}",
            power.phase(),
            power.progress,
            on_off(power.softstart_active),
            on_off(power.full_power)
        )
    }

    pub fn write_link_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(writer, "link={}", self.snapshot.link)
    }
}

/// Writes one `events` line (e.g. `#12 +3.4s mode-entered burst`).
pub fn write_event_line<W: fmt::Write>(writer: &mut W, record: &TelemetryRecord) -> fmt::Result {
    write!(writer, "#{} ", record.id)?;
    write_duration(writer, record.timestamp)?;
    write!(writer, " {}", record.event)
}

/// Writes a power state as a single line for `power status`.
pub fn write_power_state<W: fmt::Write>(writer: &mut W, power: &PowerState) -> fmt::Result {
    write!(
        writer,
        "phase={} progress={}%",
        power.phase(),
        power.progress
    )
}

const fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn write_duration<W: fmt::Write>(writer: &mut W, value: Duration) -> fmt::Result {
    if value >= Duration::from_secs(1) {
        let millis = value.as_millis();
        let seconds = millis / 1_000;
        let tenths = (millis % 1_000) / 100;
        write!(writer, "+{seconds}.{tenths}s")
    } else if value >= Duration::from_millis(1) {
        write!(writer, "+{}ms", value.as_millis())
    } else {
        write!(writer, "+{}us", value.as_micros())
    }
}
