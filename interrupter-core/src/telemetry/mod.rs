//! Bounded history of controller events.
//!
//! Every mode transition, rejected request, skipped note and relay change is
//! recorded with its timebase offset into a fixed-size ring. The console
//! renders the ring oldest-first; the oldest records are overwritten once the
//! ring is full.

use core::fmt;
use core::time::Duration;
use std::sync::Mutex;

use heapless::HistoryBuf;

use crate::controller::DriveMode;
use crate::hardware::{HardwareError, Relay, RelayState};
use crate::limits::LimitError;
use crate::lock;
use crate::playback::PlaybackState;

/// Identifier assigned to each record in arrival order.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Discriminated controller events.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TelemetryEvent {
    ModeEntered(DriveMode),
    OutputsStopped,
    LimitRejected(LimitError),
    NoteBlocked(u8),
    NoteDropped(u8),
    PlaybackFinished(PlaybackState),
    Relay(Relay, RelayState),
    PowerFault(HardwareError),
    HardwareFault(HardwareError),
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::ModeEntered(mode) => write!(f, "mode-entered {mode}"),
            TelemetryEvent::OutputsStopped => f.write_str("outputs-stopped"),
            TelemetryEvent::LimitRejected(error) => write!(f, "limit-rejected {error}"),
            TelemetryEvent::NoteBlocked(note) => write!(f, "note-blocked {note}"),
            TelemetryEvent::NoteDropped(note) => write!(f, "note-dropped {note}"),
            TelemetryEvent::PlaybackFinished(state) => match state {
                PlaybackState::Error(fault) => write!(f, "playback-finished error ({fault})"),
                other => write!(f, "playback-finished {}", other.label()),
            },
            TelemetryEvent::Relay(relay, state) => write!(f, "relay {relay} {state}"),
            TelemetryEvent::PowerFault(error) => write!(f, "power-fault {error}"),
            TelemetryEvent::HardwareFault(error) => write!(f, "hardware-fault {error}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Duration,
    pub event: TelemetryEvent,
}

struct Ring {
    records: HistoryBuf<TelemetryRecord, TELEMETRY_RING_CAPACITY>,
    next_event_id: EventId,
}

/// Shared telemetry ring. Writers from any thread take a short lock.
pub struct TelemetryLog {
    ring: Mutex<Ring>,
}

impl TelemetryLog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                records: HistoryBuf::new(),
                next_event_id: 0,
            }),
        }
    }

    /// Appends an event, overwriting the oldest record when full.
    pub fn record(&self, timestamp: Duration, event: TelemetryEvent) -> EventId {
        let mut ring = lock(&self.ring);
        let id = ring.next_event_id;
        ring.next_event_id = ring.next_event_id.wrapping_add(1);
        ring.records.write(TelemetryRecord {
            id,
            timestamp,
            event,
        });
        id
    }

    /// Copies the retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        lock(&self.ring).records.oldest_ordered().copied().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<TelemetryRecord> {
        lock(&self.ring).records.recent().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.ring).records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TelemetryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryLog")
            .field("len", &self.len())
            .finish()
    }
}
