//! Timed note playback.
//!
//! A playback stream is a headerless sequence of 5-byte little-endian records
//! `(u16 delay_ms, u8 event_type, u8 note, u8 velocity)`. Each delay is
//! relative to the previous event. [`NoteEventReader`] decodes the stream
//! lazily, [`session::PlaybackSession`] schedules it onto a [`session::NoteSink`].

use core::fmt;
use core::time::Duration;
use std::io::{self, Read};

pub mod library;
pub mod notes;
pub mod session;

pub use library::{LibraryError, MemoryLibrary, PlaybackLibrary};
pub use notes::{ActiveNotes, MAX_POLYPHONY, NoteOutput, PlaybackPolicy};
pub use session::{
    CancelToken, NoteSink, PlaybackFault, PlaybackReport, PlaybackSession, PlaybackSettings,
    PlaybackState, SinkError, SkipReason,
};

/// Size of one encoded [`NoteEvent`].
pub const NOTE_RECORD_LEN: usize = 5;

pub const NOTE_ON: u8 = 0x90;
pub const NOTE_OFF: u8 = 0x80;

/// Highest valid note number.
pub const MAX_NOTE: u8 = 127;

/// Event discriminant carried in the record's second field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    /// Any other status byte. Skipped during playback.
    Other(u8),
}

impl EventKind {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            NOTE_ON => EventKind::NoteOn,
            NOTE_OFF => EventKind::NoteOff,
            other => EventKind::Other(other),
        }
    }

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            EventKind::NoteOn => NOTE_ON,
            EventKind::NoteOff => NOTE_OFF,
            EventKind::Other(raw) => raw,
        }
    }
}

/// One decoded playback record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteEvent {
    /// Milliseconds since the previous event.
    pub delay_ms: u16,
    pub kind: EventKind,
    pub note: u8,
    pub velocity: u8,
}

impl NoteEvent {
    #[must_use]
    pub const fn note_on(delay_ms: u16, note: u8, velocity: u8) -> Self {
        Self {
            delay_ms,
            kind: EventKind::NoteOn,
            note,
            velocity,
        }
    }

    #[must_use]
    pub const fn note_off(delay_ms: u16, note: u8) -> Self {
        Self {
            delay_ms,
            kind: EventKind::NoteOff,
            note,
            velocity: 0,
        }
    }

    #[must_use]
    pub const fn from_le_bytes(record: [u8; NOTE_RECORD_LEN]) -> Self {
        Self {
            delay_ms: u16::from_le_bytes([record[0], record[1]]),
            kind: EventKind::from_raw(record[2]),
            note: record[3],
            velocity: record[4],
        }
    }

    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; NOTE_RECORD_LEN] {
        let delay = self.delay_ms.to_le_bytes();
        [delay[0], delay[1], self.kind.to_raw(), self.note, self.velocity]
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms as u64)
    }
}

/// Encodes events into the binary playback format.
#[must_use]
pub fn encode_events(events: &[NoteEvent]) -> Vec<u8> {
    events.iter().flat_map(|event| event.to_le_bytes()).collect()
}

/// Equal-tempered frequency of a note, A4 (69) = 440 Hz.
///
/// Octaves are applied as exact powers of two so octave multiples of A4 come
/// out exact.
#[must_use]
pub fn note_frequency(note: u8) -> f64 {
    let offset = i32::from(note) - 69;
    let octaves = offset.div_euclid(12);
    let semitones = offset.rem_euclid(12);
    440.0 * 2f64.powi(octaves) * (f64::from(semitones) / 12.0).exp2()
}

/// Malformed playback input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The stream ended partway through a record.
    Truncated { offset: u64, len: usize },
    /// Note number above [`MAX_NOTE`].
    InvalidNote { offset: u64, note: u8 },
    /// The underlying reader failed.
    Io(io::ErrorKind),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { offset, len } => write!(
                f,
                "truncated record at byte {offset} ({len} of {NOTE_RECORD_LEN} bytes)"
            ),
            DecodeError::InvalidNote { offset, note } => {
                write!(f, "note {note} out of range at byte {offset}")
            }
            DecodeError::Io(kind) => write!(f, "read failed: {kind}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Streaming decoder over any byte source.
///
/// Yields `Err` at most once; the iterator is fused after the first error.
#[derive(Debug)]
pub struct NoteEventReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> NoteEventReader<R> {
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next record.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self, record: &mut [u8; NOTE_RECORD_LEN]) -> Result<usize, DecodeError> {
        let mut filled = 0;
        while filled < NOTE_RECORD_LEN {
            match self.inner.read(&mut record[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(DecodeError::Io(error.kind())),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for NoteEventReader<R> {
    type Item = Result<NoteEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let offset = self.offset;
        let mut record = [0u8; NOTE_RECORD_LEN];
        let item = match self.fill(&mut record) {
            Ok(0) => None,
            Ok(len) if len < NOTE_RECORD_LEN => Some(Err(DecodeError::Truncated { offset, len })),
            Ok(_) => {
                let event = NoteEvent::from_le_bytes(record);
                self.offset += NOTE_RECORD_LEN as u64;
                if event.note > MAX_NOTE {
                    Some(Err(DecodeError::InvalidNote {
                        offset,
                        note: event.note,
                    }))
                } else {
                    return Some(Ok(event));
                }
            }
            Err(error) => Some(Err(error)),
        };

        self.done = true;
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_and_a5_are_exact() {
        assert_eq!(note_frequency(69), 440.0);
        assert_eq!(note_frequency(81), 880.0);
        assert_eq!(note_frequency(57), 220.0);
    }

    #[test]
    fn middle_c_is_near_261_hz() {
        assert!((note_frequency(60) - 261.625_565).abs() < 1e-5);
        assert!((note_frequency(0) - 8.175_798_9).abs() < 1e-6);
        assert!((note_frequency(127) - 12_543.853_95).abs() < 1e-4);
    }

    #[test]
    fn decodes_little_endian_records_in_order() {
        let bytes = [0x00, 0x00, 0x90, 60, 100, 0xF4, 0x01, 0x80, 60, 0];
        let events: Vec<_> = NoteEventReader::new(&bytes[..])
            .collect::<Result<_, _>>()
            .expect("stream is well formed");

        assert_eq!(
            events,
            [NoteEvent::note_on(0, 60, 100), NoteEvent::note_off(500, 60)]
        );
        assert_eq!(events[1].delay(), Duration::from_millis(500));
    }

    #[test]
    fn trailing_partial_record_is_a_decode_error() {
        let mut bytes = encode_events(&[NoteEvent::note_on(10, 64, 90)]);
        bytes.extend_from_slice(&[0x01, 0x00, 0x90]);

        let mut reader = NoteEventReader::new(&bytes[..]);
        assert!(matches!(reader.next(), Some(Ok(_))));
        assert_eq!(
            reader.next(),
            Some(Err(DecodeError::Truncated { offset: 5, len: 3 }))
        );
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn out_of_range_note_is_rejected() {
        let bytes = [0x00, 0x00, 0x90, 200, 1];
        let mut reader = NoteEventReader::new(&bytes[..]);
        assert_eq!(
            reader.next(),
            Some(Err(DecodeError::InvalidNote {
                offset: 0,
                note: 200
            }))
        );
    }

    #[test]
    fn unknown_status_bytes_decode_as_other() {
        let event = NoteEvent::from_le_bytes([0x05, 0x00, 0xB0, 7, 127]);
        assert_eq!(event.kind, EventKind::Other(0xB0));
        assert_eq!(event.to_le_bytes(), [0x05, 0x00, 0xB0, 7, 127]);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let mut reader = NoteEventReader::new(io::empty());
        assert_eq!(reader.next(), None);
        assert_eq!(reader.offset(), 0);
    }
}
