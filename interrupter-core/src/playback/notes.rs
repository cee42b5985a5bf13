//! Active-note tracking for the two playback policies.

use heapless::Vec;
use serde::Deserialize;

/// Hard cap on simultaneously tracked notes.
pub const MAX_POLYPHONY: usize = 4;

/// How overlapping notes are handled. Fixed for the lifetime of a controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PlaybackPolicy {
    /// A new note replaces the sounding one; only that note's release silences.
    #[default]
    Mono,
    /// Up to `max_notes` (at most [`MAX_POLYPHONY`]) are tracked; the channel
    /// goes silent when the last one is released.
    Poly { max_notes: u8 },
}

impl PlaybackPolicy {
    /// Number of notes this policy tracks, clamped to `1..=MAX_POLYPHONY`.
    #[must_use]
    pub fn capacity(self) -> usize {
        match self {
            PlaybackPolicy::Mono => 1,
            PlaybackPolicy::Poly { max_notes } => usize::from(max_notes).clamp(1, MAX_POLYPHONY),
        }
    }
}

/// Physical rendering of a sounding note.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteOutput {
    /// Periodic pulses at the note frequency.
    #[default]
    Pwm,
    /// One trigger pulse per note-on. Bench diagnostic for checking the output
    /// stage without sustained drive.
    Trigger,
}

/// Notes currently sounding under a [`PlaybackPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveNotes {
    policy: PlaybackPolicy,
    notes: Vec<u8, MAX_POLYPHONY>,
}

impl ActiveNotes {
    #[must_use]
    pub fn new(policy: PlaybackPolicy) -> Self {
        Self {
            policy,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> PlaybackPolicy {
        self.policy
    }

    /// Registers a note-on. Returns `false` when the note must be dropped
    /// because the polyphony cap is reached.
    pub fn press(&mut self, note: u8) -> bool {
        match self.policy {
            PlaybackPolicy::Mono => {
                self.notes.clear();
                self.notes.push(note).is_ok()
            }
            PlaybackPolicy::Poly { .. } => {
                if self.notes.contains(&note) {
                    return true;
                }
                if self.notes.len() >= self.policy.capacity() {
                    return false;
                }
                self.notes.push(note).is_ok()
            }
        }
    }

    /// Registers a note-off. Returns `true` when the channel must be silenced.
    pub fn release(&mut self, note: u8) -> bool {
        match self.policy {
            PlaybackPolicy::Mono => {
                if self.notes.first() == Some(&note) {
                    self.notes.clear();
                    true
                } else {
                    false
                }
            }
            PlaybackPolicy::Poly { .. } => match self.notes.iter().position(|held| *held == note) {
                Some(index) => {
                    self.notes.remove(index);
                    self.notes.is_empty()
                }
                None => false,
            },
        }
    }

    #[must_use]
    pub fn sounding(&self) -> &[u8] {
        &self.notes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
