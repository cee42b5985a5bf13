//! GPIO routing for the controller outputs.
//!
//! Two board revisions exist with different pin assignments and relay coil
//! polarity. The tables here are consumed by relay drivers to turn a logical
//! [`RelayState`] into a pin level, and by the console to label writes.

use super::{Level, Relay, RelayState};

/// Logical outputs wired on the controller board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputLine {
    Interrupter,
    Softstart,
    FullPower,
    ReadyLed,
    Speaker,
    FeedbackSwitch,
}

impl OutputLine {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OutputLine::Interrupter => "INTERRUPTER",
            OutputLine::Softstart => "SOFTSTART",
            OutputLine::FullPower => "FULLPOWER",
            OutputLine::ReadyLed => "READY_LED",
            OutputLine::Speaker => "SPEAKER",
            OutputLine::FeedbackSwitch => "FBSWITCH",
        }
    }
}

/// Level at which a line is considered asserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

impl Polarity {
    /// Pin level for the requested logical state.
    #[must_use]
    pub const fn level(self, asserted: bool) -> Level {
        match (self, asserted) {
            (Polarity::ActiveHigh, true) | (Polarity::ActiveLow, false) => Level::High,
            (Polarity::ActiveHigh, false) | (Polarity::ActiveLow, true) => Level::Low,
        }
    }
}

/// Routing for a single output line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinAssignment {
    pub line: OutputLine,
    pub gpio: u8,
    pub polarity: Polarity,
}

impl PinAssignment {
    #[must_use]
    pub const fn new(line: OutputLine, gpio: u8, polarity: Polarity) -> Self {
        Self {
            line,
            gpio,
            polarity,
        }
    }
}

/// Pin table for one board revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinMap {
    assignments: &'static [PinAssignment],
}

impl PinMap {
    #[must_use]
    pub const fn new(assignments: &'static [PinAssignment]) -> Self {
        Self { assignments }
    }

    #[must_use]
    pub fn assignments(&self) -> &'static [PinAssignment] {
        self.assignments
    }

    #[must_use]
    pub fn find(&self, line: OutputLine) -> Option<&'static PinAssignment> {
        self.assignments
            .iter()
            .find(|assignment| assignment.line == line)
    }

    /// Pin level that puts `relay` into `state`, if the relay is wired.
    #[must_use]
    pub fn relay_level(&self, relay: Relay, state: RelayState) -> Option<(u8, Level)> {
        self.find(relay.line()).map(|assignment| {
            let level = assignment
                .polarity
                .level(matches!(state, RelayState::Energized));
            (assignment.gpio, level)
        })
    }
}

/// Mono board: relays switch on a low coil drive.
pub const STANDARD_PINS: [PinAssignment; 5] = [
    PinAssignment::new(OutputLine::Interrupter, 12, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::Softstart, 20, Polarity::ActiveLow),
    PinAssignment::new(OutputLine::FullPower, 21, Polarity::ActiveLow),
    PinAssignment::new(OutputLine::ReadyLed, 16, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::Speaker, 13, Polarity::ActiveHigh),
];

/// Bench board with the feedback switch input and active-high relays.
pub const POLY_BENCH_PINS: [PinAssignment; 6] = [
    PinAssignment::new(OutputLine::Interrupter, 18, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::Softstart, 26, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::FullPower, 16, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::ReadyLed, 17, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::Speaker, 11, Polarity::ActiveHigh),
    PinAssignment::new(OutputLine::FeedbackSwitch, 5, Polarity::ActiveHigh),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_low_relays_release_high() {
        let pins = PinMap::new(&STANDARD_PINS);
        assert_eq!(
            pins.relay_level(Relay::Softstart, RelayState::Released),
            Some((20, Level::High))
        );
        assert_eq!(
            pins.relay_level(Relay::FullPower, RelayState::Energized),
            Some((21, Level::Low))
        );
    }

    #[test]
    fn active_high_relays_energize_high() {
        let pins = PinMap::new(&POLY_BENCH_PINS);
        assert_eq!(
            pins.relay_level(Relay::Softstart, RelayState::Energized),
            Some((26, Level::High))
        );
        assert_eq!(
            pins.find(OutputLine::FeedbackSwitch).map(|pin| pin.gpio),
            Some(5)
        );
    }

    #[test]
    fn unmapped_line_has_no_level() {
        let pins = PinMap::new(&[]);
        assert!(pins.relay_level(Relay::FullPower, RelayState::Released).is_none());
    }
}
