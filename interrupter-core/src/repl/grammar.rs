#![allow(clippy::module_name_repetitions)]

//! Parser for the controller console.
//!
//! Commands are one line each: a case-insensitive keyword followed by
//! whitespace-separated arguments. The parser is built from `winnow`
//! combinators directly over the line, and every argument carries a label so
//! a failure can say what it expected and where.

use core::fmt;

use winnow::ascii::{Caseless, dec_uint, float, space0, space1};
use winnow::combinator::{alt, cut_err, delimited, eof, opt, peek, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::take_while;

/// Parsed console command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command<'a> {
    /// `shot <us>`
    Shot { on_time_us: u32 },
    /// `pwm <on_us> <off_ms>`
    Pwm { on_time_us: u32, off_time_ms: u32 },
    /// `duty <pct> <hz>`
    Duty { duty_pct: f64, frequency_hz: u32 },
    /// `burst <bps> <on_us>`
    Burst { bps: f64, on_time_us: u32 },
    /// `cw on|off`
    ContinuousWave(bool),
    /// `play <name>`
    Play(&'a str),
    Stop,
    Idle,
    Files,
    /// `midi-limit <us>`
    MidiLimit(u32),
    Power(PowerAction),
    Status,
    Events,
    Help { topic: Option<&'a str> },
}

/// Argument of the `power` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    Status,
}

/// Why a line did not parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset of the failure within the line.
    pub offset: usize,
    /// What the parser was looking for, when it knew.
    pub expected: Option<&'static str>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = self.offset + 1;
        match self.expected {
            Some(label) => write!(f, "expected {label} at column {column}"),
            None => write!(f, "unexpected input at column {column}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses one console line. Leading and trailing whitespace is ignored.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError> {
    delimited(space0, command, space0)
        .parse(line)
        .map_err(|error| ParseError {
            offset: error.offset(),
            expected: error.inner().context().find_map(|context| match context {
                StrContext::Label(label) => Some(*label),
                _ => None,
            }),
        })
}

fn command<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    alt((
        shot,
        pwm,
        duty,
        burst,
        continuous_wave,
        play,
        keyword("stop").value(Command::Stop),
        keyword("idle").value(Command::Idle),
        keyword("files").value(Command::Files),
        midi_limit,
        power,
        keyword("status").value(Command::Status),
        keyword("events").value(Command::Events),
        help,
    ))
    .context(StrContext::Label("command"))
    .parse_next(input)
}

/// Matches `word` case-insensitively as a whole word.
fn keyword<'s>(word: &'static str) -> impl Parser<&'s str, &'s str, ErrMode<ContextError>> {
    terminated(Caseless(word), peek(alt((space1, eof))))
}

fn argument<'s, O>(
    label: &'static str,
    parser: impl Parser<&'s str, O, ErrMode<ContextError>>,
) -> impl Parser<&'s str, O, ErrMode<ContextError>> {
    preceded(space1, parser).context(StrContext::Label(label))
}

fn micros(input: &mut &str) -> ModalResult<u32> {
    argument("microseconds", dec_uint::<_, u32, _>).parse_next(input)
}

fn shot<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(keyword("shot"), cut_err(micros))
        .map(|on_time_us| Command::Shot { on_time_us })
        .parse_next(input)
}

fn pwm<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("pwm"),
        cut_err((micros, argument("milliseconds", dec_uint::<_, u32, _>))),
    )
    .map(|(on_time_us, off_time_ms)| Command::Pwm {
        on_time_us,
        off_time_ms,
    })
    .parse_next(input)
}

fn duty<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("duty"),
        cut_err((
            argument("percent", float::<_, f64, _>),
            argument("hertz", dec_uint::<_, u32, _>),
        )),
    )
    .map(|(duty_pct, frequency_hz)| Command::Duty {
        duty_pct,
        frequency_hz,
    })
    .parse_next(input)
}

fn burst<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("burst"),
        cut_err((argument("bursts per second", float::<_, f64, _>), micros)),
    )
    .map(|(bps, on_time_us)| Command::Burst { bps, on_time_us })
    .parse_next(input)
}

fn continuous_wave<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("cw"),
        cut_err(argument(
            "on|off",
            alt((keyword("on").value(true), keyword("off").value(false))),
        )),
    )
    .map(Command::ContinuousWave)
    .parse_next(input)
}

fn play<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("play"),
        cut_err(argument("file name", take_while(1.., |c: char| !c.is_whitespace()))),
    )
    .map(Command::Play)
    .parse_next(input)
}

fn midi_limit<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(keyword("midi-limit"), cut_err(micros))
        .map(Command::MidiLimit)
        .parse_next(input)
}

fn power<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("power"),
        cut_err(argument(
            "on|off|status",
            alt((
                keyword("on").value(PowerAction::On),
                keyword("off").value(PowerAction::Off),
                keyword("status").value(PowerAction::Status),
            )),
        )),
    )
    .map(Command::Power)
    .parse_next(input)
}

fn help<'s>(input: &mut &'s str) -> ModalResult<Command<'s>> {
    preceded(
        keyword("help"),
        opt(preceded(space1, take_while(1.., |c: char| !c.is_whitespace()))),
    )
    .map(|topic| Command::Help { topic })
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_timing_commands() {
        assert_eq!(parse_ok("shot 150"), Command::Shot { on_time_us: 150 });
        assert_eq!(
            parse_ok("pwm 100 20"),
            Command::Pwm {
                on_time_us: 100,
                off_time_ms: 20
            }
        );
        assert_eq!(
            parse_ok("duty 0.5 50"),
            Command::Duty {
                duty_pct: 0.5,
                frequency_hz: 50
            }
        );
        assert_eq!(
            parse_ok("burst 2.5 80"),
            Command::Burst {
                bps: 2.5,
                on_time_us: 80
            }
        );
        assert_eq!(parse_ok("midi-limit 90"), Command::MidiLimit(90));
    }

    #[test]
    fn parses_switches() {
        assert_eq!(parse_ok("cw on"), Command::ContinuousWave(true));
        assert_eq!(parse_ok("cw off"), Command::ContinuousWave(false));
        assert_eq!(parse_ok("power on"), Command::Power(PowerAction::On));
        assert_eq!(parse_ok("power off"), Command::Power(PowerAction::Off));
        assert_eq!(
            parse_ok("power status"),
            Command::Power(PowerAction::Status)
        );
    }

    #[test]
    fn parses_bare_keywords() {
        assert_eq!(parse_ok("stop"), Command::Stop);
        assert_eq!(parse_ok("idle"), Command::Idle);
        assert_eq!(parse_ok("files"), Command::Files);
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(parse_ok("events"), Command::Events);
    }

    #[test]
    fn parses_play_name() {
        assert_eq!(parse_ok("play mario_theme"), Command::Play("mario_theme"));
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(parse_ok("help"), Command::Help { topic: None });
        assert_eq!(
            parse_ok("help burst"),
            Command::Help {
                topic: Some("burst")
            }
        );
    }

    #[test]
    fn supports_case_insensitive_keywords() {
        assert_eq!(parse_ok("ShOt 10"), Command::Shot { on_time_us: 10 });
        assert_eq!(parse_ok("CW ON"), Command::ContinuousWave(true));
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(
            parse_ok("  pwm\t100   20 "),
            Command::Pwm {
                on_time_us: 100,
                off_time_ms: 20
            }
        );
    }

    #[test]
    fn keywords_must_end_at_a_word_boundary() {
        let error = parse("shots 10").expect_err("prefix must not match");
        assert_eq!(error.offset, 0);
        assert_eq!(error.expected, Some("command"));
    }

    #[test]
    fn missing_argument_names_what_was_expected() {
        let error = parse("pwm 100").expect_err("off-time is required");
        assert_eq!(error.expected, Some("milliseconds"));
        assert_eq!(error.to_string(), "expected milliseconds at column 8");
    }

    #[test]
    fn rejects_invalid_switch() {
        let error = parse("cw maybe").expect_err("cw takes on or off");
        assert_eq!(error.expected, Some("on|off"));
    }

    #[test]
    fn rejects_trailing_input() {
        let error = parse("stop now").expect_err("stop takes no argument");
        assert_eq!(error.offset, 5);
        assert_eq!(error.expected, None);
    }
}
