//! Console command dispatcher.
//!
//! Glues parsed commands to the drive controller, the playback library and
//! the link monitor, and renders each result as the `OK ...` / `ERR ...`
//! reply lines the console prints.

use core::fmt::{self, Write as _};

use log::debug;

use crate::controller::{DriveController, DriveError, DriveMode};
use crate::hardware::{HardwareError, PulseChannel, RelayDriver};
use crate::link::{LinkMonitor, LinkStatus};
use crate::playback::{LibraryError, PlaybackLibrary};
use crate::power::{PowerError, PowerState};
use crate::telemetry::TelemetryRecord;
use crate::timing::Timebase;

use super::catalog::{self, COMMANDS, CommandSpec};
use super::grammar::{self, Command, PowerAction};
use super::status::{self, StatusFormatter, StatusSnapshot};

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    /// The controller is now in this mode.
    Mode(DriveMode),
    /// A single pulse went out with this (possibly clamped) width.
    Shot { width_us: u32 },
    Playing(String),
    /// The request was redundant and nothing changed.
    AlreadyActive(&'static str),
    Files(Vec<String>),
    MidiLimit(u32),
    PowerStarted,
    PowerOff,
    Power(PowerState),
    Status(StatusSnapshot),
    Events(Vec<TelemetryRecord>),
    Help(&'static [CommandSpec]),
}

impl CommandOutcome {
    /// Reply lines, the first always starting with `OK`.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        // Writing into a String cannot fail.
        let _ = self.write_lines(&mut lines);
        lines
    }

    fn write_lines(&self, lines: &mut Vec<String>) -> fmt::Result {
        let mut head = String::from("OK ");
        match self {
            CommandOutcome::Mode(mode) => write!(head, "mode={mode}")?,
            CommandOutcome::Shot { width_us } => write!(head, "shot width={width_us}us")?,
            CommandOutcome::Playing(name) => write!(head, "playing {name}")?,
            CommandOutcome::AlreadyActive(what) => write!(head, "already-active {what}")?,
            CommandOutcome::Files(names) => write!(head, "files count={}", names.len())?,
            CommandOutcome::MidiLimit(us) => write!(head, "midi-limit={us}us")?,
            CommandOutcome::PowerStarted => head.push_str("power sequence started"),
            CommandOutcome::PowerOff => head.push_str("power off"),
            CommandOutcome::Power(state) => {
                head.push_str("power ");
                status::write_power_state(&mut head, state)?;
            }
            CommandOutcome::Status(_) => head.push_str("status"),
            CommandOutcome::Events(records) => write!(head, "events count={}", records.len())?,
            CommandOutcome::Help(_) => head.push_str("help"),
        }
        lines.push(head);

        match self {
            CommandOutcome::Files(names) => {
                lines.extend(names.iter().map(|name| format!("  {name}")));
            }
            CommandOutcome::Status(snapshot) => {
                let formatter = StatusFormatter::new(snapshot);
                let mut line = String::from("  ");
                formatter.write_drive_line(&mut line)?;
                lines.push(line);
                let mut line = String::from("  ");
                formatter.write_power_line(&mut line)?;
                lines.push(line);
                let mut line = String::from("  ");
                formatter.write_link_line(&mut line)?;
                lines.push(line);
            }
            CommandOutcome::Events(records) => {
                for record in records {
                    let mut line = String::from("  ");
                    status::write_event_line(&mut line, record)?;
                    lines.push(line);
                }
            }
            CommandOutcome::Help(specs) => {
                for spec in *specs {
                    lines.push(format!("  {:<22} {}", spec.usage, spec.summary));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandError {
    Parse(grammar::ParseError),
    UnknownTopic(String),
    Drive(DriveError),
    Power(PowerError),
    Hardware(HardwareError),
    Library(LibraryError),
}

impl CommandError {
    /// The single `ERR ...` reply line.
    #[must_use]
    pub fn line(&self) -> String {
        format!("ERR {self}")
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => write!(f, "syntax {error}"),
            CommandError::UnknownTopic(topic) => write!(f, "help no command named `{topic}`"),
            CommandError::Drive(DriveError::Limit(error)) => write!(f, "limit {error}"),
            CommandError::Drive(DriveError::Hardware(error)) | CommandError::Hardware(error) => {
                write!(f, "hardware {error}")
            }
            CommandError::Drive(DriveError::Power(error)) | CommandError::Power(error) => {
                write!(f, "power {error}")
            }
            CommandError::Drive(error) => write!(f, "drive {error}"),
            CommandError::Library(error) => write!(f, "library {error}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<grammar::ParseError> for CommandError {
    fn from(error: grammar::ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<DriveError> for CommandError {
    fn from(error: DriveError) -> Self {
        Self::Drive(error)
    }
}

impl From<PowerError> for CommandError {
    fn from(error: PowerError) -> Self {
        Self::Power(error)
    }
}

impl From<HardwareError> for CommandError {
    fn from(error: HardwareError) -> Self {
        Self::Hardware(error)
    }
}

impl From<LibraryError> for CommandError {
    fn from(error: LibraryError) -> Self {
        Self::Library(error)
    }
}

type CommandResult = Result<CommandOutcome, CommandError>;

/// Dispatches console commands into the controller.
pub struct CommandExecutor<C, R, T, L> {
    controller: DriveController<C, R, T>,
    library: L,
    link: Option<LinkMonitor>,
}

impl<C, R, T, L> CommandExecutor<C, R, T, L>
where
    C: PulseChannel + 'static,
    R: RelayDriver + 'static,
    T: Timebase + 'static,
    L: PlaybackLibrary,
{
    #[must_use]
    pub fn new(controller: DriveController<C, R, T>, library: L) -> Self {
        Self {
            controller,
            library,
            link: None,
        }
    }

    /// Reports `monitor`'s state in `status`.
    #[must_use]
    pub fn with_link(mut self, monitor: LinkMonitor) -> Self {
        self.link = Some(monitor);
        self
    }

    #[must_use]
    pub fn controller(&self) -> &DriveController<C, R, T> {
        &self.controller
    }

    #[must_use]
    pub fn library(&self) -> &L {
        &self.library
    }

    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        self.link
            .as_ref()
            .map_or(LinkStatus::Unknown, LinkMonitor::status)
    }

    /// Parses and executes a single console line.
    pub fn execute(&self, line: &str) -> CommandResult {
        let command = grammar::parse(line)?;
        debug!("console: {command:?}");
        self.dispatch(command)
    }

    fn dispatch(&self, command: Command<'_>) -> CommandResult {
        let controller = &self.controller;
        match command {
            Command::Shot { on_time_us } => {
                controller.enter_single_shot(on_time_us)?;
                Ok(CommandOutcome::Shot {
                    width_us: controller.limiter().clamp_single_pulse(on_time_us),
                })
            }
            Command::Pwm {
                on_time_us,
                off_time_ms,
            } => self.settle(controller.enter_fixed_pwm(on_time_us, off_time_ms)),
            Command::Duty {
                duty_pct,
                frequency_hz,
            } => self.settle(controller.enter_fixed_pwm_by_duty(duty_pct, frequency_hz)),
            Command::Burst { bps, on_time_us } => {
                self.settle(controller.enter_burst(bps, on_time_us))
            }
            Command::ContinuousWave(true) => self.settle(controller.enter_continuous_wave()),
            Command::ContinuousWave(false) => {
                controller.exit_continuous_wave()?;
                Ok(CommandOutcome::Mode(controller.mode()))
            }
            Command::Play(name) => self.play(name),
            Command::Stop => {
                controller.stop_playback()?;
                Ok(CommandOutcome::Mode(controller.mode()))
            }
            Command::Idle => {
                controller.exit_to_idle()?;
                Ok(CommandOutcome::Mode(controller.mode()))
            }
            Command::Files => Ok(CommandOutcome::Files(self.library.list()?)),
            Command::MidiLimit(on_time_us) => {
                controller.set_midi_max_on_time(on_time_us)?;
                Ok(CommandOutcome::MidiLimit(on_time_us))
            }
            Command::Power(action) => self.power(action),
            Command::Status => Ok(CommandOutcome::Status(self.snapshot())),
            Command::Events => Ok(CommandOutcome::Events(controller.telemetry().snapshot())),
            Command::Help { topic: None } => Ok(CommandOutcome::Help(COMMANDS)),
            Command::Help { topic: Some(topic) } => catalog::find(topic)
                .map(|spec| CommandOutcome::Help(core::slice::from_ref(spec)))
                .ok_or_else(|| CommandError::UnknownTopic(topic.to_string())),
        }
    }

    fn settle(&self, result: Result<(), DriveError>) -> CommandResult {
        result?;
        Ok(CommandOutcome::Mode(self.controller.mode()))
    }

    fn play(&self, name: &str) -> CommandResult {
        let stream = self.library.open(name)?;
        match self.controller.start_playback(stream) {
            Ok(()) => Ok(CommandOutcome::Playing(name.to_string())),
            Err(error) if error.is_already_active() => {
                Ok(CommandOutcome::AlreadyActive(DriveMode::MidiPlayback.label()))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn power(&self, action: PowerAction) -> CommandResult {
        match action {
            PowerAction::On => match self.controller.begin_power_sequence() {
                Ok(()) => Ok(CommandOutcome::PowerStarted),
                Err(PowerError::AlreadyActive) => Ok(CommandOutcome::AlreadyActive("power")),
                Err(error) => Err(error.into()),
            },
            PowerAction::Off => {
                self.controller.end_power_sequence()?;
                Ok(CommandOutcome::PowerOff)
            }
            PowerAction::Status => Ok(CommandOutcome::Power(
                self.controller.query_power_status(),
            )),
        }
    }

    /// Collects everything `status` reports.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let controller = &self.controller;
        StatusSnapshot {
            mode: controller.mode(),
            playing: controller.query_playback_status().playing,
            burst_active: controller.query_burst_status().active,
            power: controller.query_power_status(),
            midi_on_time_us: controller.limiter().midi_on_time_us(),
            max_on_time_us: controller.limiter().max_on_time_us(),
            link: self.link_status(),
        }
    }
}
