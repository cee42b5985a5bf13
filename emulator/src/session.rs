use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use interrupter_core::link::LinkMonitor;
use interrupter_core::repl::commands::CommandExecutor;
use interrupter_core::{
    DriveController, HostTimebase, ManualTimebase, Timebase, WaitStrategy,
};

use crate::hardware::{SimulatedChannel, SimulatedRelays};
use crate::library::DirectoryLibrary;

/// Host clock, or a virtual one whose waits return immediately.
#[derive(Debug)]
pub enum EmulatorClock {
    Host(HostTimebase),
    Virtual(ManualTimebase),
}

impl EmulatorClock {
    pub fn new(virtual_time: bool, strategy: WaitStrategy) -> Self {
        if virtual_time {
            EmulatorClock::Virtual(ManualTimebase::new())
        } else {
            EmulatorClock::Host(HostTimebase::new(strategy))
        }
    }
}

impl Timebase for EmulatorClock {
    fn now(&self) -> Duration {
        match self {
            EmulatorClock::Host(clock) => clock.now(),
            EmulatorClock::Virtual(clock) => clock.now(),
        }
    }

    fn wait_until(&self, deadline: Duration) {
        match self {
            EmulatorClock::Host(clock) => clock.wait_until(deadline),
            EmulatorClock::Virtual(clock) => clock.wait_until(deadline),
        }
    }
}

pub type EmulatorController = DriveController<SimulatedChannel, SimulatedRelays, EmulatorClock>;

type Executor = CommandExecutor<SimulatedChannel, SimulatedRelays, EmulatorClock, DirectoryLibrary>;

pub struct Session {
    executor: Executor,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(
        controller: EmulatorController,
        library: DirectoryLibrary,
        link: Option<LinkMonitor>,
        transcript: Option<TranscriptLogger>,
    ) -> Self {
        let executor = CommandExecutor::new(controller, library);
        let executor = match link {
            Some(monitor) => executor.with_link(monitor),
            None => executor,
        };

        Self {
            executor,
            transcript,
            started_at: HostInstant::now(),
        }
    }

    pub fn controller(&self) -> &EmulatorController {
        self.executor.controller()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.record(elapsed, TranscriptRole::Host, &[trimmed])?;

        let lines = match self.executor.execute(trimmed) {
            Ok(outcome) => outcome.lines(),
            Err(error) => vec![error.line()],
        };

        self.record(elapsed, TranscriptRole::Emulator, &lines)?;
        Ok(lines)
    }

    fn record<S: AsRef<str>>(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        lines: &[S],
    ) -> io::Result<()> {
        let Some(transcript) = self.transcript.as_mut() else {
            return Ok(());
        };
        for line in lines {
            transcript.append_line(elapsed, role, line.as_ref())?;
        }
        Ok(())
    }
}

pub struct TranscriptLogger {
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl TranscriptLogger {
    pub fn create(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Self::new(Box::new(file), header)
    }

    pub fn new(sink: Box<dyn Write + Send>, header: &str) -> io::Result<Self> {
        let mut logger = Self {
            writer: BufWriter::new(sink),
        };
        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

pub fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interrupter_core::ControllerConfig;
    use interrupter_core::playback::{NoteEvent, encode_events};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .expect("buffer lock")
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().expect("buffer lock").clone()).expect("utf8")
        }
    }

    fn session(
        library: DirectoryLibrary,
        transcript: Option<TranscriptLogger>,
    ) -> Session {
        let config = ControllerConfig::default();
        let controller = DriveController::new(
            SimulatedChannel::new(&config.pins),
            SimulatedRelays::new(config.pins),
            EmulatorClock::new(true, config.wait_strategy),
            &config,
        )
        .expect("controller starts");
        Session::new(controller, library, None, transcript)
    }

    #[test]
    fn replies_ok_and_err_lines() {
        let mut session = session(DirectoryLibrary::new("."), None);

        assert_eq!(
            session.handle_command("pwm 100 20").expect("handled"),
            ["OK mode=fixed-pwm"]
        );
        assert_eq!(
            session.handle_command("cw on").expect("handled"),
            ["OK mode=continuous-wave"]
        );
        assert_eq!(
            session.handle_command("idle").expect("handled"),
            ["OK mode=idle"]
        );

        let lines = session.handle_command("duty 5 50").expect("handled");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERR limit derived on-time"), "{lines:?}");

        assert!(session.handle_command("   ").expect("handled").is_empty());
    }

    #[test]
    fn transcript_records_both_directions() {
        let buffer = SharedBuffer::default();
        let transcript =
            TranscriptLogger::new(Box::new(buffer.clone()), "test transcript").expect("header");
        let mut session = session(DirectoryLibrary::new("."), Some(transcript));

        session.handle_command("power status").expect("handled");

        let text = buffer.text();
        assert!(text.starts_with("# test transcript\n"));
        assert!(text.contains("HOST> power status"));
        assert!(text.contains("EMU < OK power phase=off progress=0%"));
    }

    #[test]
    fn plays_files_from_the_library() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(
            dir.path().join("beep.dat"),
            encode_events(&[NoteEvent::note_on(0, 69, 100), NoteEvent::note_off(250, 69)]),
        )
        .expect("write fixture");
        let mut session = session(DirectoryLibrary::new(dir.path()), None);

        assert_eq!(
            session.handle_command("files").expect("handled"),
            ["OK files count=1", "  beep"]
        );
        assert_eq!(
            session.handle_command("play beep").expect("handled"),
            ["OK playing beep"]
        );

        let report = session
            .controller()
            .join_playback()
            .expect("session ran");
        assert_eq!(report.sounded, 1);
        assert_eq!(report.ended_at, Duration::from_millis(250));
    }

    #[test]
    fn formats_short_durations() {
        assert_eq!(format_duration_short(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration_short(Duration::from_secs(20)), "20.000s");
    }
}
