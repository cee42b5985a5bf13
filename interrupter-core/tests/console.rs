mod support;

use core::time::Duration;
use std::thread;
use std::time::Instant;

use interrupter_core::{ControllerConfig, ManualTimebase};
use interrupter_core::link::{LinkMonitor, LinkStatus};
use interrupter_core::playback::{MemoryLibrary, NoteEvent, encode_events};
use interrupter_core::repl::commands::CommandExecutor;

use support::{RecordingChannel, RecordingRelays, Rig};

type Console = CommandExecutor<RecordingChannel, RecordingRelays, ManualTimebase, MemoryLibrary>;

fn console_with(rig: Rig, library: MemoryLibrary) -> Console {
    CommandExecutor::new(rig.controller, library)
}

fn console() -> Console {
    console_with(Rig::default(), MemoryLibrary::new())
}

fn reply(console: &Console, line: &str) -> Vec<String> {
    match console.execute(line) {
        Ok(outcome) => outcome.lines(),
        Err(error) => vec![error.line()],
    }
}

#[test]
fn fresh_status_reports_every_subsystem() {
    let console = console();
    assert_eq!(
        reply(&console, "status"),
        [
            "OK status",
            "  drive mode=idle playing=false burst=off max-on=200us midi-limit=100us",
            "  power phase=off progress=0% softstart=off full-power=off",
            "  link=unknown",
        ]
    );
}

#[test]
fn status_follows_mode_changes() {
    let console = console();
    assert_eq!(reply(&console, "burst 10 100"), ["OK mode=burst"]);
    assert_eq!(reply(&console, "midi-limit 150"), ["OK midi-limit=150us"]);

    let lines = reply(&console, "STATUS");
    assert_eq!(
        lines[1],
        "  drive mode=burst playing=false burst=on max-on=200us midi-limit=150us"
    );

    assert_eq!(reply(&console, "burst 10 0"), ["OK mode=idle"]);
    assert_eq!(reply(&console, "cw on"), ["OK mode=continuous-wave"]);
    assert_eq!(reply(&console, "cw on"), ["OK mode=continuous-wave"]);
    assert_eq!(reply(&console, "cw off"), ["OK mode=idle"]);
}

#[test]
fn rejected_requests_report_the_limit() {
    let console = console();

    let lines = reply(&console, "burst 1000 150");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ERR limit off-time"), "{lines:?}");

    let lines = reply(&console, "midi-limit 500");
    assert!(lines[0].starts_with("ERR limit "), "{lines:?}");

    assert_eq!(
        reply(&console, "pwm 100"),
        ["ERR syntax expected milliseconds at column 8"]
    );
    assert_eq!(reply(&console, "shot 500"), ["OK shot width=200us"]);
}

#[test]
fn events_list_recorded_transitions() {
    let console = console();
    reply(&console, "cw on");
    reply(&console, "idle");

    let lines = reply(&console, "events");
    let count = console.controller().telemetry().len();
    assert_eq!(lines[0], format!("OK events count={count}"));
    assert_eq!(lines.len(), count + 1);
    assert!(
        lines
            .iter()
            .any(|line| line.ends_with("mode-entered continuous-wave")),
        "{lines:?}"
    );
    assert!(lines.last().is_some_and(|line| line.ends_with("mode-entered idle")));
}

#[test]
fn plays_and_lists_library_files() {
    let mut library = MemoryLibrary::new();
    library.insert(
        "scale",
        encode_events(&[
            NoteEvent::note_on(0, 60, 100),
            NoteEvent::note_off(200, 60),
            NoteEvent::note_on(0, 62, 100),
            NoteEvent::note_off(200, 62),
        ]),
    );
    library.insert("empty", Vec::new());
    let console = console_with(Rig::default(), library);

    assert_eq!(reply(&console, "files"), ["OK files count=2", "  empty", "  scale"]);
    assert_eq!(reply(&console, "play scale"), ["OK playing scale"]);

    let report = console.controller().join_playback().expect("session ran");
    assert_eq!(report.sounded, 2);
    assert_eq!(report.ended_at, Duration::from_millis(400));
    assert!(!console.snapshot().playing);

    assert_eq!(
        reply(&console, "play missing"),
        ["ERR library no playback file named `missing`"]
    );
}

#[test]
fn power_commands_drive_the_sequencer() {
    let rig = Rig::with_relays(&ControllerConfig::default(), RecordingRelays::gated());
    let relays = rig.relays.clone();
    let console = console_with(rig, MemoryLibrary::new());

    assert_eq!(reply(&console, "power on"), ["OK power sequence started"]);
    assert_eq!(reply(&console, "power on"), ["OK already-active power"]);
    assert_eq!(
        reply(&console, "power status"),
        ["OK power phase=softstart progress=0%"]
    );

    relays.open_gate();
    console.controller().power().join_sequence();
    assert_eq!(
        reply(&console, "power status"),
        ["OK power phase=full-power progress=100%"]
    );

    assert_eq!(reply(&console, "power on"), ["OK already-active power"]);
    assert_eq!(
        reply(&console, "power status"),
        ["OK power phase=full-power progress=100%"]
    );

    assert_eq!(reply(&console, "power off"), ["OK power off"]);
    assert_eq!(
        reply(&console, "power status"),
        ["OK power phase=off progress=0%"]
    );
}

#[test]
fn status_reports_the_link_monitor() {
    let monitor =
        LinkMonitor::spawn(|| true, Duration::from_millis(5)).expect("monitor starts");
    let console = console().with_link(monitor);

    let deadline = Instant::now() + Duration::from_secs(5);
    while console.link_status() != LinkStatus::Up {
        assert!(Instant::now() < deadline, "link never came up");
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(reply(&console, "status")[3], "  link=up");
}

#[test]
fn help_lists_one_command_or_all() {
    let console = console();

    let lines = reply(&console, "help burst");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].trim_start().starts_with("burst"), "{lines:?}");

    let lines = reply(&console, "help");
    assert!(lines.len() > 10);
    assert!(lines.iter().skip(1).all(|line| line.starts_with("  ")));
}
