mod config;
mod hardware;
mod library;
mod link;
mod session;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use interrupter_core::DriveController;
use interrupter_core::link::{DEFAULT_PROBE_INTERVAL, LinkMonitor};
use log::{info, warn};

use hardware::{SimulatedChannel, SimulatedRelays};
use library::DirectoryLibrary;
use link::PingProbe;
use session::{EmulatorClock, Session, TranscriptLogger, format_duration_short};

/// Interactive console for the interrupter controller against simulated outputs
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Board profile (`standard` or `poly-bench`)
    #[arg(short, long)]
    profile: Option<String>,

    /// TOML file with overrides on top of the profile
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding `.dat` playback files
    #[arg(short, long, default_value = ".")]
    library: PathBuf,

    /// Write a timestamped transcript of the session to this file
    #[arg(short, long)]
    transcript: Option<PathBuf>,

    /// Run on a virtual clock: waits complete immediately
    #[arg(long)]
    virtual_time: bool,

    /// Host whose reachability is reported by `status`
    #[arg(long)]
    peer: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = config::resolve(args.profile.as_deref(), args.config.as_deref())?;

    let controller = DriveController::new(
        SimulatedChannel::new(&config.pins),
        SimulatedRelays::new(config.pins),
        EmulatorClock::new(args.virtual_time, config.wait_strategy),
        &config,
    )
    .context("could not start the controller")?;

    let link = args
        .peer
        .as_deref()
        .map(|peer| LinkMonitor::spawn(PingProbe::new(peer), DEFAULT_PROBE_INTERVAL))
        .transpose()
        .context("could not start the link monitor")?;

    let transcript = args
        .transcript
        .as_deref()
        .map(|path| {
            TranscriptLogger::create(
                path,
                &format!("Interrupter emulator transcript profile={}", config.profile),
            )
            .with_context(|| format!("could not create transcript `{}`", path.display()))
        })
        .transpose()?;

    let library = DirectoryLibrary::new(args.library);
    info!(
        "emulator: profile={} library={} precharge={} virtual-time={}",
        config.profile,
        library.root().display(),
        format_duration_short(config.precharge),
        args.virtual_time
    );

    let mut session = Session::new(controller, library, link, transcript);
    run_console(&mut session)?;

    let controller = session.controller();
    if let Err(error) = controller.exit_to_idle() {
        warn!("emulator: stop on exit failed {error}");
    }
    if let Err(error) = controller.end_power_sequence() {
        warn!("emulator: relay release on exit failed {error}");
    }
    Ok(())
}

fn run_console(session: &mut Session) -> Result<()> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Interrupter emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session
            .handle_command(trimmed)
            .context("could not write the transcript")?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}
