//! Command reference shown by `help`.

/// One console command and its usage line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "shot",
        usage: "shot <us>",
        summary: "fire one pulse, clamped to the on-time ceiling",
    },
    CommandSpec {
        name: "pwm",
        usage: "pwm <on_us> <off_ms>",
        summary: "fixed pulse train from on-time and off-time, 0 turns it off",
    },
    CommandSpec {
        name: "duty",
        usage: "duty <pct> <hz>",
        summary: "fixed pulse train from duty cycle and frequency, 0 turns it off",
    },
    CommandSpec {
        name: "burst",
        usage: "burst <bps> <on_us>",
        summary: "periodic bursts, 0 on-time turns them off",
    },
    CommandSpec {
        name: "cw",
        usage: "cw on|off",
        summary: "hold the output high",
    },
    CommandSpec {
        name: "play",
        usage: "play <name>",
        summary: "start playback of a library file",
    },
    CommandSpec {
        name: "stop",
        usage: "stop",
        summary: "stop playback and every other output",
    },
    CommandSpec {
        name: "idle",
        usage: "idle",
        summary: "stop every output",
    },
    CommandSpec {
        name: "files",
        usage: "files",
        summary: "list playback files",
    },
    CommandSpec {
        name: "midi-limit",
        usage: "midi-limit <us>",
        summary: "set the per-note on-time used by playback",
    },
    CommandSpec {
        name: "power",
        usage: "power on|off|status",
        summary: "run or abort the relay power-up sequence",
    },
    CommandSpec {
        name: "status",
        usage: "status",
        summary: "show mode, playback, power and link state",
    },
    CommandSpec {
        name: "events",
        usage: "events",
        summary: "show recent controller events",
    },
    CommandSpec {
        name: "help",
        usage: "help [command]",
        summary: "show this list or one command",
    },
];

/// Looks up a command by name, ignoring case.
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}
