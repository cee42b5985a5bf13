mod support;

use interrupter_core::hardware::{FULL_POWER_TONE, Relay, RelayState, STARTUP_TONE};
use interrupter_core::telemetry::TelemetryEvent;
use interrupter_core::{ControllerConfig, PowerError, PowerPhase, PowerState, Timebase};

use support::{RecordingRelays, Rig};

const SAFE: [(Relay, RelayState); 2] = [
    (Relay::FullPower, RelayState::Released),
    (Relay::Softstart, RelayState::Released),
];

#[test]
fn construction_forces_the_safe_state() {
    let rig = Rig::default();
    assert_eq!(rig.relays.calls(), SAFE);
    assert_eq!(rig.relays.tones(), [STARTUP_TONE]);
    assert_eq!(rig.controller.query_power_status(), PowerState::default());
}

#[test]
fn second_request_during_precharge_is_already_active() {
    let rig = Rig::with_relays(&ControllerConfig::default(), RecordingRelays::gated());

    rig.controller
        .begin_power_sequence()
        .expect("sequence starts");
    let state = rig.controller.query_power_status();
    assert!(state.softstart_active);
    assert_eq!(state.phase(), PowerPhase::Softstart);

    assert_eq!(
        rig.controller.begin_power_sequence(),
        Err(PowerError::AlreadyActive)
    );
    assert_eq!(
        rig.controller.power_on_blocking(),
        Err(PowerError::AlreadyActive)
    );

    rig.relays.open_gate();
    rig.controller.power().join_sequence();

    assert_eq!(
        rig.controller.query_power_status(),
        PowerState {
            softstart_active: false,
            progress: 100,
            full_power: true,
        }
    );
    assert_eq!(rig.clock.now(), rig.controller.power().precharge());
}

#[test]
fn full_power_closes_before_softstart_opens() {
    let rig = Rig::default();
    rig.controller.power_on_blocking().expect("sequence completes");

    assert_eq!(
        rig.relays.calls()[SAFE.len()..],
        [
            (Relay::Softstart, RelayState::Energized),
            (Relay::FullPower, RelayState::Energized),
            (Relay::Softstart, RelayState::Released),
        ]
    );
    assert_eq!(rig.relays.tones(), [STARTUP_TONE, FULL_POWER_TONE]);
    assert_eq!(rig.controller.query_power_status().phase(), PowerPhase::FullPower);
    assert!(rig.controller.power().last_fault().is_none());
}

#[test]
fn power_on_at_full_power_keeps_the_relays_as_they_are() {
    let rig = Rig::default();
    rig.controller.power_on_blocking().expect("sequence completes");
    let before = rig.relays.calls();
    let state = rig.controller.query_power_status();

    assert_eq!(
        rig.controller.begin_power_sequence(),
        Err(PowerError::AlreadyActive)
    );
    rig.controller.power().join_sequence();
    assert_eq!(
        rig.controller.power_on_blocking(),
        Err(PowerError::AlreadyActive)
    );

    assert_eq!(rig.relays.calls(), before);
    assert_eq!(rig.controller.query_power_status(), state);
    assert_eq!(state.phase(), PowerPhase::FullPower);
}

#[test]
fn power_off_releases_both_relays_and_resets() {
    let rig = Rig::default();
    rig.controller.power_on_blocking().expect("sequence completes");

    rig.controller.end_power_sequence().expect("relays release");

    let calls = rig.relays.calls();
    assert_eq!(calls[calls.len() - 2..], SAFE);
    assert_eq!(rig.controller.query_power_status(), PowerState::default());

    let released = rig
        .controller
        .telemetry()
        .snapshot()
        .into_iter()
        .rev()
        .take(2)
        .filter(|record| {
            matches!(
                record.event,
                TelemetryEvent::Relay(_, RelayState::Released)
            )
        })
        .count();
    assert_eq!(released, 2);

    rig.controller
        .power_on_blocking()
        .expect("a new sequence may start after power-off");
    assert!(rig.controller.query_power_status().full_power);
}

#[test]
fn drive_modes_leave_the_relays_alone() {
    let rig = Rig::default();
    rig.controller.power_on_blocking().expect("sequence completes");
    let before = rig.relays.calls();

    rig.controller.enter_fixed_pwm(100, 20).expect("pwm");
    rig.controller.exit_to_idle().expect("idle");

    assert_eq!(rig.relays.calls(), before);
    assert!(rig.controller.query_power_status().full_power);
}
