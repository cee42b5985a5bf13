//! Simulated outputs. Every write is logged with the GPIO it would drive.

use interrupter_core::hardware::pins::{OutputLine, PinMap};
use interrupter_core::hardware::{
    HardwareError, Level, PulseChannel, Relay, RelayDriver, RelayState, Tone, Waveform,
};
use interrupter_core::DutyCycle;
use log::{debug, info};

const UNWIRED: &str = "unwired";

fn gpio_label(pins: &PinMap, line: OutputLine) -> String {
    pins.find(line)
        .map_or_else(|| UNWIRED.to_string(), |pin| format!("gpio{}", pin.gpio))
}

/// Interrupter output that records what the pulse generator would do.
#[derive(Debug)]
pub struct SimulatedChannel {
    gpio: String,
    level: Level,
    pwm: Option<(f64, DutyCycle)>,
    pulses: u64,
}

impl SimulatedChannel {
    pub fn new(pins: &PinMap) -> Self {
        Self {
            gpio: gpio_label(pins, OutputLine::Interrupter),
            level: Level::Low,
            pwm: None,
            pulses: 0,
        }
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        debug!("sim: {} closed after {} pulses", self.gpio, self.pulses);
    }
}

impl PulseChannel for SimulatedChannel {
    fn set_level(&mut self, level: Level) -> Result<(), HardwareError> {
        if level != self.level {
            info!("sim: {} level {:?}", self.gpio, level);
        }
        self.level = level;
        Ok(())
    }

    fn set_pwm(&mut self, frequency_hz: f64, duty: DutyCycle) -> Result<(), HardwareError> {
        let next = (frequency_hz > 0.0 && duty != DutyCycle::ZERO).then_some((frequency_hz, duty));
        if next != self.pwm {
            match next {
                Some(_) => debug!("sim: {} pwm freq={frequency_hz:.3}Hz duty={duty}", self.gpio),
                None => info!("sim: {} pwm off", self.gpio),
            }
        }
        self.pwm = next;
        Ok(())
    }

    fn trigger(&mut self, width_us: u32) -> Result<(), HardwareError> {
        self.pulses += 1;
        info!("sim: {} trigger width={width_us}us", self.gpio);
        Ok(())
    }

    fn transmit(&mut self, waveform: &Waveform) -> Result<(), HardwareError> {
        self.pulses += 1;
        info!(
            "sim: {} waveform high={}us total={}us",
            self.gpio,
            waveform.high_time().as_micros(),
            waveform.duration().as_micros()
        );
        Ok(())
    }

    fn abort_waveform(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// Relay coils, speaker and ready LED mapped through the board's pin table.
#[derive(Debug)]
pub struct SimulatedRelays {
    pins: PinMap,
    states: [RelayState; 2],
}

impl SimulatedRelays {
    pub fn new(pins: PinMap) -> Self {
        Self {
            pins,
            states: [RelayState::Released; 2],
        }
    }

    const fn slot(relay: Relay) -> usize {
        match relay {
            Relay::Softstart => 0,
            Relay::FullPower => 1,
        }
    }
}

impl RelayDriver for SimulatedRelays {
    fn drive(&mut self, relay: Relay, state: RelayState) -> Result<(), HardwareError> {
        let Some((gpio, level)) = self.pins.relay_level(relay, state) else {
            return Err(HardwareError::Relay { relay, code: -19 });
        };
        let previous = std::mem::replace(&mut self.states[Self::slot(relay)], state);
        if previous == state {
            debug!("sim: {relay} relay still {state}");
        } else {
            info!("sim: {relay} relay {state} gpio{gpio}={level:?}");
        }
        Ok(())
    }

    fn chime(&mut self, tone: Tone) -> Result<(), HardwareError> {
        info!(
            "sim: {} tone {}Hz for {}ms",
            gpio_label(&self.pins, OutputLine::Speaker),
            tone.frequency_hz,
            tone.duration.as_millis()
        );
        Ok(())
    }

    fn set_ready(&mut self, lit: bool) -> Result<(), HardwareError> {
        info!(
            "sim: {} ready led {}",
            gpio_label(&self.pins, OutputLine::ReadyLed),
            if lit { "on" } else { "off" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interrupter_core::hardware::pins::STANDARD_PINS;

    #[test]
    fn relays_track_logical_state() {
        let mut relays = SimulatedRelays::new(PinMap::new(&STANDARD_PINS));
        relays
            .drive(Relay::Softstart, RelayState::Energized)
            .expect("softstart is wired");
        assert_eq!(relays.states, [RelayState::Energized, RelayState::Released]);

        relays.release_all().expect("release both");
        assert_eq!(relays.states, [RelayState::Released; 2]);
    }

    #[test]
    fn unwired_relay_is_a_hardware_error() {
        let mut relays = SimulatedRelays::new(PinMap::new(&[]));
        let error = relays
            .drive(Relay::FullPower, RelayState::Energized)
            .expect_err("no pin for the relay");
        assert!(matches!(error, HardwareError::Relay { .. }));
    }

    #[test]
    fn channel_counts_single_pulses() {
        let mut channel = SimulatedChannel::new(&PinMap::new(&STANDARD_PINS));
        channel.trigger(50).expect("trigger");
        channel
            .transmit(&Waveform::single_pulse(150))
            .expect("transmit");
        channel.halt().expect("halt");
        assert_eq!(channel.pulses, 2);
        assert_eq!(channel.pwm, None);
        assert_eq!(channel.level, Level::Low);
    }
}
