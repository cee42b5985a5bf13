#![allow(dead_code)]

use core::time::Duration;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use interrupter_core::hardware::{
    ChannelOp, HardwareError, Level, PulseChannel, Relay, RelayDriver, RelayState, Tone, Waveform,
};
use interrupter_core::{ControllerConfig, DriveController, DutyCycle, ManualTimebase, Timebase};

/// One write to the interrupter output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    Level(Level),
    Pwm(f64, DutyCycle),
    Trigger(u32),
    Transmit { high_us: u128 },
    Abort,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Call {
    pub at: Duration,
    pub op: Op,
}

/// Channel that timestamps every write with the shared virtual clock.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    clock: ManualTimebase,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_pwm: Arc<AtomicBool>,
}

impl RecordingChannel {
    pub fn new(clock: &ManualTimebase) -> Self {
        Self {
            clock: clock.clone(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.calls().into_iter().map(|call| call.op).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("calls lock").clear();
    }

    /// Makes every non-zero `set_pwm` fail.
    pub fn fail_pwm(&self, fail: bool) {
        self.fail_pwm.store(fail, Ordering::SeqCst);
    }

    fn push(&self, op: Op) {
        let at = self.clock.now();
        self.calls.lock().expect("calls lock").push(Call { at, op });
    }
}

impl PulseChannel for RecordingChannel {
    fn set_level(&mut self, level: Level) -> Result<(), HardwareError> {
        self.push(Op::Level(level));
        Ok(())
    }

    fn set_pwm(&mut self, frequency_hz: f64, duty: DutyCycle) -> Result<(), HardwareError> {
        if self.fail_pwm.load(Ordering::SeqCst) && duty != DutyCycle::ZERO {
            return Err(HardwareError::Channel {
                op: ChannelOp::Pwm,
                code: -5,
            });
        }
        self.push(Op::Pwm(frequency_hz, duty));
        Ok(())
    }

    fn trigger(&mut self, width_us: u32) -> Result<(), HardwareError> {
        self.push(Op::Trigger(width_us));
        Ok(())
    }

    fn transmit(&mut self, waveform: &Waveform) -> Result<(), HardwareError> {
        self.push(Op::Transmit {
            high_us: waveform.high_time().as_micros(),
        });
        Ok(())
    }

    fn abort_waveform(&mut self) -> Result<(), HardwareError> {
        self.push(Op::Abort);
        Ok(())
    }
}

/// Relays that record every drive and can hold the softstart close until
/// released by the test.
#[derive(Clone, Default)]
pub struct RecordingRelays {
    calls: Arc<Mutex<Vec<(Relay, RelayState)>>>,
    tones: Arc<Mutex<Vec<Tone>>>,
    gate: Option<Arc<(Mutex<bool>, Condvar)>>,
}

impl RecordingRelays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relays whose softstart close blocks until [`RecordingRelays::open_gate`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new((Mutex::new(false), Condvar::new()))),
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            *gate.0.lock().expect("gate lock") = true;
            gate.1.notify_all();
        }
    }

    pub fn calls(&self) -> Vec<(Relay, RelayState)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn tones(&self) -> Vec<Tone> {
        self.tones.lock().expect("tones lock").clone()
    }

    fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            let mut open = gate.0.lock().expect("gate lock");
            while !*open {
                open = gate.1.wait(open).expect("gate wait");
            }
        }
    }
}

impl RelayDriver for RecordingRelays {
    fn drive(&mut self, relay: Relay, state: RelayState) -> Result<(), HardwareError> {
        if relay == Relay::Softstart && state == RelayState::Energized {
            self.wait_for_gate();
        }
        self.calls.lock().expect("calls lock").push((relay, state));
        Ok(())
    }

    fn chime(&mut self, tone: Tone) -> Result<(), HardwareError> {
        self.tones.lock().expect("tones lock").push(tone);
        Ok(())
    }
}

pub type TestController = DriveController<RecordingChannel, RecordingRelays, ManualTimebase>;

pub struct Rig {
    pub clock: ManualTimebase,
    pub channel: RecordingChannel,
    pub relays: RecordingRelays,
    pub controller: TestController,
}

impl Rig {
    pub fn new(config: &ControllerConfig) -> Self {
        Self::with_relays(config, RecordingRelays::new())
    }

    pub fn with_relays(config: &ControllerConfig, relays: RecordingRelays) -> Self {
        let clock = ManualTimebase::new();
        let channel = RecordingChannel::new(&clock);
        let controller =
            DriveController::new(channel.clone(), relays.clone(), clock.clone(), config)
                .expect("controller starts");
        channel.clear();
        Self {
            clock,
            channel,
            relays,
            controller,
        }
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new(&ControllerConfig::default())
    }
}

/// `true` for a write that stops the output.
pub fn is_stop(op: &Op) -> bool {
    matches!(
        op,
        Op::Abort | Op::Level(Level::Low) | Op::Pwm(_, DutyCycle::ZERO)
    )
}

/// `true` for a write that drives the output.
pub fn is_drive(op: &Op) -> bool {
    !is_stop(op)
}

/// Byte stream fed by the test; reads block until the next chunk arrives and
/// hit end of stream once the sender is dropped.
pub struct FedStream {
    chunks: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

pub fn fed_stream() -> (Sender<Vec<u8>>, FedStream) {
    let (sender, chunks) = mpsc::channel();
    (
        sender,
        FedStream {
            chunks,
            pending: Vec::new(),
        },
    )
}

impl Read for FedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.chunks.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let len = buf.len().min(self.pending.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.drain(..len);
        Ok(len)
    }
}

/// Polls `condition` on the host clock, failing after five seconds.
pub fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}
