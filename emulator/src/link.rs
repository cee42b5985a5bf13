use std::process::{Command, Stdio};

use interrupter_core::link::ReachabilityProbe;

/// Probes a host with one ICMP echo through the system `ping`.
#[derive(Clone, Debug)]
pub struct PingProbe {
    host: String,
}

impl PingProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl ReachabilityProbe for PingProbe {
    fn probe(&mut self) -> bool {
        Command::new("ping")
            .args(["-c", "1", "-W", "1", &self.host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }
}
