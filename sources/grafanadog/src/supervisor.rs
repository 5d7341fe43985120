//! Asking the host's process supervisor to run the service.

use crate::command;
use log::info;
use std::time::Duration;

use crate::error::Result;

/// What the controller needs from a process supervisor.
pub trait Supervisor {
    fn is_running(&self) -> Result<bool>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn restart(&mut self) -> Result<()>;
}

/// Runs the service as a systemd unit through `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemd {
    unit: String,
    timeout: Duration,
}

impl Systemd {
    pub fn new<S: Into<String>>(unit: S) -> Self {
        Self {
            unit: unit.into(),
            timeout: command::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn systemctl(&self, verb: &str) -> Result<()> {
        command::run_checked(constants::SYSTEMCTL_BIN, &[verb, self.unit.as_str()], self.timeout)
    }
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new(constants::GRAFANA_UNIT)
    }
}

impl Supervisor for Systemd {
    fn is_running(&self) -> Result<bool> {
        let finished = command::run(
            constants::SYSTEMCTL_BIN,
            &["is-active", "--quiet", self.unit.as_str()],
            self.timeout,
        )?;
        Ok(finished.status.success())
    }

    /// Enables the unit as well, so it comes back after a reboot.
    fn start(&mut self) -> Result<()> {
        info!("Starting {}", self.unit);
        self.systemctl("enable")?;
        self.systemctl("start")
    }

    fn stop(&mut self) -> Result<()> {
        info!("Stopping {}", self.unit);
        self.systemctl("stop")
    }

    fn restart(&mut self) -> Result<()> {
        info!("Restarting {}", self.unit);
        self.systemctl("restart")
    }
}

/// Asks systemd to pick up changed unit files.
pub fn daemon_reload(timeout: Duration) -> Result<()> {
    command::run_checked(constants::SYSTEMCTL_BIN, &["daemon-reload"], timeout)
}
