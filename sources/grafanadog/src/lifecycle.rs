/*!
The controller: one event in, the service converged, one status out.

Each event is handled from scratch.  The only things carried between events are the files on disk
and a small `ControllerState` record in the agent's state directory holding the lifecycle phase.
*/

use crate::applied::AppliedArtifactSet;
use crate::config::{LocalConfig, SourceAnnouncement};
use crate::desired::{self, ServerSettings};
use crate::error::{self, Result};
use crate::installer::Installer;
use crate::paths::Paths;
use crate::render::{self, ChangedKinds};
use crate::secret::{self, ResolvedSecret};
use crate::status::{self, HealthCheck, HealthQuery, StatusReport};
use crate::supervisor::Supervisor;
use log::{debug, info, warn};
use peerstore::PeerStore;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    NotInstalled,
    Installing,
    Configured,
    Running,
    Stopped,
    /// Installation failed; only another `install` gets out of here.
    Blocked(String),
}

impl Phase {
    fn is_installed(&self) -> bool {
        matches!(self, Phase::Configured | Phase::Running | Phase::Stopped)
    }
}

/// What survives between events.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub phase: Phase,
    /// The last reconciliation used a provisional admin secret, so the next confirmed one
    /// replaces it.
    #[serde(default)]
    pub secret_provisional: bool,
    /// Artifacts changed since the service last (re)started.
    #[serde(default)]
    pub restart_pending: bool,
}

impl ControllerState {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(STATE_FILE)
    }

    /// Loads the saved state; a missing file is a fresh agent.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = Self::path(state_dir);
        match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).context(error::StateParseSnafu { path }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).context(error::FileReadSnafu { path }),
        }
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let s = serde_json::to_string_pretty(self).context(error::SerializeJsonSnafu {
            what: "controller state",
        })?;
        render::write_atomic(&Self::path(state_dir), &s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Install,
    ConfigChanged,
    Start,
    RelationChanged,
    Stop,
    PeriodicCheck,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Install => "install",
            Event::ConfigChanged => "config-changed",
            Event::Start => "start",
            Event::RelationChanged => "relation-changed",
            Event::Stop => "stop",
            Event::PeriodicCheck => "periodic-check",
        };
        write!(f, "{}", name)
    }
}

/// A request made of the supervisor while handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Restart,
    Stop,
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub event: Event,
    pub phase: Phase,
    pub changed: ChangedKinds,
    pub action: Option<Action>,
    pub status: StatusReport,
    /// A coordination problem that's expected to clear up on a later event.
    pub transient: bool,
    /// A confirmed admin secret took over from a provisional one.
    pub secret_confirmed: bool,
    /// Inputs that were skipped.
    pub diagnostics: Vec<String>,
}

impl Outcome {
    fn new(event: Event, phase: Phase) -> Self {
        Self {
            event,
            phase,
            changed: ChangedKinds::new(),
            action: None,
            status: StatusReport::NotInstalled,
            transient: false,
            secret_confirmed: false,
            diagnostics: Vec::new(),
        }
    }
}

/// Everything the controller knows about its environment for one event.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub config: LocalConfig,
    pub announcements: Vec<SourceAnnouncement>,
    pub is_leader: bool,
}

pub struct Controller {
    paths: Paths,
    inputs: Inputs,
    peer_store: Option<Box<dyn PeerStore>>,
    supervisor: Box<dyn Supervisor>,
    installer: Box<dyn Installer>,
    health: Box<dyn HealthCheck>,
}

impl Controller {
    pub fn new(
        paths: Paths,
        inputs: Inputs,
        supervisor: Box<dyn Supervisor>,
        installer: Box<dyn Installer>,
        health: Box<dyn HealthCheck>,
    ) -> Self {
        Self {
            paths,
            inputs,
            peer_store: None,
            supervisor,
            installer,
            health,
        }
    }

    pub fn with_peer_store(mut self, peer_store: Box<dyn PeerStore>) -> Self {
        self.peer_store = Some(peer_store);
        self
    }

    /// Handle a single event.  Only a failed installation, or being unable to read or record the
    /// controller's own state, is an error; configuration problems are reported in the outcome's
    /// status.
    pub fn handle(&mut self, event: Event) -> Result<Outcome> {
        info!("Handling {} event", event);
        let mut state = ControllerState::load(&self.paths.state_dir)?;
        debug!("Starting from {:?}", state);

        if event == Event::Install {
            if state.phase.is_installed() {
                info!("Already installed, reconciling only");
            } else {
                self.install(&mut state)?;
            }
        }

        let mut outcome = Outcome::new(event, state.phase.clone());
        match state.phase.clone() {
            Phase::NotInstalled => outcome.status = self.status_without_reconcile(),
            Phase::Installing => outcome.status = StatusReport::Installing,
            Phase::Blocked(reason) => outcome.status = StatusReport::ConfigurationFailed(reason),
            _ if event == Event::Stop => self.stop(&mut state, &mut outcome)?,
            _ => {
                let before = state.clone();
                if let Err(e) = self.reconcile(event, &mut state, &mut outcome) {
                    warn!("Reconciliation failed: {}", e);
                    state.phase = before.phase.clone();
                    outcome.status = StatusReport::ConfigurationFailed(e.to_string());
                }
                if state != before {
                    state.save(&self.paths.state_dir)?;
                }
            }
        }

        outcome.phase = state.phase.clone();
        info!("{} -> {:?}: {}", event, outcome.phase, outcome.status);
        Ok(outcome)
    }

    /// Runs the install-only steps.  A failure leaves the controller `Blocked` with the error as
    /// the reason.
    fn install(&mut self, state: &mut ControllerState) -> Result<()> {
        state.phase = Phase::Installing;
        state.save(&self.paths.state_dir)?;

        match self.install_steps() {
            Ok(()) => {
                state.phase = Phase::Configured;
                state.save(&self.paths.state_dir)?;
                info!("Installation complete");
                Ok(())
            }
            Err(e) => {
                state.phase = Phase::Blocked(e.to_string());
                if let Err(save_err) = state.save(&self.paths.state_dir) {
                    warn!("Unable to record failed installation: {}", save_err);
                }
                Err(e)
            }
        }
    }

    fn install_steps(&mut self) -> Result<()> {
        let version = self.inputs.config.grafana_version().to_string();
        self.installer.provision()?;
        self.installer.acquire(&version)?;
        self.installer.install_unit()
    }

    /// Only a service that ran can be stopped; a `Configured` one that never started stays as is.
    fn stop(&mut self, state: &mut ControllerState, outcome: &mut Outcome) -> Result<()> {
        let running = self.supervisor.is_running()?;
        if running {
            self.supervisor.stop()?;
            outcome.action = Some(Action::Stop);
        }
        if running || state.phase == Phase::Running {
            state.phase = Phase::Stopped;
            state.save(&self.paths.state_dir)?;
        }
        outcome.status = self.status_without_reconcile();
        Ok(())
    }

    /// Converge the on-disk artifacts and the service with the current inputs.
    fn reconcile(
        &mut self,
        event: Event,
        state: &mut ControllerState,
        outcome: &mut Outcome,
    ) -> Result<()> {
        let resolved = match secret::resolve_secret(
            &self.inputs.config,
            self.peer_store.as_deref_mut(),
            self.inputs.is_leader,
        ) {
            Ok(resolved) => resolved,
            Err(e) if e.is_secret_unconfirmed() => {
                warn!("{}; continuing with a provisional secret", e);
                outcome.transient = true;
                ResolvedSecret::placeholder()
            }
            Err(e) => return Err(e),
        };
        if state.secret_provisional && !resolved.is_provisional() {
            info!("Admin secret confirmed, replacing the provisional one");
            outcome.secret_confirmed = true;
        }
        state.secret_provisional = resolved.is_provisional();

        let desired = desired::build(
            &self.inputs.config,
            &self.inputs.announcements,
            &self.inputs.config.dashboard_inputs(),
        );
        outcome.diagnostics = desired.diagnostics.clone();

        let mut applied = AppliedArtifactSet::from_disk(&self.paths)?;
        let secret = match (&applied.committed_secret, resolved.is_provisional()) {
            (Some(committed), true) => {
                debug!("Keeping the committed admin secret until the real one is confirmed");
                committed.clone()
            }
            _ => resolved.value,
        };

        let artifacts = render::render(&desired, &secret, &self.paths)?;
        let changed = render::diff(&artifacts, &applied);
        if !changed.is_empty() && !state.restart_pending {
            // Recorded before writing anything, so a partial write or a failed restart is still
            // followed by a restart on a later event.
            state.restart_pending = true;
            state.save(&self.paths.state_dir)?;
        }
        render::apply(&artifacts, &changed, &mut applied, &self.paths)?;
        outcome.changed = changed;

        let running = self.supervisor.is_running()?;
        let action = if event == Event::Start {
            if !running {
                Some(Action::Start)
            } else if state.restart_pending {
                Some(Action::Restart)
            } else {
                None
            }
        } else if state.restart_pending {
            if running {
                Some(Action::Restart)
            } else if state.phase != Phase::Stopped {
                Some(Action::Start)
            } else {
                info!("Service was stopped explicitly, not starting it");
                None
            }
        } else {
            None
        };

        match action {
            Some(Action::Start) => self.supervisor.start()?,
            Some(Action::Restart) => self.supervisor.restart()?,
            _ => {}
        }
        if action.is_some() {
            state.restart_pending = false;
            state.phase = Phase::Running;
        } else if running && state.phase == Phase::Configured {
            state.phase = Phase::Running;
        }
        outcome.action = action;

        let query = HealthQuery {
            http_port: desired.server.http_port,
            admin_user: desired.server.admin_user.clone(),
            secret,
            external_url: desired.server.external_url.clone(),
        };
        outcome.status = status::derive(
            &*self.installer,
            &*self.supervisor,
            &*self.health,
            &query,
        );
        Ok(())
    }

    /// Status for events that don't reconcile, using whatever secret is already on disk.
    fn status_without_reconcile(&self) -> StatusReport {
        let server = ServerSettings::from_config(&self.inputs.config);
        let secret = AppliedArtifactSet::from_disk(&self.paths)
            .ok()
            .and_then(|applied| applied.committed_secret)
            .unwrap_or_else(|| secret::PLACEHOLDER_SECRET.to_string());
        let query = HealthQuery {
            http_port: server.http_port,
            admin_user: server.admin_user,
            secret,
            external_url: server.external_url,
        };
        status::derive(
            &*self.installer,
            &*self.supervisor,
            &*self.health,
            &query,
        )
    }
}
