//! Whole-controller scenarios.  Every event gets a fresh `Controller`, as it would from a fresh
//! process, and the host is replaced by mocks that share one record of what happened.

use grafanadog::config::{LocalConfig, SourceAnnouncement};
use grafanadog::error::Result;
use grafanadog::installer::{release_arch, Installer};
use grafanadog::paths::Paths;
use grafanadog::render::ArtifactKind;
use grafanadog::status::{HealthCheck, HealthQuery, StatusReport};
use grafanadog::supervisor::Supervisor;
use grafanadog::{Action, Controller, Event, Inputs, Outcome, Phase};
use peerstore::{MemoryPeerStore, PeerStore};
use std::cell::{Cell, RefCell};
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Default)]
struct Host {
    installed: Cell<bool>,
    running: Cell<bool>,
    starts: Cell<usize>,
    restarts: Cell<usize>,
    stops: Cell<usize>,
    acquired_version: RefCell<Option<String>>,
    fail_acquire: Cell<bool>,
    datasources: Cell<usize>,
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

struct MockSupervisor(Rc<Host>);

impl Supervisor for MockSupervisor {
    fn is_running(&self) -> Result<bool> {
        Ok(self.0.running.get())
    }

    fn start(&mut self) -> Result<()> {
        bump(&self.0.starts);
        self.0.running.set(true);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        bump(&self.0.stops);
        self.0.running.set(false);
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        bump(&self.0.restarts);
        self.0.running.set(true);
        Ok(())
    }
}

struct MockInstaller(Rc<Host>);

impl Installer for MockInstaller {
    fn is_installed(&self) -> bool {
        self.0.installed.get()
    }

    fn provision(&mut self) -> Result<()> {
        Ok(())
    }

    fn acquire(&mut self, version: &str) -> Result<()> {
        if self.0.fail_acquire.get() {
            // Any real installer error will do.
            return Err(release_arch("mips").unwrap_err());
        }
        *self.0.acquired_version.borrow_mut() = Some(version.to_string());
        self.0.installed.set(true);
        Ok(())
    }

    fn install_unit(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MockHealth(Rc<Host>);

impl HealthCheck for MockHealth {
    fn datasource_count(&self, _query: &HealthQuery) -> Result<usize> {
        Ok(self.0.datasources.get())
    }
}

/// Lets a test keep looking at a peer store after handing it to a controller.
struct SharedStore(Rc<RefCell<MemoryPeerStore>>);

impl PeerStore for SharedStore {
    fn get(&self, key: &str) -> peerstore::Result<Option<String>> {
        self.0.borrow().get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> peerstore::Result<()> {
        self.0.borrow_mut().set(key, value)
    }
}

struct Instance {
    _root: TempDir,
    paths: Paths,
    host: Rc<Host>,
    store: Option<Rc<RefCell<MemoryPeerStore>>>,
}

impl Instance {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let paths = Paths::under(root.path());
        Self {
            _root: root,
            paths,
            host: Rc::new(Host::default()),
            store: None,
        }
    }

    fn with_store(mut self, store: &Rc<RefCell<MemoryPeerStore>>) -> Self {
        self.store = Some(Rc::clone(store));
        self
    }

    fn handle(&self, inputs: &Inputs, event: Event) -> Result<Outcome> {
        let mut controller = Controller::new(
            self.paths.clone(),
            inputs.clone(),
            Box::new(MockSupervisor(Rc::clone(&self.host))),
            Box::new(MockInstaller(Rc::clone(&self.host))),
            Box::new(MockHealth(Rc::clone(&self.host))),
        );
        if let Some(store) = &self.store {
            controller = controller.with_peer_store(Box::new(SharedStore(Rc::clone(store))));
        }
        controller.handle(event)
    }

    fn installed(inputs: &Inputs) -> Self {
        let instance = Self::new();
        instance.handle(inputs, Event::Install).unwrap();
        instance
    }

    fn settings(&self) -> String {
        fs::read_to_string(&self.paths.config_file).unwrap()
    }

    fn dashboard_files(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.paths.dashboards_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

fn prometheus(name: &str, url: &str) -> SourceAnnouncement {
    SourceAnnouncement {
        name: Some(name.to_string()),
        source_type: Some("prometheus".to_string()),
        url: Some(url.to_string()),
        uid: None,
    }
}

fn with_dashboards(slots: &[(u8, &str)]) -> Inputs {
    let mut config = LocalConfig::default();
    for (slot, raw) in slots {
        config.set_dashboard(*slot, *raw);
    }
    Inputs {
        config,
        ..Default::default()
    }
}

fn data_sources(instance: &Instance) -> serde_yaml::Value {
    let s = fs::read_to_string(instance.paths.datasources_file()).unwrap();
    serde_yaml::from_str(&s).unwrap()
}

#[test]
fn install_starts_service() {
    let inputs = Inputs::default();
    let instance = Instance::new();
    let outcome = instance.handle(&inputs, Event::Install).unwrap();

    assert_eq!(
        instance.host.acquired_version.borrow().as_deref(),
        Some(constants::GRAFANA_DEFAULT_VERSION)
    );
    assert_eq!(outcome.phase, Phase::Running);
    assert_eq!(outcome.action, Some(Action::Start));
    assert!(outcome.changed.contains(&ArtifactKind::Settings));
    assert_eq!(
        outcome.status,
        StatusReport::Ready(0, "http://localhost:3000".to_string())
    );
    assert_eq!(instance.host.starts.get(), 1);
}

#[test]
fn unchanged_inputs_are_idempotent() {
    let inputs = with_dashboards(&[(0, r#"{"title": "CPU"}"#)]);
    let instance = Instance::installed(&inputs);
    let settings = instance.settings();

    for event in [Event::ConfigChanged, Event::PeriodicCheck, Event::RelationChanged] {
        let outcome = instance.handle(&inputs, event).unwrap();
        assert!(outcome.changed.is_empty(), "{} changed {:?}", event, outcome.changed);
        assert_eq!(outcome.action, None);
        assert_eq!(outcome.phase, Phase::Running);
    }
    assert_eq!(instance.host.starts.get(), 1);
    assert_eq!(instance.host.restarts.get(), 0);
    assert_eq!(instance.settings(), settings);
}

#[test]
fn one_prometheus_and_blank_slots() {
    let inputs = Inputs {
        announcements: vec![prometheus("Prometheus", "http://10.0.0.1:9090")],
        ..with_dashboards(&[(0, ""), (1, "   ")])
    };
    let instance = Instance::installed(&inputs);

    let value = data_sources(&instance);
    let sources = value["datasources"].as_sequence().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["url"].as_str(), Some("http://10.0.0.1:9090"));
    assert_eq!(sources[0]["isDefault"].as_bool(), Some(true));

    assert!(instance.dashboard_files().is_empty());
    assert!(!instance.paths.dashboards_index_file().exists());
    assert!(instance.settings().contains("http_port = 3000\n"));
}

#[test]
fn occupied_and_blank_slot() {
    let inputs = with_dashboards(&[(0, r#"{"title":"CPU"}"#), (1, "")]);
    let instance = Instance::installed(&inputs);

    assert_eq!(instance.dashboard_files(), vec!["cpu-0.json".to_string()]);
    let index = fs::read_to_string(instance.paths.dashboards_index_file()).unwrap();
    assert!(index.contains(&instance.paths.dashboards_dir.display().to_string()));
}

#[test]
fn cleared_slot_is_removed() {
    let both = with_dashboards(&[(0, r#"{"title": "CPU"}"#), (3, r#"{"title": "Memory"}"#)]);
    let instance = Instance::installed(&both);
    assert_eq!(
        instance.dashboard_files(),
        vec!["cpu-0.json".to_string(), "memory-3.json".to_string()]
    );

    let first_only = with_dashboards(&[(0, r#"{"title": "CPU"}"#), (3, "")]);
    let outcome = instance.handle(&first_only, Event::ConfigChanged).unwrap();
    assert_eq!(
        outcome.changed.iter().copied().collect::<Vec<_>>(),
        vec![ArtifactKind::Dashboards]
    );
    assert_eq!(outcome.action, Some(Action::Restart));
    assert_eq!(instance.dashboard_files(), vec!["cpu-0.json".to_string()]);
    assert!(instance.paths.dashboards_index_file().exists());

    let none = with_dashboards(&[]);
    instance.handle(&none, Event::ConfigChanged).unwrap();
    assert!(instance.dashboard_files().is_empty());
    assert!(!instance.paths.dashboards_index_file().exists());
    assert_eq!(instance.host.restarts.get(), 2);
}

#[test]
fn bad_dashboard_is_reported_not_fatal() {
    let inputs = with_dashboards(&[(0, "{oops"), (1, r#"{"title": "Disk"}"#)]);
    let instance = Instance::new();
    let outcome = instance.handle(&inputs, Event::Install).unwrap();
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(instance.dashboard_files(), vec!["disk-1.json".to_string()]);
    assert!(matches!(outcome.status, StatusReport::Ready(..)));
}

#[test]
fn unusable_title_does_not_block_other_slots() {
    let long = format!(r#"{{"title": "{}"}}"#, "a".repeat(300));
    let inputs = with_dashboards(&[
        (0, long.as_str()),
        (2, r#"{"title": "C\u0000P\u0000U"}"#),
        (5, r#"{"title":"CPU"}"#),
    ]);
    let instance = Instance::new();
    let outcome = instance.handle(&inputs, Event::Install).unwrap();

    assert!(matches!(outcome.status, StatusReport::Ready(..)));
    assert_eq!(outcome.phase, Phase::Running);
    assert_eq!(
        instance.dashboard_files(),
        vec![
            format!("{}-0.json", "a".repeat(200)),
            "cpu-2.json".to_string(),
            "cpu-5.json".to_string(),
        ]
    );
    assert!(instance.paths.dashboards_index_file().exists());
}

#[test]
fn later_announcement_is_default() {
    let inputs = Inputs {
        announcements: vec![
            prometheus("first", "http://10.0.0.1:9090"),
            prometheus("second", "http://10.0.0.2:9090"),
        ],
        ..Default::default()
    };
    let instance = Instance::installed(&inputs);

    let value = data_sources(&instance);
    let defaults: Vec<&str> = value["datasources"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter(|ds| ds["isDefault"].as_bool() == Some(true))
        .map(|ds| ds["name"].as_str().unwrap())
        .collect();
    assert_eq!(defaults, vec!["second"]);
}

#[test]
fn relation_departure_removes_data_sources() {
    let inputs = Inputs {
        announcements: vec![prometheus("Prometheus", "http://10.0.0.1:9090")],
        ..Default::default()
    };
    let instance = Instance::installed(&inputs);
    assert!(instance.paths.datasources_file().exists());

    let outcome = instance
        .handle(&Inputs::default(), Event::RelationChanged)
        .unwrap();
    assert!(outcome.changed.contains(&ArtifactKind::DataSources));
    assert!(!instance.paths.datasources_file().exists());
}

#[test]
fn peers_agree_on_secret() {
    let store = Rc::new(RefCell::new(MemoryPeerStore::new()));
    let leader_inputs = Inputs {
        is_leader: true,
        ..Default::default()
    };
    let follower_inputs = Inputs::default();

    let leader = Instance::new().with_store(&store);
    leader.handle(&leader_inputs, Event::Install).unwrap();
    let follower = Instance::new().with_store(&store);
    follower.handle(&follower_inputs, Event::Install).unwrap();

    let secret = store
        .borrow()
        .get(constants::PEER_ADMIN_PASSWORD_KEY)
        .unwrap()
        .unwrap();
    let line = format!("admin_password = {}\n", secret);
    assert!(leader.settings().contains(&line));
    assert!(follower.settings().contains(&line));

    // Later events on the leader don't generate again.
    leader
        .handle(&leader_inputs, Event::PeriodicCheck)
        .unwrap();
    assert_eq!(store.borrow().writes(), 1);
}

#[test]
fn follower_waits_for_leader() {
    let store = Rc::new(RefCell::new(MemoryPeerStore::new()));
    let follower = Instance::new().with_store(&store);
    follower.handle(&Inputs::default(), Event::Install).unwrap();

    assert_eq!(store.borrow().writes(), 0);
    assert!(follower.settings().contains("admin_password = admin\n"));

    // Once the leader publishes, the follower picks it up and restarts with it.
    store
        .borrow_mut()
        .set(constants::PEER_ADMIN_PASSWORD_KEY, "from-leader")
        .unwrap();
    let outcome = follower
        .handle(&Inputs::default(), Event::RelationChanged)
        .unwrap();
    assert_eq!(
        outcome.changed.iter().copied().collect::<Vec<_>>(),
        vec![ArtifactKind::Settings]
    );
    assert_eq!(outcome.action, Some(Action::Restart));
    assert!(outcome.secret_confirmed);
    assert!(follower.settings().contains("admin_password = from-leader\n"));

    let outcome = follower
        .handle(&Inputs::default(), Event::PeriodicCheck)
        .unwrap();
    assert!(!outcome.secret_confirmed);
}

#[test]
fn unreachable_store_keeps_committed_secret() {
    let store = Rc::new(RefCell::new(MemoryPeerStore::new()));
    let inputs = Inputs {
        is_leader: true,
        ..Default::default()
    };
    let instance = Instance::new().with_store(&store);
    instance.handle(&inputs, Event::Install).unwrap();
    let settings = instance.settings();

    store.borrow_mut().set_unreachable(true);
    let outcome = instance.handle(&inputs, Event::PeriodicCheck).unwrap();
    assert!(outcome.transient);
    assert!(outcome.changed.is_empty());
    assert_eq!(outcome.action, None);
    assert_eq!(instance.settings(), settings);
}

#[test]
fn lost_write_is_transient() {
    let store = Rc::new(RefCell::new(MemoryPeerStore::new()));
    store.borrow_mut().set_drop_writes(true);
    let inputs = Inputs {
        is_leader: true,
        ..Default::default()
    };
    let instance = Instance::new().with_store(&store);
    let outcome = instance.handle(&inputs, Event::Install).unwrap();

    assert!(outcome.transient);
    assert_eq!(outcome.phase, Phase::Running);
    assert!(instance.settings().contains("admin_password = admin\n"));
}

#[test]
fn failed_install_blocks_until_reinstalled() {
    let inputs = Inputs::default();
    let instance = Instance::new();
    instance.host.fail_acquire.set(true);

    let err = instance.handle(&inputs, Event::Install).unwrap_err();
    let reason = err.to_string();

    let outcome = instance.handle(&inputs, Event::ConfigChanged).unwrap();
    assert_eq!(outcome.phase, Phase::Blocked(reason.clone()));
    assert_eq!(outcome.status, StatusReport::ConfigurationFailed(reason));
    assert!(outcome.changed.is_empty());
    assert!(!instance.paths.config_file.exists());

    instance.host.fail_acquire.set(false);
    let outcome = instance.handle(&inputs, Event::Install).unwrap();
    assert_eq!(outcome.phase, Phase::Running);
}

#[test]
fn events_before_install_only_report() {
    let instance = Instance::new();
    for event in [Event::ConfigChanged, Event::Start, Event::PeriodicCheck] {
        let outcome = instance.handle(&Inputs::default(), event).unwrap();
        assert_eq!(outcome.phase, Phase::NotInstalled);
        assert_eq!(outcome.status, StatusReport::NotInstalled);
        assert_eq!(outcome.action, None);
    }
    assert!(!instance.paths.config_file.exists());
    assert_eq!(instance.host.starts.get(), 0);
}

#[test]
fn explicit_stop_is_honoured() {
    let instance = Instance::installed(&Inputs::default());

    let outcome = instance.handle(&Inputs::default(), Event::Stop).unwrap();
    assert_eq!(outcome.phase, Phase::Stopped);
    assert_eq!(outcome.action, Some(Action::Stop));
    assert_eq!(outcome.status, StatusReport::ServiceNotRunning);

    // A config change is written out but doesn't bring the service back.
    let changed = Inputs {
        config: LocalConfig {
            http_port: Some(3001),
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = instance.handle(&changed, Event::ConfigChanged).unwrap();
    assert!(outcome.changed.contains(&ArtifactKind::Settings));
    assert_eq!(outcome.action, None);
    assert_eq!(outcome.phase, Phase::Stopped);
    assert!(instance.settings().contains("http_port = 3001\n"));

    let outcome = instance.handle(&changed, Event::Start).unwrap();
    assert_eq!(outcome.action, Some(Action::Start));
    assert_eq!(outcome.phase, Phase::Running);
    assert_eq!(
        outcome.status,
        StatusReport::Ready(0, "http://localhost:3001".to_string())
    );
    assert_eq!(instance.host.starts.get(), 2);
}

#[test]
fn start_when_running_without_changes_does_nothing() {
    let instance = Instance::installed(&Inputs::default());
    instance.host.datasources.set(2);
    let outcome = instance.handle(&Inputs::default(), Event::Start).unwrap();
    assert_eq!(outcome.action, None);
    assert_eq!(
        outcome.status,
        StatusReport::Ready(2, "http://localhost:3000".to_string())
    );
}

#[test]
fn reinstall_is_reconcile_only() {
    let instance = Instance::installed(&Inputs::default());
    *instance.host.acquired_version.borrow_mut() = None;
    let outcome = instance.handle(&Inputs::default(), Event::Install).unwrap();
    assert_eq!(instance.host.acquired_version.borrow().as_deref(), None);
    assert!(outcome.changed.is_empty());
}

#[test]
fn partial_write_still_restarts_later() {
    let instance = Instance::installed(&Inputs::default());
    // A directory where a dashboard file should go makes that write fail after the settings file
    // has already been replaced.
    let blocker = instance.paths.dashboards_dir.join("cpu-0.json");
    fs::create_dir_all(&blocker).unwrap();

    let mut config = LocalConfig {
        http_port: Some(3001),
        ..Default::default()
    };
    config.set_dashboard(0, r#"{"title": "CPU"}"#);
    let inputs = Inputs {
        config,
        ..Default::default()
    };
    let outcome = instance.handle(&inputs, Event::ConfigChanged).unwrap();
    assert!(matches!(outcome.status, StatusReport::ConfigurationFailed(_)));
    assert_eq!(outcome.action, None);
    assert_eq!(outcome.phase, Phase::Running);
    assert!(instance.settings().contains("http_port = 3001\n"));
    assert_eq!(instance.host.restarts.get(), 0);

    // The dashboard is dropped again, so nothing differs from disk, but the service still has to
    // pick up the new settings.
    fs::remove_dir(&blocker).unwrap();
    let settings_only = Inputs {
        config: LocalConfig {
            http_port: Some(3001),
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = instance
        .handle(&settings_only, Event::PeriodicCheck)
        .unwrap();
    assert!(outcome.changed.is_empty());
    assert_eq!(outcome.action, Some(Action::Restart));
    assert_eq!(instance.host.restarts.get(), 1);
    assert_eq!(
        outcome.status,
        StatusReport::Ready(0, "http://localhost:3001".to_string())
    );

    let outcome = instance
        .handle(&settings_only, Event::PeriodicCheck)
        .unwrap();
    assert_eq!(outcome.action, None);
}

#[test]
fn stop_before_first_start_stays_configured() {
    let inputs = with_dashboards(&[(0, r#"{"title": "CPU"}"#)]);
    let instance = Instance::new();
    let blocker = instance.paths.dashboards_dir.join("cpu-0.json");
    fs::create_dir_all(&blocker).unwrap();

    let outcome = instance.handle(&inputs, Event::Install).unwrap();
    assert_eq!(outcome.phase, Phase::Configured);
    assert_eq!(instance.host.starts.get(), 0);

    let outcome = instance.handle(&inputs, Event::Stop).unwrap();
    assert_eq!(outcome.phase, Phase::Configured);
    assert_eq!(outcome.action, None);

    // Never explicitly stopped, so the next successful reconcile starts it.
    fs::remove_dir(&blocker).unwrap();
    let outcome = instance.handle(&inputs, Event::ConfigChanged).unwrap();
    assert_eq!(outcome.action, Some(Action::Start));
    assert_eq!(outcome.phase, Phase::Running);
    assert_eq!(instance.dashboard_files(), vec!["cpu-0.json".to_string()]);
}
