//! Where the managed service and the agent keep things on disk.

use std::path::{Path, PathBuf};

/// Filesystem layout used by one reconciliation.  Defaults come from `constants`; tests root
/// everything in a temporary directory with `Paths::under`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub logs_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub provisioning_dir: PathBuf,
    pub dashboards_dir: PathBuf,
    pub unit_file: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from(constants::GRAFANA_INSTALL_DIR),
            data_dir: PathBuf::from(constants::GRAFANA_DATA_DIR),
            config_dir: PathBuf::from(constants::GRAFANA_CONFIG_DIR),
            config_file: PathBuf::from(constants::GRAFANA_CONFIG_FILE),
            logs_dir: PathBuf::from(constants::GRAFANA_LOGS_DIR),
            plugins_dir: PathBuf::from(constants::GRAFANA_PLUGINS_DIR),
            provisioning_dir: PathBuf::from(constants::GRAFANA_PROVISIONING_DIR),
            dashboards_dir: PathBuf::from(constants::GRAFANA_DASHBOARDS_DIR),
            unit_file: PathBuf::from(constants::SYSTEMD_UNIT_FILE),
            state_dir: PathBuf::from(constants::AGENT_STATE_DIR),
        }
    }
}

impl Paths {
    /// The default layout re-rooted under `root`, e.g. `/etc/grafana` becomes
    /// `<root>/etc/grafana`.
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        let rebase = |p: PathBuf| root.join(p.strip_prefix("/").unwrap_or(p.as_path()));
        let d = Self::default();
        Self {
            install_dir: rebase(d.install_dir),
            data_dir: rebase(d.data_dir),
            config_dir: rebase(d.config_dir),
            config_file: rebase(d.config_file),
            logs_dir: rebase(d.logs_dir),
            plugins_dir: rebase(d.plugins_dir),
            provisioning_dir: rebase(d.provisioning_dir),
            dashboards_dir: rebase(d.dashboards_dir),
            unit_file: rebase(d.unit_file),
            state_dir: rebase(d.state_dir),
        }
    }

    /// Data-source provisioning document.
    pub fn datasources_file(&self) -> PathBuf {
        self.provisioning_dir.join("datasources").join("default.yaml")
    }

    /// Dashboard provisioning index.
    pub fn dashboards_index_file(&self) -> PathBuf {
        self.provisioning_dir.join("dashboards").join("default.yaml")
    }

    pub fn grafana_server_bin(&self) -> PathBuf {
        self.install_dir.join("bin").join("grafana-server")
    }

    pub fn grafana_cli_bin(&self) -> PathBuf {
        self.install_dir.join("bin").join("grafana-cli")
    }

    /// Directories the service expects to exist, owned by the service user.
    pub fn service_directories(&self) -> Vec<PathBuf> {
        vec![
            self.install_dir.clone(),
            self.data_dir.clone(),
            self.config_dir.clone(),
            self.logs_dir.clone(),
            self.plugins_dir.clone(),
            self.dashboards_dir.clone(),
            self.provisioning_dir.join("datasources"),
            self.provisioning_dir.join("dashboards"),
            self.provisioning_dir.join("notifiers"),
            self.provisioning_dir.join("plugins"),
        ]
    }
}
