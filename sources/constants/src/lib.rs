/*!
  This crate contains constants shared across the grafanadog crates
*/

// Service identity
pub const GRAFANA_USER: &str = "grafana";
pub const GRAFANA_GROUP: &str = "grafana";
pub const GRAFANA_UNIT: &str = "grafana-server";
pub const GRAFANA_DEFAULT_VERSION: &str = "11.4.0";
pub const GRAFANA_RELEASE_URL: &str = "https://dl.grafana.com/oss/release";

// Filesystem layout of the managed service
pub const GRAFANA_INSTALL_DIR: &str = "/usr/local/grafana";
pub const GRAFANA_DATA_DIR: &str = "/var/lib/grafana";
pub const GRAFANA_CONFIG_DIR: &str = "/etc/grafana";
pub const GRAFANA_CONFIG_FILE: &str = "/etc/grafana/grafana.ini";
pub const GRAFANA_LOGS_DIR: &str = "/var/log/grafana";
pub const GRAFANA_PLUGINS_DIR: &str = "/var/lib/grafana/plugins";
pub const GRAFANA_PROVISIONING_DIR: &str = "/etc/grafana/provisioning";
pub const GRAFANA_DASHBOARDS_DIR: &str = "/var/lib/grafana/dashboards";
pub const SYSTEMD_UNIT_FILE: &str = "/etc/systemd/system/grafana-server.service";

// Agent state
pub const AGENT_STATE_DIR: &str = "/var/lib/grafanadog";
pub const AGENT_LOG_FILE: &str = "/var/log/grafanadog.log";
pub const AGENT_CONFIG_FILE: &str = "/etc/grafanadog/config.toml";

// Peer coordination
pub const PEER_ADMIN_PASSWORD_KEY: &str = "admin_password";

// Number of numbered dashboard slots accepted from local configuration
pub const DASHBOARD_SLOTS: u8 = 10;

// Shared binaries' locations
pub const SYSTEMCTL_BIN: &str = "/bin/systemctl";
pub const GROUPADD_BIN: &str = "/usr/sbin/groupadd";
pub const USERADD_BIN: &str = "/usr/sbin/useradd";
