//! The status line reported back after every event.

use crate::error::{self, Result};
use crate::installer::Installer;
use crate::supervisor::Supervisor;
use log::{debug, warn};
use reqwest::blocking::Client;
use snafu::ResultExt;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Upper bound on the health query.
pub const HEALTH_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Active,
    Maintenance,
    Blocked,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLevel::Active => write!(f, "active"),
            StatusLevel::Maintenance => write!(f, "maintenance"),
            StatusLevel::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    NotInstalled,
    Installing,
    ConfigurationFailed(String),
    ServiceNotRunning,
    /// Number of data sources the service reports, and its external URL.
    Ready(usize, String),
}

impl StatusReport {
    pub fn level(&self) -> StatusLevel {
        match self {
            StatusReport::Ready(..) => StatusLevel::Active,
            StatusReport::ConfigurationFailed(_) => StatusLevel::Blocked,
            StatusReport::NotInstalled
            | StatusReport::Installing
            | StatusReport::ServiceNotRunning => StatusLevel::Maintenance,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::NotInstalled => write!(f, "Grafana not installed"),
            StatusReport::Installing => write!(f, "Installing Grafana"),
            StatusReport::ConfigurationFailed(reason) => {
                write!(f, "Configuration failed: {}", reason)
            }
            StatusReport::ServiceNotRunning => write!(f, "Grafana service not running"),
            StatusReport::Ready(0, url) => write!(f, "Grafana ready (no datasources) - {}", url),
            StatusReport::Ready(count, url) => {
                write!(f, "Grafana ready ({} datasources) - {}", count, url)
            }
        }
    }
}

/// Everything needed to ask the running service how it's doing.
#[derive(Clone)]
pub struct HealthQuery {
    pub http_port: u16,
    pub admin_user: String,
    pub secret: String,
    pub external_url: String,
}

impl fmt::Debug for HealthQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthQuery")
            .field("http_port", &self.http_port)
            .field("admin_user", &self.admin_user)
            .field("secret", &"<redacted>")
            .field("external_url", &self.external_url)
            .finish()
    }
}

/// Asks the running service how many data sources it has.
pub trait HealthCheck {
    fn datasource_count(&self, query: &HealthQuery) -> Result<usize>;
}

/// Queries the service's HTTP API on the local host.
#[derive(Debug, Clone)]
pub struct GrafanaApi {
    base_url: Option<String>,
    timeout: Duration,
}

impl Default for GrafanaApi {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(HEALTH_TIMEOUT_SECONDS),
        }
    }
}

impl GrafanaApi {
    /// Talk to the given base URL instead of `http://localhost:<port>`.
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn datasources_url(&self, http_port: u16) -> Result<Url> {
        let base = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", http_port),
        };
        let url = format!("{}/api/datasources", base);
        Url::from_str(&url).context(error::UrlParseSnafu { url })
    }
}

impl HealthCheck for GrafanaApi {
    fn datasource_count(&self, query: &HealthQuery) -> Result<usize> {
        let url = self.datasources_url(query.http_port)?;
        debug!("Querying {}", url);
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context(error::HttpClientSnafu { url: url.clone() })?;
        let datasources: Vec<serde_json::Value> = client
            .get(url.clone())
            .basic_auth(&query.admin_user, Some(&query.secret))
            .send()
            .context(error::HttpSendSnafu { url: url.clone() })?
            .error_for_status()
            .context(error::HttpResponseSnafu { url: url.clone() })?
            .json()
            .context(error::HttpJsonSnafu { url })?;
        Ok(datasources.len())
    }
}

/// Classifies the service's state without changing anything.  Checks in order: installed,
/// running, healthy.  A failed health query still counts as ready, with no data sources.
pub fn derive(
    installer: &dyn Installer,
    supervisor: &dyn Supervisor,
    health: &dyn HealthCheck,
    query: &HealthQuery,
) -> StatusReport {
    if !installer.is_installed() {
        return StatusReport::NotInstalled;
    }

    match supervisor.is_running() {
        Ok(true) => {}
        Ok(false) => return StatusReport::ServiceNotRunning,
        Err(e) => {
            warn!("Unable to tell whether the service is running: {}", e);
            return StatusReport::ServiceNotRunning;
        }
    }

    let count = health.datasource_count(query).unwrap_or_else(|e| {
        warn!("Health query failed: {}", e);
        0
    });
    StatusReport::Ready(count, query.external_url.clone())
}
