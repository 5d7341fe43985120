//! Inputs collected from the agent's environment: the operator's local configuration for the
//! service, and the data sources announced over the upstream relation.

use crate::error::{self, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use snafu::{ensure, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

const DASHBOARD_KEY_PREFIX: &str = "dashboard-";

/// Operator-facing configuration of the managed service.  Every field is optional; the desired
/// state builder supplies defaults.  Empty strings are treated the same as unset, since that's how
/// unset options usually arrive.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocalConfig {
    pub http_port: Option<u16>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub log_level: Option<String>,
    pub enable_anonymous: Option<bool>,
    pub allow_embedding: Option<bool>,
    pub external_url: Option<String>,
    pub grafana_version: Option<String>,

    /// Address this instance is reachable on, used to derive the external URL.  Not part of the
    /// config file; filled in by whoever loads it.
    #[serde(skip)]
    pub bind_address: Option<String>,

    /// Everything else, including the numbered `dashboard-N` slots.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl LocalConfig {
    /// Loads the config file.  A missing file is the same as an empty one.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).context(error::ConfigReadSnafu { path }),
        };
        Self::from_toml(&s).context(error::ConfigParseSnafu { path })
    }

    pub fn from_toml(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// The raw dashboard documents keyed by slot ordinal.  Keys outside the slot range are
    /// ignored with a warning, as are values that aren't strings.
    pub fn dashboard_inputs(&self) -> BTreeMap<u8, String> {
        let mut inputs = BTreeMap::new();
        for (key, value) in &self.extra {
            let slot = match key
                .strip_prefix(DASHBOARD_KEY_PREFIX)
                .and_then(|n| n.parse::<u8>().ok())
            {
                Some(slot) => slot,
                None => {
                    debug!("Ignoring unknown config key '{}'", key);
                    continue;
                }
            };
            if slot >= constants::DASHBOARD_SLOTS {
                warn!(
                    "Ignoring '{}', only {} dashboard slots are supported",
                    key,
                    constants::DASHBOARD_SLOTS
                );
                continue;
            }
            match value.as_str() {
                Some(raw) => {
                    inputs.insert(slot, raw.to_string());
                }
                None => warn!("Ignoring '{}', expected a string", key),
            }
        }
        inputs
    }

    /// Set a dashboard slot's raw document.
    pub fn set_dashboard<S: Into<String>>(&mut self, slot: u8, raw: S) {
        self.extra.insert(
            format!("{}{}", DASHBOARD_KEY_PREFIX, slot),
            toml::Value::String(raw.into()),
        );
    }

    /// The explicit admin password override, if one is set.
    pub fn admin_password_override(&self) -> Option<&str> {
        non_empty(&self.admin_password)
    }

    pub fn grafana_version(&self) -> &str {
        non_empty(&self.grafana_version).unwrap_or(constants::GRAFANA_DEFAULT_VERSION)
    }
}

/// Treats an empty or all-whitespace option as unset.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// One data source offered by an upstream relation.  Field names follow the relation's own
/// `source_name`/`source_type` spelling, with plain `name`/`type` accepted too.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceAnnouncement {
    #[serde(alias = "source_name")]
    pub name: Option<String>,
    #[serde(rename = "type", alias = "source_type")]
    pub source_type: Option<String>,
    pub url: Option<String>,
    pub uid: Option<String>,
}

/// Loads data-source announcements from a JSON array.  A missing file means no announcements.
/// Entries that don't look like an announcement are dropped with a warning rather than failing
/// the rest.
pub fn load_announcements<P: AsRef<Path>>(path: P) -> Result<Vec<SourceAnnouncement>> {
    let path = path.as_ref();
    let s = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No data-source announcements at {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).context(error::SourcesReadSnafu { path }),
    };
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_json::Value =
        serde_json::from_str(&s).context(error::SourcesParseSnafu { path })?;
    ensure!(value.is_array(), error::SourcesFormatSnafu { path });

    let mut announcements = Vec::new();
    if let serde_json::Value::Array(entries) = value {
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<SourceAnnouncement>(entry) {
                Ok(announcement) => announcements.push(announcement),
                Err(e) => warn!("Skipping malformed data-source announcement {}: {}", index, e),
            }
        }
    }
    debug!("Loaded {} data-source announcements", announcements.len());
    Ok(announcements)
}
