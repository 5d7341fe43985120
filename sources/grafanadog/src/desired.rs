/*!
The desired-state builder combines local configuration, data-source announcements and the numbered
dashboard inputs into one normalized `DesiredState`.

Building never fails.  Bad input degrades: an unparsable dashboard slot becomes a tombstone and an
announcement without a URL is left out, each with a diagnostic, without affecting the others.
*/

use crate::config::{non_empty, LocalConfig, SourceAnnouncement};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_ADMIN_USER: &str = "admin";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_BIND_ADDRESS: &str = "localhost";
pub const DEFAULT_SOURCE_NAME: &str = "Prometheus";
pub const DEFAULT_SOURCE_TYPE: &str = "prometheus";
pub const DEFAULT_DASHBOARD_TITLE: &str = "dashboard";

/// Core settings of the managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSettings {
    pub http_port: u16,
    pub admin_user: String,
    pub log_level: String,
    pub anonymous_enabled: bool,
    pub embedding_allowed: bool,
    pub external_url: String,
}

impl ServerSettings {
    pub fn from_config(config: &LocalConfig) -> Self {
        let http_port = config.http_port.unwrap_or(DEFAULT_HTTP_PORT);
        let external_url = match non_empty(&config.external_url) {
            Some(url) => url.to_string(),
            None => format!(
                "http://{}:{}",
                non_empty(&config.bind_address).unwrap_or(DEFAULT_BIND_ADDRESS),
                http_port
            ),
        };
        Self {
            http_port,
            admin_user: non_empty(&config.admin_user)
                .unwrap_or(DEFAULT_ADMIN_USER)
                .to_string(),
            log_level: non_empty(&config.log_level)
                .unwrap_or(DEFAULT_LOG_LEVEL)
                .to_string(),
            anonymous_enabled: config.enable_anonymous.unwrap_or(false),
            embedding_allowed: config.allow_embedding.unwrap_or(false),
            external_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Proxy,
    Direct,
}

/// One provisioned data source.  Field order here is the field order in the provisioning
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub access: AccessMode,
    pub url: String,
    pub is_default: bool,
    pub editable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A parsed dashboard document occupying a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub title: String,
    pub document: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub server: ServerSettings,
    pub data_sources: Vec<DataSource>,
    /// Every slot ordinal is present; `None` is a tombstone.
    pub dashboard_slots: BTreeMap<u8, Option<Dashboard>>,
    /// Problems with individual inputs that were skipped.
    pub diagnostics: Vec<String>,
}

impl DesiredState {
    pub fn occupied_slots(&self) -> impl Iterator<Item = (u8, &Dashboard)> {
        self.dashboard_slots
            .iter()
            .filter_map(|(slot, dashboard)| dashboard.as_ref().map(|d| (*slot, d)))
    }
}

/// Build the desired state from the inputs available right now.
pub fn build(
    config: &LocalConfig,
    announcements: &[SourceAnnouncement],
    dashboard_inputs: &BTreeMap<u8, String>,
) -> DesiredState {
    let mut diagnostics = Vec::new();
    let server = ServerSettings::from_config(config);
    let data_sources = build_data_sources(announcements, &mut diagnostics);

    let mut dashboard_slots = BTreeMap::new();
    for slot in 0..constants::DASHBOARD_SLOTS {
        let dashboard = dashboard_inputs
            .get(&slot)
            .and_then(|raw| parse_dashboard(slot, raw, &mut diagnostics));
        dashboard_slots.insert(slot, dashboard);
    }

    for diagnostic in &diagnostics {
        warn!("{}", diagnostic);
    }

    DesiredState {
        server,
        data_sources,
        dashboard_slots,
        diagnostics,
    }
}

/// Maps announcements 1:1 to data sources in arrival order.  Each one asks to be the default;
/// only the last one gets it.
fn build_data_sources(
    announcements: &[SourceAnnouncement],
    diagnostics: &mut Vec<String>,
) -> Vec<DataSource> {
    let mut data_sources: Vec<DataSource> = Vec::with_capacity(announcements.len());
    for (index, announcement) in announcements.iter().enumerate() {
        let url = match non_empty(&announcement.url) {
            Some(url) => url.to_string(),
            None => {
                diagnostics.push(format!(
                    "Data-source announcement {} has no URL, skipping it",
                    index
                ));
                continue;
            }
        };
        data_sources.push(DataSource {
            name: non_empty(&announcement.name)
                .unwrap_or(DEFAULT_SOURCE_NAME)
                .to_string(),
            source_type: non_empty(&announcement.source_type)
                .unwrap_or(DEFAULT_SOURCE_TYPE)
                .to_string(),
            access: AccessMode::Proxy,
            url,
            is_default: true,
            editable: true,
            uid: non_empty(&announcement.uid).map(str::to_string),
        });
    }

    // Last default wins.
    if let Some(last) = data_sources.iter().rposition(|ds| ds.is_default) {
        for (index, data_source) in data_sources.iter_mut().enumerate() {
            data_source.is_default = index == last;
        }
    }
    debug!("Desired data sources: {}", data_sources.len());
    data_sources
}

fn parse_dashboard(slot: u8, raw: &str, diagnostics: &mut Vec<String>) -> Option<Dashboard> {
    if raw.trim().is_empty() {
        return None;
    }
    let document: serde_json::Value = match serde_json::from_str(raw) {
        Ok(document) => document,
        Err(e) => {
            diagnostics.push(format!("Dashboard slot {} is not valid JSON: {}", slot, e));
            return None;
        }
    };
    if !document.is_object() {
        diagnostics.push(format!("Dashboard slot {} is not a JSON object", slot));
        return None;
    }
    let title = document
        .get("title")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_DASHBOARD_TITLE)
        .to_string();
    Some(Dashboard { title, document })
}
