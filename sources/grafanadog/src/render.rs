//! Turns the desired state into the files the service reads, and writes whichever of them changed.

use crate::applied::{self, AppliedArtifactSet};
use crate::desired::{DataSource, DesiredState};
use crate::error::{self, Result};
use crate::paths::Paths;
use handlebars::Handlebars;
use log::{debug, info, trace};
use serde::Serialize;
use snafu::ResultExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SETTINGS_TEMPLATE_NAME: &str = "grafana.ini";
const SETTINGS_TEMPLATE: &str = r#"[paths]
data = {{paths.data}}
logs = {{paths.logs}}
plugins = {{paths.plugins}}
provisioning = {{paths.provisioning}}

[server]
http_port = {{server.http_port}}
root_url = {{server.external_url}}
enable_gzip = true

[security]
admin_user = {{server.admin_user}}
admin_password = {{admin_password}}
allow_embedding = {{server.embedding_allowed}}

[auth.anonymous]
enabled = {{server.anonymous_enabled}}
org_role = Viewer

[log]
mode = console file
level = {{server.log_level}}

[log.console]
level = {{server.log_level}}

[log.file]
level = {{server.log_level}}
log_rotate = true
max_lines = 1000000
max_size_shift = 28
daily_rotate = true
max_days = 7

[analytics]
reporting_enabled = false
check_for_updates = false

[snapshots]
external_enabled = false
"#;

/// Name of the dashboard provider in the provisioning index.
pub const DASHBOARD_PROVIDER_NAME: &str = "grafanadog";
const DASHBOARD_UPDATE_INTERVAL_SECONDS: u32 = 30;

/// Mode of every file we write; the service reads them as its own user.
const ARTIFACT_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactKind {
    Settings,
    DataSources,
    Dashboards,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Settings => write!(f, "settings"),
            ArtifactKind::DataSources => write!(f, "data-sources"),
            ArtifactKind::Dashboards => write!(f, "dashboards"),
        }
    }
}

pub type ChangedKinds = BTreeSet<ArtifactKind>;

/// Everything the renderer produces for one desired state.  Absent artifacts are ones whose files
/// should not exist.
#[derive(Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub settings: String,
    pub data_sources: Option<String>,
    /// Dashboard file name to file content.
    pub dashboard_files: BTreeMap<String, String>,
    pub dashboard_index: Option<String>,
}

// Settings hold the admin secret, so only show the shape.
impl fmt::Debug for ArtifactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSet")
            .field("settings", &"<redacted>")
            .field("data_sources", &self.data_sources.is_some())
            .field("dashboard_files", &self.dashboard_files.keys())
            .field("dashboard_index", &self.dashboard_index.is_some())
            .finish()
    }
}

impl ArtifactSet {
    fn settings_digest(&self) -> Option<String> {
        Some(applied::digest(&self.settings))
    }

    fn data_sources_digest(&self) -> Option<String> {
        self.data_sources.as_ref().map(applied::digest)
    }

    fn dashboards_digest(&self) -> Option<String> {
        applied::dashboards_digest(
            self.dashboard_index.as_deref().map(str::as_bytes),
            self.dashboard_files
                .iter()
                .map(|(name, content)| (name.as_str(), content.as_bytes())),
        )
    }
}

/// Files touched by `apply`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct SettingsContext<'a> {
    paths: PathsContext,
    server: &'a crate::desired::ServerSettings,
    admin_password: &'a str,
}

#[derive(Debug, Serialize)]
struct PathsContext {
    data: String,
    logs: String,
    plugins: String,
    provisioning: String,
}

#[derive(Debug, Serialize)]
struct DataSourcesDocument<'a> {
    #[serde(rename = "apiVersion")]
    api_version: u8,
    datasources: &'a [DataSource],
}

#[derive(Debug, Serialize)]
struct DashboardsDocument {
    #[serde(rename = "apiVersion")]
    api_version: u8,
    providers: Vec<DashboardProvider>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardProvider {
    name: &'static str,
    org_id: u32,
    folder: &'static str,
    #[serde(rename = "type")]
    provider_type: &'static str,
    disable_deletion: bool,
    update_interval_seconds: u32,
    allow_ui_updates: bool,
    options: DashboardProviderOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardProviderOptions {
    path: String,
    folders_from_files_structure: bool,
}

/// Render every artifact for the desired state.  The same inputs always give byte-identical
/// output.
pub fn render(desired: &DesiredState, secret: &str, paths: &Paths) -> Result<ArtifactSet> {
    let settings = render_settings(desired, secret, paths)?;

    let data_sources = if desired.data_sources.is_empty() {
        None
    } else {
        let document = DataSourcesDocument {
            api_version: 1,
            datasources: &desired.data_sources,
        };
        Some(serde_yaml::to_string(&document).context(error::SerializeYamlSnafu {
            what: "data sources",
        })?)
    };

    let mut dashboard_files = BTreeMap::new();
    for (slot, dashboard) in desired.occupied_slots() {
        let mut content = serde_json::to_string_pretty(&dashboard.document)
            .context(error::SerializeJsonSnafu { what: "dashboard" })?;
        content.push('\n');
        dashboard_files.insert(dashboard_file_name(&dashboard.title, slot), content);
    }

    let dashboard_index = if dashboard_files.is_empty() {
        None
    } else {
        let document = DashboardsDocument {
            api_version: 1,
            providers: vec![DashboardProvider {
                name: DASHBOARD_PROVIDER_NAME,
                org_id: 1,
                folder: "",
                provider_type: "file",
                disable_deletion: false,
                update_interval_seconds: DASHBOARD_UPDATE_INTERVAL_SECONDS,
                allow_ui_updates: false,
                options: DashboardProviderOptions {
                    path: paths.dashboards_dir.display().to_string(),
                    folders_from_files_structure: false,
                },
            }],
        };
        Some(serde_yaml::to_string(&document).context(error::SerializeYamlSnafu {
            what: "dashboard index",
        })?)
    };

    let artifacts = ArtifactSet {
        settings,
        data_sources,
        dashboard_files,
        dashboard_index,
    };
    trace!("Rendered artifacts: {:?}", artifacts);
    Ok(artifacts)
}

fn render_settings(desired: &DesiredState, secret: &str, paths: &Paths) -> Result<String> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string(SETTINGS_TEMPLATE_NAME, SETTINGS_TEMPLATE)
        .context(error::TemplateRegisterSnafu {
            template: SETTINGS_TEMPLATE_NAME,
        })?;

    let context = SettingsContext {
        paths: PathsContext {
            data: paths.data_dir.display().to_string(),
            logs: paths.logs_dir.display().to_string(),
            plugins: paths.plugins_dir.display().to_string(),
            provisioning: paths.provisioning_dir.display().to_string(),
        },
        server: &desired.server,
        admin_password: secret,
    };
    registry
        .render(SETTINGS_TEMPLATE_NAME, &context)
        .context(error::TemplateRenderSnafu {
            template: SETTINGS_TEMPLATE_NAME,
        })
}

/// Longest sanitized title kept in a dashboard file name, in bytes.
const MAX_TITLE_BYTES: usize = 200;

/// `<sanitized-title>-<slot>.json`, where the title is lowercased, whitespace and path
/// separators become dashes, and control characters are dropped.  Long titles are cut to
/// `MAX_TITLE_BYTES` so the name always fits in a single path component.
pub fn dashboard_file_name(title: &str, slot: u8) -> String {
    let mut sanitized = String::new();
    for c in title.to_lowercase().chars() {
        let c = if c.is_whitespace() || c == '/' || c == '\\' {
            '-'
        } else if c.is_control() {
            continue;
        } else {
            c
        };
        if sanitized.len() + c.len_utf8() > MAX_TITLE_BYTES {
            break;
        }
        sanitized.push(c);
    }
    format!("{}-{}.json", sanitized, slot)
}

/// Which kinds of artifact differ from what's on disk.  Appearing or disappearing counts.
pub fn diff(artifacts: &ArtifactSet, applied: &AppliedArtifactSet) -> ChangedKinds {
    let mut changed = ChangedKinds::new();
    if artifacts.settings_digest() != applied.settings_digest {
        changed.insert(ArtifactKind::Settings);
    }
    if artifacts.data_sources_digest() != applied.data_sources_digest {
        changed.insert(ArtifactKind::DataSources);
    }
    if artifacts.dashboards_digest() != applied.dashboards_digest {
        changed.insert(ArtifactKind::Dashboards);
    }
    debug!(
        "Changed artifacts: {:?}",
        changed.iter().map(|k| k.to_string()).collect::<Vec<_>>()
    );
    changed
}

/// Writes the artifacts of each changed kind, and updates `applied` for exactly the kinds it
/// wrote.  Kinds that didn't change aren't touched on disk.
pub fn apply(
    artifacts: &ArtifactSet,
    changed: &ChangedKinds,
    applied: &mut AppliedArtifactSet,
    paths: &Paths,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    if changed.contains(&ArtifactKind::Settings) {
        write_atomic(&paths.config_file, &artifacts.settings)?;
        report.written.push(paths.config_file.clone());
        applied.settings_digest = artifacts.settings_digest();
        applied.committed_secret = applied::committed_secret(&artifacts.settings);
    }

    if changed.contains(&ArtifactKind::DataSources) {
        let path = paths.datasources_file();
        match &artifacts.data_sources {
            Some(content) => {
                write_atomic(&path, content)?;
                report.written.push(path);
            }
            None => {
                if delete_if_exists(&path)? {
                    report.removed.push(path);
                }
            }
        }
        applied.data_sources_digest = artifacts.data_sources_digest();
    }

    if changed.contains(&ArtifactKind::Dashboards) {
        apply_dashboards(artifacts, paths, &mut report)?;
        applied.dashboard_file_names = artifacts.dashboard_files.keys().cloned().collect();
        applied.dashboards_digest = artifacts.dashboards_digest();
    }

    if !report.is_empty() {
        info!(
            "Wrote {} and removed {} files",
            report.written.len(),
            report.removed.len()
        );
    }
    Ok(report)
}

fn apply_dashboards(artifacts: &ArtifactSet, paths: &Paths, report: &mut ApplyReport) -> Result<()> {
    for (name, content) in &artifacts.dashboard_files {
        let path = paths.dashboards_dir.join(name);
        write_atomic(&path, content)?;
        report.written.push(path);
    }

    // Any slot file that isn't the one we want for its slot is stale, either because the slot is
    // now empty or because the dashboard's title changed.
    for name in applied::read_dashboard_files(&paths.dashboards_dir)?.keys() {
        if !artifacts.dashboard_files.contains_key(name) {
            let path = paths.dashboards_dir.join(name);
            debug!("Removing stale dashboard '{}'", path.display());
            if delete_if_exists(&path)? {
                report.removed.push(path);
            }
        }
    }

    let index_path = paths.dashboards_index_file();
    match &artifacts.dashboard_index {
        Some(index) => {
            write_atomic(&index_path, index)?;
            report.written.push(index_path);
        }
        None => {
            if delete_if_exists(&index_path)? {
                report.removed.push(index_path);
            }
        }
    }
    Ok(())
}

/// Write the file next to its destination and move it into place, so readers never see a
/// partial file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("/"));
    fs::create_dir_all(dir).context(error::MkdirSnafu { path: dir })?;

    let mut temp = NamedTempFile::new_in(dir).context(error::CreateTempfileSnafu { path: dir })?;
    temp.write_all(content.as_bytes())
        .context(error::FileWriteSnafu { path })?;
    fs::set_permissions(temp.path(), Permissions::from_mode(ARTIFACT_MODE))
        .context(error::PermissionsSnafu { path })?;

    debug!("Writing '{}'", path.display());
    temp.persist(path).context(error::FilePersistSnafu { path })?;
    Ok(())
}

/// Returns whether there was anything to delete.
fn delete_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed '{}'", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(error::FileDeleteSnafu { path }),
    }
}
