/*!
What's currently on disk, reduced to content digests.

Each event runs in a fresh process, so nothing about previous writes is remembered in memory.
Instead the applied set is re-derived from the files themselves at the start of every event.  A
crash between writing a file and recording it can't leave the two out of sync.
*/

use crate::error::{self, Result};
use crate::paths::Paths;
use log::trace;
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Default, Clone, PartialEq, Eq)]
pub struct AppliedArtifactSet {
    pub settings_digest: Option<String>,
    pub data_sources_digest: Option<String>,
    pub dashboard_file_names: BTreeSet<String>,
    pub dashboards_digest: Option<String>,
    /// Admin credential found in the settings file on disk.
    pub committed_secret: Option<String>,
}

// The committed secret stays out of logs.
impl fmt::Debug for AppliedArtifactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppliedArtifactSet")
            .field("settings_digest", &self.settings_digest)
            .field("data_sources_digest", &self.data_sources_digest)
            .field("dashboard_file_names", &self.dashboard_file_names)
            .field("dashboards_digest", &self.dashboards_digest)
            .field(
                "committed_secret",
                &self.committed_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl AppliedArtifactSet {
    /// Reads back every artifact the renderer manages.  Missing files are simply absent.
    pub fn from_disk(paths: &Paths) -> Result<Self> {
        let settings = read_optional(&paths.config_file)?;
        let data_sources = read_optional(&paths.datasources_file())?;
        let index = read_optional(&paths.dashboards_index_file())?;
        let dashboard_files = read_dashboard_files(&paths.dashboards_dir)?;

        let applied = Self {
            settings_digest: settings.as_deref().map(digest),
            committed_secret: settings
                .as_deref()
                .and_then(|s| committed_secret(&String::from_utf8_lossy(s))),
            data_sources_digest: data_sources.as_deref().map(digest),
            dashboard_file_names: dashboard_files.keys().cloned().collect(),
            dashboards_digest: dashboards_digest(
                index.as_deref(),
                dashboard_files
                    .iter()
                    .map(|(name, content)| (name.as_str(), content.as_slice())),
            ),
        };
        trace!("Applied artifacts: {:?}", applied);
        Ok(applied)
    }
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn digest<B: AsRef<[u8]>>(bytes: B) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Combined digest of the dashboard index and every slot file, or None if there's nothing at all.
/// File names are part of the digest, so renaming a dashboard counts as a change.
pub fn dashboards_digest<'a, I>(index: Option<&[u8]>, files: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut files = files.into_iter().peekable();
    if index.is_none() && files.peek().is_none() {
        return None;
    }

    let mut hasher = Sha256::new();
    match index {
        Some(index) => {
            hasher.update(b"index\0");
            hasher.update(index);
        }
        None => hasher.update(b"no-index\0"),
    }
    for (name, content) in files {
        hasher.update(b"\0file\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(content);
    }
    Some(hex::encode(hasher.finalize()))
}

/// The slot a dashboard file belongs to, going by its `<title>-<slot>.json` name.
pub fn slot_of(file_name: &str) -> Option<u8> {
    let (_, slot) = file_name.strip_suffix(".json")?.rsplit_once('-')?;
    if slot.is_empty() || !slot.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    slot.parse::<u8>()
        .ok()
        .filter(|slot| *slot < constants::DASHBOARD_SLOTS)
}

/// Finds `admin_password` in the `[security]` section of a rendered settings file.
pub fn committed_secret(settings: &str) -> Option<String> {
    let mut in_security = false;
    for line in settings.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_security = line == "[security]";
            continue;
        }
        if !in_security {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "admin_password" {
                let value = value.trim();
                return (!value.is_empty()).then(|| value.to_string());
            }
        }
    }
    None
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(error::FileReadSnafu { path }),
    }
}

/// Slot files in the dashboards directory, by file name.  Other files are left alone.
pub(crate) fn read_dashboard_files(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e).context(error::ListDirectorySnafu { path: dir }),
    };
    for entry in entries {
        let entry = entry.context(error::ListDirectorySnafu { path: dir })?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if slot_of(&name).is_none() {
            continue;
        }
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let content = fs::read(&path).context(error::FileReadSnafu { path: &path })?;
        files.insert(name, content);
    }
    Ok(files)
}
