/*!
Install-time work on the host: the service account, its directory tree, the release binaries and
the systemd unit.  None of it runs again unless `install` is reissued.
*/

use crate::command;
use crate::error::{self, Result};
use crate::paths::Paths;
use crate::supervisor;
use flate2::read::GzDecoder;
use log::{debug, info};
use nix::unistd::{chown, Gid, Group, Uid, User};
use reqwest::blocking::Client;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tar::Archive;
use tempfile::{NamedTempFile, TempDir};
use url::Url;
use walkdir::WalkDir;

/// Release archives are large; give the download a while.
const DOWNLOAD_TIMEOUT_SECONDS: u64 = 600;
const BINARY_MODE: u32 = 0o755;
const UNIT_MODE: u32 = 0o644;

/// What the controller needs done once, on `install`.
pub trait Installer {
    /// Whether the service binary is in place.
    fn is_installed(&self) -> bool;
    /// Creates the service account and directories.
    fn provision(&mut self) -> Result<()>;
    /// Downloads and unpacks the given release.
    fn acquire(&mut self, version: &str) -> Result<()>;
    /// Writes the service's systemd unit.
    fn install_unit(&mut self) -> Result<()>;
}

/// Does the install work on this host.
#[derive(Debug, Clone)]
pub struct HostInstaller {
    paths: Paths,
    release_url: String,
    arch: String,
    /// User and group that own the service's files.  None leaves ownership alone, which lets
    /// everything but account creation run unprivileged.
    owner: Option<(String, String)>,
    command_timeout: Duration,
}

impl HostInstaller {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            release_url: constants::GRAFANA_RELEASE_URL.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            owner: Some((
                constants::GRAFANA_USER.to_string(),
                constants::GRAFANA_GROUP.to_string(),
            )),
            command_timeout: command::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_release_url<S: Into<String>>(mut self, release_url: S) -> Self {
        self.release_url = release_url.into();
        self
    }

    pub fn with_arch<S: Into<String>>(mut self, arch: S) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_owner(mut self, owner: Option<(String, String)>) -> Self {
        self.owner = owner;
        self
    }

    /// URL of the release archive for this host's architecture.
    pub fn release_archive_url(&self, version: &str) -> Result<Url> {
        let arch = release_arch(&self.arch)?;
        let url = format!(
            "{}/grafana-{}.linux-{}.tar.gz",
            self.release_url.trim_end_matches('/'),
            version,
            arch
        );
        Url::from_str(&url).context(error::UrlParseSnafu { url })
    }

    fn ensure_group(&self, group: &str) -> Result<()> {
        let existing = Group::from_name(group).context(error::LookupAccountSnafu {
            kind: "group",
            name: group,
        })?;
        if existing.is_none() {
            info!("Creating group {}", group);
            command::run_checked(
                constants::GROUPADD_BIN,
                &["--system", group],
                self.command_timeout,
            )?;
        }
        Ok(())
    }

    fn ensure_user(&self, user: &str, group: &str) -> Result<()> {
        let existing = User::from_name(user).context(error::LookupAccountSnafu {
            kind: "user",
            name: user,
        })?;
        if existing.is_none() {
            info!("Creating user {}", user);
            command::run_checked(
                constants::USERADD_BIN,
                &[
                    "--system",
                    "--gid",
                    group,
                    "--no-create-home",
                    "--shell",
                    "/bin/false",
                    user,
                ],
                self.command_timeout,
            )?;
        }
        Ok(())
    }

    /// Numeric owner of the service's files, if we manage ownership.
    fn owner_ids(&self) -> Result<Option<(Uid, Gid)>> {
        let (user, group) = match &self.owner {
            Some(owner) => owner,
            None => return Ok(None),
        };
        let uid = User::from_name(user)
            .context(error::LookupAccountSnafu {
                kind: "user",
                name: user,
            })?
            .context(error::MissingAccountSnafu {
                kind: "user",
                name: user,
            })?
            .uid;
        let gid = Group::from_name(group)
            .context(error::LookupAccountSnafu {
                kind: "group",
                name: group,
            })?
            .context(error::MissingAccountSnafu {
                kind: "group",
                name: group,
            })?
            .gid;
        Ok(Some((uid, gid)))
    }

    fn download(&self, url: &Url, dir: &Path) -> Result<NamedTempFile> {
        info!("Downloading {}", url);
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECONDS))
            .build()
            .context(error::HttpClientSnafu { url: url.clone() })?;
        let mut response = client
            .get(url.clone())
            .send()
            .context(error::HttpSendSnafu { url: url.clone() })?
            .error_for_status()
            .context(error::HttpResponseSnafu { url: url.clone() })?;

        let mut archive =
            NamedTempFile::new_in(dir).context(error::CreateTempfileSnafu { path: dir })?;
        response
            .copy_to(&mut archive)
            .context(error::HttpBodySnafu { url: url.clone() })?;
        archive.flush().context(error::FileWriteSnafu {
            path: archive.path(),
        })?;
        Ok(archive)
    }
}

impl Installer for HostInstaller {
    fn is_installed(&self) -> bool {
        self.paths.grafana_server_bin().is_file()
    }

    fn provision(&mut self) -> Result<()> {
        if let Some((user, group)) = &self.owner {
            self.ensure_group(group)?;
            self.ensure_user(user, group)?;
        }
        let owner = self.owner_ids()?;
        for dir in self.paths.service_directories() {
            fs::create_dir_all(&dir).context(error::MkdirSnafu { path: &dir })?;
            if let Some((uid, gid)) = owner {
                chown(&dir, Some(uid), Some(gid)).context(error::ChownSnafu { path: &dir })?;
            }
            debug!("Provisioned directory {}", dir.display());
        }
        Ok(())
    }

    fn acquire(&mut self, version: &str) -> Result<()> {
        let url = self.release_archive_url(version)?;
        let install_dir = &self.paths.install_dir;
        // Stage next to the install directory so the final move is a rename.
        let staging_parent = install_dir.parent().unwrap_or_else(|| Path::new("/"));
        fs::create_dir_all(staging_parent).context(error::MkdirSnafu {
            path: staging_parent,
        })?;

        let archive = self.download(&url, staging_parent)?;
        let staging = TempDir::new_in(staging_parent).context(error::CreateTempfileSnafu {
            path: staging_parent,
        })?;
        let file = fs::File::open(archive.path()).context(error::FileReadSnafu {
            path: archive.path(),
        })?;
        Archive::new(GzDecoder::new(file))
            .unpack(staging.path())
            .context(error::UnpackSnafu { url: url.as_str() })?;

        let extracted = staging.path().join(format!("grafana-v{}", version));
        ensure!(
            extracted.is_dir(),
            error::ExtractedMissingSnafu {
                url: url.as_str(),
                path: &extracted,
            }
        );

        if install_dir.exists() {
            debug!("Removing previous installation at {}", install_dir.display());
            fs::remove_dir_all(install_dir).context(error::FileDeleteSnafu { path: install_dir })?;
        }
        fs::rename(&extracted, install_dir).context(error::RenameSnafu {
            from: &extracted,
            to: install_dir,
        })?;

        for bin in [self.paths.grafana_server_bin(), self.paths.grafana_cli_bin()] {
            if bin.exists() {
                fs::set_permissions(&bin, Permissions::from_mode(BINARY_MODE))
                    .context(error::PermissionsSnafu { path: &bin })?;
            }
        }

        if let Some((uid, gid)) = self.owner_ids()? {
            for entry in WalkDir::new(install_dir) {
                let entry = entry.context(error::WalkSnafu { path: install_dir })?;
                chown(entry.path(), Some(uid), Some(gid))
                    .context(error::ChownSnafu { path: entry.path() })?;
            }
        }

        info!("Installed Grafana {} to {}", version, install_dir.display());
        Ok(())
    }

    fn install_unit(&mut self) -> Result<()> {
        let unit = render_unit(&self.paths, self.owner.as_ref());
        let path = &self.paths.unit_file;
        let dir = path.parent().unwrap_or_else(|| Path::new("/"));
        fs::create_dir_all(dir).context(error::MkdirSnafu { path: dir })?;
        fs::write(path, unit).context(error::FileWriteSnafu { path })?;
        fs::set_permissions(path, Permissions::from_mode(UNIT_MODE))
            .context(error::PermissionsSnafu { path })?;
        info!("Wrote systemd unit {}", path.display());

        supervisor::daemon_reload(self.command_timeout)
    }
}

/// Maps a Rust target architecture to the name used in release archives.
pub fn release_arch(arch: &str) -> Result<&'static str> {
    match arch {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        _ => error::UnsupportedArchSnafu { arch }.fail(),
    }
}

fn render_unit(paths: &Paths, owner: Option<&(String, String)>) -> String {
    let (user, group) = owner
        .map(|(u, g)| (u.as_str(), g.as_str()))
        .unwrap_or((constants::GRAFANA_USER, constants::GRAFANA_GROUP));
    format!(
        r#"[Unit]
Description=Grafana
Documentation=https://grafana.com/docs/
Wants=network-online.target
After=network-online.target

[Service]
Type=simple
User={user}
Group={group}
WorkingDirectory={home}
ExecStart={server} \
    --config={config} \
    --homepath={home}

Restart=on-failure
RestartSec=5s

[Install]
WantedBy=multi-user.target
"#,
        user = user,
        group = group,
        home = paths.install_dir.display(),
        server = paths.grafana_server_bin().display(),
        config = paths.config_file.display(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    fn release_archive(version: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for name in ["grafana-server", "grafana-cli"] {
            let content = b"#!/bin/sh\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o600);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("grafana-v{}/bin/{}", version, name),
                    &content[..],
                )
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn arch_mapping() {
        assert_eq!(release_arch("x86_64").unwrap(), "amd64");
        assert_eq!(release_arch("aarch64").unwrap(), "arm64");
        assert!(matches!(
            release_arch("riscv64"),
            Err(crate::error::Error::UnsupportedArch { .. })
        ));
    }

    #[test]
    fn archive_url() {
        let installer = HostInstaller::new(Paths::default()).with_arch("aarch64");
        assert_eq!(
            installer.release_archive_url("11.4.0").unwrap().as_str(),
            "https://dl.grafana.com/oss/release/grafana-11.4.0.linux-arm64.tar.gz"
        );
    }

    #[test]
    fn unit_file() {
        let unit = render_unit(&Paths::default(), None);
        assert!(unit.contains("User=grafana\nGroup=grafana\n"));
        assert!(unit.contains(
            "ExecStart=/usr/local/grafana/bin/grafana-server \\\n    --config=/etc/grafana/grafana.ini \\\n    --homepath=/usr/local/grafana\n"
        ));
        assert!(unit.ends_with("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn provision_without_owner() {
        let root = TempDir::new().unwrap();
        let paths = Paths::under(root.path());
        let mut installer = HostInstaller::new(paths.clone()).with_owner(None);
        installer.provision().unwrap();
        for dir in paths.service_directories() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
    }

    #[test]
    fn acquire_release() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/grafana-1.2.3.linux-amd64.tar.gz",
            ))
            .times(1)
            .respond_with(status_code(200).body(release_archive("1.2.3"))),
        );

        let root = TempDir::new().unwrap();
        let paths = Paths::under(root.path());
        let mut installer = HostInstaller::new(paths.clone())
            .with_release_url(server.url_str("/"))
            .with_arch("x86_64")
            .with_owner(None);
        assert!(!installer.is_installed());
        installer.acquire("1.2.3").unwrap();
        assert!(installer.is_installed());

        let mode = fs::metadata(paths.grafana_server_bin())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, BINARY_MODE);
    }

    #[test]
    fn acquire_wrong_archive() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/grafana-1.2.3.linux-amd64.tar.gz",
            ))
            .respond_with(status_code(200).body(release_archive("9.9.9"))),
        );

        let root = TempDir::new().unwrap();
        let mut installer = HostInstaller::new(Paths::under(root.path()))
            .with_release_url(server.url_str("/"))
            .with_arch("x86_64")
            .with_owner(None);
        let err = installer.acquire("1.2.3").unwrap_err();
        assert!(matches!(err, crate::error::Error::ExtractedMissing { .. }));
        assert!(!installer.is_installed());
    }

    #[test]
    fn acquire_missing_release() {
        let server = Server::run();
        server.expect(
            Expectation::matching(any()).respond_with(status_code(404)),
        );

        let root = TempDir::new().unwrap();
        let mut installer = HostInstaller::new(Paths::under(root.path()))
            .with_release_url(server.url_str("/"))
            .with_arch("x86_64")
            .with_owner(None);
        let err = installer.acquire("1.2.3").unwrap_err();
        assert!(matches!(err, crate::error::Error::HttpResponse { .. }));
    }
}
