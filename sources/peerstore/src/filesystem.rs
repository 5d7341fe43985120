//! This implementation of the PeerStore trait keeps each key in its own file under a base
//! directory, e.g. `<base>/admin_password`.  The base directory is the local view of the
//! replicated peer data; it must exist for the store to be considered reachable.

use log::{debug, trace};
use snafu::{ensure, ResultExt};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{error, validate_key, PeerStore, Result};

#[derive(Debug)]
pub struct FilesystemPeerStore {
    base_path: PathBuf,
}

impl FilesystemPeerStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> FilesystemPeerStore {
        FilesystemPeerStore {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Returns the path on the filesystem for the given key, after checking that the key can't
    /// reach outside the base path.
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    /// A peer store whose directory has gone away is unreachable, not empty.
    fn ensure_reachable(&self) -> Result<()> {
        let metadata = fs::metadata(&self.base_path).context(error::UnavailableSnafu {
            path: &self.base_path,
        })?;
        ensure!(
            metadata.is_dir(),
            error::NotADirectorySnafu {
                path: &self.base_path
            }
        );
        Ok(())
    }
}

impl PeerStore for FilesystemPeerStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        self.ensure_reachable()?;
        trace!("Reading peer key '{}' from '{}'", key, path.display());
        match fs::read_to_string(&path) {
            // Values written by hand usually carry a trailing newline.
            Ok(s) => Ok(Some(s.trim_end_matches('\n').to_string())),
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    return Ok(None);
                }
                Err(e).context(error::KeyReadSnafu { key })
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        self.ensure_reachable()?;

        // Write next to the target and swap it in, so readers never see a partial value.
        let mut temp = NamedTempFile::new_in(&self.base_path).context(error::TempFileSnafu {
            path: &self.base_path,
        })?;
        temp.write_all(value.as_bytes())
            .context(error::KeyWriteSnafu { key })?;
        temp.persist(&path)
            .context(error::KeyPersistSnafu { key, path: &path })?;
        debug!("Stored peer key '{}'", key);
        Ok(())
    }
}
