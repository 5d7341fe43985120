use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Possible errors from peer store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Key name '{}' has invalid format: {}", name, msg))]
    InvalidKey { name: String, msg: String },

    #[snafu(display("Key name beyond maximum length {}: {}", max, name))]
    KeyTooLong { name: String, max: usize },

    #[snafu(display("Reading key '{}' failed: {}", key, source))]
    KeyRead { key: String, source: io::Error },

    #[snafu(display("Peer store at '{}' is unavailable: {}", path.display(), source))]
    Unavailable { path: PathBuf, source: io::Error },

    #[snafu(display("Peer store path '{}' is not a directory", path.display()))]
    NotADirectory { path: PathBuf },

    #[snafu(display("Failed to create temporary file in '{}': {}", path.display(), source))]
    TempFile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to write key '{}': {}", key, source))]
    KeyWrite { key: String, source: io::Error },

    #[snafu(display("Failed to persist key '{}' to '{}': {}", key, path.display(), source))]
    KeyPersist {
        key: String,
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("Peer store is unreachable"))]
    Unreachable,
}

pub type Result<T> = std::result::Result<T, Error>;
