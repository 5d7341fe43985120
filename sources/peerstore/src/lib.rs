/*!
# Background

A 'peer store' is the key/value data shared by every instance in a grafanadog peer group.
It's replicated by something outside of grafanadog; this crate only reads and writes the local
view of it.

Only the elected leader is allowed to write, and writes are at-least-once: a caller must read a
value back before trusting that a write landed.

# Library

This library provides a trait defining the exact requirements, along with basic implementations
for filesystem and memory peer stores.
*/

pub mod error;
pub mod filesystem;
pub mod memory;

pub use error::{Error, Result};
pub use filesystem::FilesystemPeerStore;
pub use memory::MemoryPeerStore;

use snafu::ensure;

/// Maximum length of a peer store key.
pub const MAX_KEY_LEN: usize = 255;

/// Keys are used directly as file names by FilesystemPeerStore, so they're limited to characters
/// that are safe there.
pub fn validate_key<S: AsRef<str>>(name: S) -> Result<()> {
    let name = name.as_ref();
    ensure!(
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        error::InvalidKeySnafu {
            name,
            msg: "must be non-empty and only contain ASCII alphanumerics, '_' or '-'",
        }
    );
    ensure!(
        name.len() <= MAX_KEY_LEN,
        error::KeyTooLongSnafu {
            name,
            max: MAX_KEY_LEN,
        }
    );
    Ok(())
}

pub trait PeerStore {
    /// Retrieve the value for a single key.  Returns Ok(None) if nobody has set it yet.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Set the value of a single key.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}
