//! In-memory peer store for use in testing other modules.
//!
//! Besides storing values it records how many mutations were requested, and can be told to
//! behave like a store that's unreachable or one that silently drops writes, since callers have
//! to cope with both.

use std::collections::HashMap;

use super::{error, validate_key, PeerStore, Result};

#[derive(Debug, Default)]
pub struct MemoryPeerStore {
    data: HashMap<String, String>,
    writes: usize,
    unreachable: bool,
    drop_writes: bool,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// A store that already holds the given value under the given key.
    pub fn with_value<S1, S2>(key: S1, value: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let mut store = Self::new();
        store.data.insert(key.into(), value.into());
        store
    }

    /// Number of times `set` has been called, successful or not.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Every subsequent call fails as though the store couldn't be reached.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// Subsequent writes report success but aren't stored.
    pub fn set_drop_writes(&mut self, drop_writes: bool) {
        self.drop_writes = drop_writes;
    }
}

impl PeerStore for MemoryPeerStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        if self.unreachable {
            return error::UnreachableSnafu.fail();
        }
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.writes += 1;
        if self.unreachable {
            return error::UnreachableSnafu.fail();
        }
        if !self.drop_writes {
            self.data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}
