/*!
Resolves the admin credential shared by every instance of the service.

An explicit local override always wins.  Otherwise the peer store is authoritative once it holds a
value.  If it doesn't, the leader generates one, and only trusts it after reading it back.
Everybody else gets a provisional placeholder until the leader's value shows up.
*/

use crate::config::LocalConfig;
use crate::error::{self, Result};
use log::{debug, info, warn};
use peerstore::PeerStore;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use snafu::ResultExt;
use std::fmt;

/// Length of generated secrets.
pub const SECRET_LEN: usize = 24;

/// Credential used until the real one is confirmed.
pub const PLACEHOLDER_SECRET: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    /// Set explicitly in local configuration.
    Local,
    /// Read from the peer store.
    Peer,
    /// Generated by this instance as leader and confirmed in the peer store.
    Generated,
    /// Nothing authoritative available yet.
    Placeholder,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub value: String,
    pub source: SecretSource,
}

impl ResolvedSecret {
    pub fn placeholder() -> Self {
        Self {
            value: PLACEHOLDER_SECRET.to_string(),
            source: SecretSource::Placeholder,
        }
    }

    /// A provisional secret must not replace one that's already been committed.
    pub fn is_provisional(&self) -> bool {
        self.source == SecretSource::Placeholder
    }
}

// Keep the value out of logs.
impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Figure out which admin credential to use.  Returns a `SecretUnconfirmed` or `SecretReadBack`
/// error if the peer store can't be read, or if the leader's write can't be confirmed; callers
/// can check with `Error::is_secret_unconfirmed`.
pub fn resolve_secret<S>(
    config: &LocalConfig,
    peer_store: Option<&mut S>,
    is_leader: bool,
) -> Result<ResolvedSecret>
where
    S: PeerStore + ?Sized,
{
    if let Some(value) = config.admin_password_override() {
        debug!("Using admin password from local configuration");
        return Ok(ResolvedSecret {
            value: value.to_string(),
            source: SecretSource::Local,
        });
    }

    let peer_store = match peer_store {
        Some(peer_store) => peer_store,
        None => {
            info!("No peer store available, admin password is provisional");
            return Ok(ResolvedSecret::placeholder());
        }
    };

    let key = constants::PEER_ADMIN_PASSWORD_KEY;
    let existing = peer_store
        .get(key)
        .context(error::SecretUnconfirmedSnafu { action: "read" })?;
    if let Some(value) = existing.filter(|v| !v.is_empty()) {
        debug!("Using admin password from peer store");
        return Ok(ResolvedSecret {
            value,
            source: SecretSource::Peer,
        });
    }

    if !is_leader {
        info!("Waiting for the leader to publish the admin password, using a provisional one");
        return Ok(ResolvedSecret::placeholder());
    }

    info!("Generating admin password as leader");
    let generated = generate_secret();
    peer_store
        .set(key, &generated)
        .context(error::SecretUnconfirmedSnafu { action: "write" })?;
    let read_back = peer_store
        .get(key)
        .context(error::SecretUnconfirmedSnafu { action: "read-back" })?;
    if read_back.as_deref() != Some(generated.as_str()) {
        warn!("Peer store did not return the admin password just written");
        return error::SecretReadBackSnafu.fail();
    }

    Ok(ResolvedSecret {
        value: generated,
        source: SecretSource::Generated,
    })
}

/// Random alphanumeric string of `SECRET_LEN` characters.
pub fn generate_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}
