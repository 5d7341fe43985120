/*!
# Introduction

grafanadog keeps one Grafana server converged with its configuration.

It's driven by events: `install`, `config-changed`, `start`, `relation-changed`, `stop` and
`periodic-check`.  For each one it works out what the service's configuration should be from
the operator's local settings, the data sources announced by upstream relations, and the numbered
dashboard slots; compares that against the files on disk; writes only what changed; and restarts
the service only if something did.  It finishes by reporting a one-line status.

# Shared admin secret

Several instances of the service can share a peer store.  The admin password is resolved from, in
order: an explicit local setting, the value already in the peer store, or a value generated by the
elected leader and confirmed by reading it back.  Until one of those is available a provisional
placeholder is used, and it never replaces a password already written to disk.

# Files

* `grafana.ini` in the service's config directory
* `provisioning/datasources/default.yaml`, only when there are data sources
* one `<title>-<slot>.json` per occupied dashboard slot, plus `provisioning/dashboards/default.yaml`
  while any slot is occupied

All of them are written atomically.  The agent's own phase is kept in `state.json` in its state
directory.
*/

pub mod applied;
mod command;
pub mod config;
pub mod desired;
pub mod error;
pub mod installer;
pub mod lifecycle;
pub mod paths;
pub mod render;
pub mod secret;
pub mod status;
pub mod supervisor;

pub use error::{Error, Result};
pub use lifecycle::{Action, Controller, Event, Inputs, Outcome, Phase};
