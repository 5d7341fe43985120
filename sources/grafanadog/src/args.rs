use argh::FromArgs;
use grafanadog::Event;
use log::LevelFilter;
use std::path::PathBuf;

/// Converges a Grafana server with its configuration and peers, one event at a time.
#[derive(FromArgs, Debug)]
pub(crate) struct Args {
    /// path to the service's TOML configuration
    #[argh(
        option,
        default = "PathBuf::from(constants::AGENT_CONFIG_FILE)",
        short = 'c'
    )]
    pub(crate) config: PathBuf,

    /// path to a JSON array of data-source announcements
    #[argh(option)]
    pub(crate) sources: Option<PathBuf>,

    /// directory of the peer store shared with other instances
    #[argh(option)]
    pub(crate) peer_store: Option<PathBuf>,

    /// directory for the agent's own state
    #[argh(option, default = "PathBuf::from(constants::AGENT_STATE_DIR)")]
    pub(crate) state_dir: PathBuf,

    /// whether this instance is the elected leader
    #[argh(switch)]
    pub(crate) leader: bool,

    /// address this instance is reachable on
    #[argh(option)]
    pub(crate) bind_address: Option<String>,

    /// log-level trace|debug|info|warn|error
    #[argh(option, default = "LevelFilter::Info")]
    pub(crate) log_level: LevelFilter,

    #[argh(subcommand)]
    pub(crate) subcommand: Subcommand,
}

/// The event to handle
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand)]
pub(crate) enum Subcommand {
    Install(InstallArgs),
    ConfigChanged(ConfigChangedArgs),
    Start(StartArgs),
    RelationChanged(RelationChangedArgs),
    Stop(StopArgs),
    PeriodicCheck(PeriodicCheckArgs),
}

impl Subcommand {
    pub(crate) fn event(&self) -> Event {
        match self {
            Subcommand::Install(_) => Event::Install,
            Subcommand::ConfigChanged(_) => Event::ConfigChanged,
            Subcommand::Start(_) => Event::Start,
            Subcommand::RelationChanged(_) => Event::RelationChanged,
            Subcommand::Stop(_) => Event::Stop,
            Subcommand::PeriodicCheck(_) => Event::PeriodicCheck,
        }
    }
}

/// Installs the service, then configures it
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "install")]
pub(crate) struct InstallArgs {}

/// Applies changed local configuration
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "config-changed")]
pub(crate) struct ConfigChangedArgs {}

/// Makes sure the service is running
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "start")]
pub(crate) struct StartArgs {}

/// Applies changed data sources or peer state
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "relation-changed")]
pub(crate) struct RelationChangedArgs {}

/// Stops the service until the next start
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "stop")]
pub(crate) struct StopArgs {}

/// Re-checks configuration and health
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "periodic-check")]
pub(crate) struct PeriodicCheckArgs {}
