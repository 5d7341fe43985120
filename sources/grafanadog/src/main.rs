/*!
Command-line entry point for grafanadog.  Each invocation handles exactly one event and prints the
resulting status line.
*/

mod args;

use crate::args::Args;
use grafanadog::config::{self, LocalConfig};
use grafanadog::installer::HostInstaller;
use grafanadog::paths::Paths;
use grafanadog::status::{GrafanaApi, StatusReport};
use grafanadog::supervisor::Systemd;
use grafanadog::{Controller, Event, Inputs, Outcome, Result};
use log::{info, warn};
use peerstore::FilesystemPeerStore;
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::OpenOptions;
use std::process;

/// Logs to the terminal, and to the agent's log file if it can be opened.
fn init_logger(level: LevelFilter) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(constants::AGENT_LOG_FILE);
    let file_error = match log_file {
        Ok(file) => {
            loggers.push(WriteLogger::new(level, LogConfig::default(), file));
            None
        }
        Err(e) => Some(e),
    };

    // If logger initialization fails there's nowhere to report it; carry on without logs.
    let _ = CombinedLogger::init(loggers);
    if let Some(e) = file_error {
        warn!(
            "Not logging to {}: {}",
            constants::AGENT_LOG_FILE,
            e
        );
    }
}

fn run(args: Args) -> Result<()> {
    let event = args.subcommand.event();

    let mut local_config = LocalConfig::from_file(&args.config)?;
    local_config.bind_address = args.bind_address.clone();
    let announcements = match &args.sources {
        Some(path) => config::load_announcements(path)?,
        None => Vec::new(),
    };

    let paths = Paths {
        state_dir: args.state_dir.clone(),
        ..Paths::default()
    };
    let inputs = Inputs {
        config: local_config,
        announcements,
        is_leader: args.leader,
    };

    let mut controller = Controller::new(
        paths.clone(),
        inputs,
        Box::new(Systemd::default()),
        Box::new(HostInstaller::new(paths)),
        Box::new(GrafanaApi::default()),
    );
    if let Some(peer_store) = &args.peer_store {
        controller = controller.with_peer_store(Box::new(FilesystemPeerStore::new(peer_store)));
    }

    let result = controller.handle(event);
    if let Some(line) = status_line(event, &result) {
        println!("{}", line);
    }
    let outcome = result?;
    if outcome.transient {
        info!("Admin secret not yet confirmed, it will be retried on the next event");
    }
    Ok(())
}

/// The `<level>: <message>` line for an event.  A failed installation leaves the agent blocked,
/// so that's reported straight away; other errors only go to stderr.
fn status_line(event: Event, result: &Result<Outcome>) -> Option<String> {
    let status = match result {
        Ok(outcome) => outcome.status.clone(),
        Err(e) if event == Event::Install => StatusReport::ConfigurationFailed(e.to_string()),
        Err(_) => return None,
    };
    Some(format!("{}: {}", status.level(), status))
}

fn main() -> ! {
    let args: Args = argh::from_env();
    init_logger(args.log_level);
    process::exit(match run(args) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    })
}
