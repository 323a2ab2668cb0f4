use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint, builder::NonEmptyStringValueParser};

use crate::cluster::Action;

/// The top-level command requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Provision {
        cluster_id: String,
        action: Action,
        timeout: Option<Duration>,
        dry_run: bool,
    },
    Teardown {
        cluster_id: String,
    },
    Show {
        cluster_id: String,
    },
    CheckBackends,
    ShowVersion,
}

/// Command plus the global flags that shape how it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub json_errors: bool,
}

/// Parse CLI arguments into a high-level command.
pub fn parse() -> Result<Invocation> {
    Ok(Cli::parse().into_invocation())
}

pub fn parse_from<I, T>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Ok(Cli::try_parse_from(args)?.into_invocation())
}

#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Drive ansible or helm to bring a cluster into its declared state",
    disable_help_subcommand = true,
    disable_version_flag = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Print version information and exit.
    #[arg(short = 'V', long = "version", action = clap::ArgAction::SetTrue)]
    version: bool,

    /// Configuration file (defaults to provision.toml discovery).
    #[arg(long, global = true, value_name = "PATH", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Print failures as a JSON object on stderr.
    #[arg(long = "json-errors", global = true, action = clap::ArgAction::SetTrue)]
    json_errors: bool,

    #[command(subcommand)]
    command: Option<Sub>,
}

#[derive(Subcommand, Debug)]
enum Sub {
    /// Provision a cluster: install, update or uninstall.
    Run {
        #[arg(value_name = "CLUSTER", value_parser = NonEmptyStringValueParser::new())]
        cluster: String,

        #[arg(value_name = "ACTION", value_parser = parse_action)]
        action: Action,

        /// Backend timeout in seconds, overriding the configuration.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Render artifacts into the workspace without invoking the backend.
        #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Remove every workspace of a decommissioned cluster.
    Teardown {
        #[arg(value_name = "CLUSTER", value_parser = NonEmptyStringValueParser::new())]
        cluster: String,
    },
    /// Print the cluster snapshot as the orchestrator sees it.
    Show {
        #[arg(value_name = "CLUSTER", value_parser = NonEmptyStringValueParser::new())]
        cluster: String,
    },
    /// Check that the configured backend executables are usable.
    Check,
}

fn parse_action(raw: &str) -> std::result::Result<Action, String> {
    raw.parse()
}

impl Cli {
    fn into_invocation(self) -> Invocation {
        let command = match (self.version, self.command) {
            // Without -V clap already refused a missing subcommand.
            (true, _) | (false, None) => Command::ShowVersion,
            (false, Some(Sub::Run {
                cluster,
                action,
                timeout,
                dry_run,
            })) => Command::Provision {
                cluster_id: cluster,
                action,
                timeout: timeout.map(Duration::from_secs),
                dry_run,
            },
            (false, Some(Sub::Teardown { cluster })) => Command::Teardown { cluster_id: cluster },
            (false, Some(Sub::Show { cluster })) => Command::Show { cluster_id: cluster },
            (false, Some(Sub::Check)) => Command::CheckBackends,
        };
        Invocation {
            command,
            config: self.config,
            verbose: self.verbose,
            json_errors: self.json_errors,
        }
    }
}
