use std::io::{self, Write};

use anyhow::Result;
use tracing::error;

use crate::backend::RunOptions;
use crate::cli::{Command, Invocation};
use crate::cluster::BackendKind;
use crate::config::ProvisionConfig;
use crate::error::Error;
use crate::orchestrator::Orchestrator;
use crate::version;

pub fn run(invocation: Invocation) -> Result<i32> {
    if invocation.command == Command::ShowVersion {
        println!("{}", version::describe());
        return Ok(0);
    }

    let orchestrator = match load_config(&invocation).and_then(Orchestrator::from_config) {
        Ok(orchestrator) => orchestrator,
        Err(err) => return Ok(report_error(&err, invocation.json_errors)),
    };

    let outcome = match invocation.command {
        Command::Provision {
            cluster_id,
            action,
            timeout,
            dry_run,
        } => {
            let options = RunOptions {
                timeout,
                dry_run,
                ..Default::default()
            };
            orchestrator
                .provision(&cluster_id, action, &options)
                .map(|report| {
                    for warning in &report.warnings {
                        eprintln!("warning: {warning}");
                    }
                    let verb = if dry_run { "rendered" } else { "provisioned" };
                    println!(
                        "{verb} {} ({action}, {}) in {}ms",
                        report.cluster_id,
                        report.backend,
                        report.duration.as_millis()
                    );
                    println!("workspace: {}", report.workspace.display());
                })
        }
        Command::Teardown { cluster_id } => orchestrator.teardown(&cluster_id).map(|()| {
            println!("removed workspace for {cluster_id}");
        }),
        Command::Show { cluster_id } => show_cluster(&orchestrator, &cluster_id),
        Command::CheckBackends => return check_backends(&orchestrator, invocation.json_errors),
        Command::ShowVersion => Ok(()),
    };

    match outcome {
        Ok(()) => Ok(0),
        Err(err) => Ok(report_error(&err, invocation.json_errors)),
    }
}

/// Print `err` the way the user asked for and return its exit code.
fn report_error(err: &Error, json: bool) -> i32 {
    error!(kind = err.kind(), "{err}");
    if json {
        eprintln!("{}", err.to_json());
    } else {
        for warning in err.warnings() {
            eprintln!("warning: {warning}");
        }
        eprintln!("\x1b[31mError:\x1b[0m {err}");
    }
    io::stderr().flush().ok();
    err.exit_code()
}

fn load_config(invocation: &Invocation) -> Result<ProvisionConfig, Error> {
    let mut config = match &invocation.config {
        Some(path) => ProvisionConfig::load(path)?,
        None => ProvisionConfig::discover()?,
    };
    config.apply_env()?;
    Ok(config)
}

fn show_cluster(orchestrator: &Orchestrator, cluster_id: &str) -> Result<(), Error> {
    let factory = orchestrator.factory();
    let cluster = factory.stores().clusters.get_cluster(cluster_id)?;
    let backend = cluster.backend(factory.config().default_backend)?;
    let workspaces = factory.workspaces();

    println!("cluster:  {} {}", cluster.uuid, cluster.name);
    println!("backend:  {backend}");
    println!("nodes:    {}", cluster.nodes.len());
    for entry in cluster.node_roles() {
        println!(
            "  {:<24} {:<16} {}",
            entry.role.kind, entry.node.name, entry.role.uuid
        );
    }
    println!("workspace: {}", workspaces.cluster_dir(cluster_id)?.display());
    Ok(())
}

fn check_backends(orchestrator: &Orchestrator, json_errors: bool) -> Result<i32> {
    println!("Checking provisioning backends...\n");

    let factory = orchestrator.factory();
    let mut missing = 0u32;
    for kind in BackendKind::ALL {
        let backend = match factory.backend(kind) {
            Ok(backend) => backend,
            Err(err) => return Ok(report_error(&err, json_errors)),
        };
        let (status, detail) = match backend.validate() {
            Ok(()) => ("\x1b[32m OK \x1b[0m", backend.version().unwrap_or_default()),
            Err(e) => {
                missing += 1;
                ("\x1b[31mMISS\x1b[0m", e.to_string())
            }
        };
        let default = if kind == factory.config().default_backend {
            " (default)"
        } else {
            ""
        };
        println!("  [{status}] {:<8}{default} {detail}", kind.id());
    }

    println!();
    if missing > 0 {
        println!("  Tip: install the missing tools or point [ansible]/[helm] executable at them.");
        return Ok(1);
    }
    Ok(0)
}
