//! # courier
//!
//! Command-line access to the subagent run registry.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_runtime::SubagentRegistry;
use courier_settings::CourierSettings;

/// Inspect and maintain delegated subagent runs.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Courier subagent run tools")]
struct Cli {
    /// Subagents directory (overrides settings).
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Settings file to load instead of `~/.courier/settings.json`.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subagent run records.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    /// List runs, optionally only those of one requester session.
    List {
        /// Requester session key.
        #[arg(long)]
        requester: Option<String>,
    },
    /// Print one run as JSON.
    Show {
        /// Run ID.
        run_id: String,
    },
    /// Delete one run.
    Delete {
        /// Run ID.
        run_id: String,
    },
    /// Evict every run past its archive deadline.
    Sweep,
}

fn load_settings(path: Option<&PathBuf>) -> Result<CourierSettings> {
    match path {
        Some(path) => courier_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(courier_settings::get_settings().clone()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_settings(args.settings.as_ref())?;

    if args.log_json {
        courier_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        courier_core::logging::init_subscriber(&settings.logging.level);
    }

    let dir = args.dir.unwrap_or_else(|| settings.subagents.resolved_dir());
    tracing::debug!(dir = %dir.display(), "using subagents directory");
    let registry = SubagentRegistry::new(dir);

    let Command::Runs { command } = args.command;
    let output = match command {
        RunsCommand::List { requester } => commands::list(&registry, requester.as_deref()),
        RunsCommand::Show { run_id } => commands::show(&registry, &run_id)?,
        RunsCommand::Delete { run_id } => commands::delete(&registry, &run_id)?,
        RunsCommand::Sweep => commands::sweep(&registry).await,
    };
    println!("{output}");
    Ok(())
}
