use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tend::config::TendConfig;
use tend::logging::LogFormat;

mod cmd;

#[derive(Parser)]
#[command(name = "tend")]
#[command(
    version,
    about = "Draft, review and supervise therapeutic exercises with a human in the loop"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format ("pretty" or "json"). Overrides tend.toml setting.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a request to the end without pausing and print the final exercise
    Run {
        /// What the exercise should address
        intent: String,
    },
    /// Start a thread and run it until it needs a human decision
    Start { intent: String },
    /// Apply a human decision to a paused thread and continue
    Resume {
        thread_id: String,
        #[command(subcommand)]
        decision: ResumeCommands,
    },
    /// Show a thread's current state
    Show {
        thread_id: String,
        /// Print the raw checkpoint as JSON
        #[arg(long)]
        json: bool,
    },
    /// List threads, most recently updated first
    Threads,
    /// List completed and in-flight sessions from the history log
    History,
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Permissive CORS and bind on all interfaces
        #[arg(long)]
        dev: bool,
    },
    /// Serve the exercise tool over MCP on stdin/stdout
    Mcp,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ResumeCommands {
    /// Accept the draft
    Approve {
        /// JSON file with an edited draft to accept instead
        #[arg(long)]
        draft: Option<PathBuf>,
    },
    /// Send the draft back with feedback
    Revise {
        #[arg(long)]
        feedback: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check tend.toml for problems
    Validate,
    /// Write a default tend.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&project_dir, command.as_ref());
    }

    let config = TendConfig::new(project_dir)?;
    let _log_guard = tend::logging::init(&config.log_settings(cli.log_format, cli.verbose))?;

    match &cli.command {
        Commands::Run { intent } => cmd::cmd_run(&config, intent).await?,
        Commands::Start { intent } => cmd::cmd_start(&config, intent).await?,
        Commands::Resume {
            thread_id,
            decision,
        } => cmd::cmd_resume(&config, thread_id, decision).await?,
        Commands::Show { thread_id, json } => cmd::cmd_show(&config, thread_id, *json).await?,
        Commands::Threads => cmd::cmd_threads(&config).await?,
        Commands::History => cmd::cmd_history(&config).await?,
        Commands::Serve { port, dev } => cmd::cmd_serve(&config, *port, *dev).await?,
        Commands::Mcp => cmd::cmd_mcp(&config).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
