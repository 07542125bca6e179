use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shipwright::config::Config;
use shipwright::errors::exit_codes;
use shipwright::telemetry;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(version, about = "Deployment orchestrator - run idempotent pipelines against remote hosts")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the deployment pipeline against a target
    Deploy {
        /// Target name from targets.toml, or an ad-hoc user@host[:port] spec
        target: String,

        /// Resume from the last persisted record, skipping completed steps
        #[arg(long)]
        resume: bool,

        /// Log intended commands without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Run only the named step
        #[arg(long)]
        step: Option<String>,
    },
    /// Show the persisted deployment record for a target
    Status { target: String },
    /// Run health checks against a target without deploying
    Diagnose { target: String },
    /// List the pipeline steps in execution order
    List,
    /// Delete the persisted deployment record for a target
    Reset {
        target: String,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    telemetry::init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), err);
            exit_codes::CONFIG
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose)?;

    match &cli.command {
        Commands::Deploy {
            target,
            resume,
            dry_run,
            step,
        } => cmd::cmd_deploy(&config, target, *resume, *dry_run, step.as_deref()).await,
        Commands::Status { target } => cmd::cmd_status(&config, target),
        Commands::Diagnose { target } => cmd::cmd_diagnose(&config, target).await,
        Commands::List => cmd::cmd_list(&config),
        Commands::Reset { target, force } => cmd::cmd_reset(&config, target, *force),
    }
}
