//! The deploy command: run the pipeline end to end against one target.

use anyhow::{bail, Result};
use console::style;
use shipwright::config::Config;
use shipwright::errors::{exit_codes, ConfigError};
use shipwright::executor::{CommandRunner, DryRunRunner, SshRunner};
use shipwright::pipeline::{
    load_pipeline, PipelineRunner, RecordStore, RunOptions, RunOutcome, StepGraph,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub async fn cmd_deploy(
    config: &Config,
    target_spec: &str,
    resume: bool,
    dry_run: bool,
    only_step: Option<&str>,
) -> Result<i32> {
    config.ensure_directories()?;
    let target = config.load_target(target_spec)?;

    let steps = load_pipeline(&config.pipeline_file)?;
    let graph = StepGraph::build(steps)?;
    if let Some(name) = only_step {
        if graph.get(name).is_none() {
            bail!("unknown step '{}'; run 'shipwright list' to see the pipeline", name);
        }
    }

    let runner: Arc<dyn CommandRunner> = if dry_run {
        Arc::new(DryRunRunner::new())
    } else {
        Arc::new(SshRunner::new(&target, config.connect_timeout))
    };

    println!();
    if dry_run {
        println!(
            "{} deploy of {} (no commands will run)",
            style("Dry-run").yellow().bold(),
            style(&target.name).cyan()
        );
    } else {
        println!(
            "Deploying {} ({}@{}:{})",
            style(&target.name).cyan().bold(),
            target.user,
            target.host,
            target.port
        );
    }
    println!();

    let mut pipeline_runner = PipelineRunner::new(
        graph,
        target,
        runner,
        RecordStore::new(&config.state_dir),
        config.command_timeout,
    )
    .with_global_deadline(config.global_deadline);

    // First Ctrl-C requests a graceful stop between steps; the step in
    // flight finishes and the record stays resumable.
    let cancel = pipeline_runner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested, stopping after the current step...");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let options = RunOptions {
        resume,
        dry_run,
        only_step: only_step.map(String::from),
    };
    let outcome = match pipeline_runner.run(&options).await {
        Ok(outcome) => outcome,
        Err(ConfigError::RunInProgress(target)) => {
            eprintln!(
                "{} a deployment is already in progress for '{}'",
                style("locked:").red().bold(),
                target
            );
            return Ok(exit_codes::LOCKED);
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    match &outcome {
        RunOutcome::Succeeded => {
            println!("{} deployment verified and healthy", style("ok:").green().bold());
        }
        RunOutcome::StepFailed {
            step,
            reason,
            output_tail,
            signature,
        } => {
            println!(
                "{} step '{}' {}",
                style("failed:").red().bold(),
                style(step).cyan(),
                reason
            );
            if let Some(sig) = signature {
                println!("  known failure: {}", style(sig).yellow());
            }
            if !output_tail.is_empty() {
                println!();
                for line in output_tail.lines() {
                    println!("  {}", style(line).dim());
                }
            }
            if !dry_run {
                println!();
                println!("Fix the cause and rerun with --resume to continue from here.");
            }
        }
        RunOutcome::VerificationFailed { check, detail } => {
            println!(
                "{} all steps passed but verification check '{}' did not",
                style("unhealthy:").red().bold(),
                style(check).cyan()
            );
            println!("  {}", detail);
        }
        RunOutcome::Unreachable { target, message } => {
            println!(
                "{} cannot reach '{}': {}",
                style("unreachable:").red().bold(),
                target,
                message
            );
        }
    }
    println!();
    Ok(outcome.exit_code())
}
