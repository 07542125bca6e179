//! Record inspection, pipeline listing, and reset commands.

use anyhow::Result;
use console::style;
use shipwright::config::Config;
use shipwright::errors::{exit_codes, ConfigError};
use shipwright::pipeline::{load_pipeline, RecordStore, StepGraph};

pub fn cmd_status(config: &Config, target_spec: &str) -> Result<i32> {
    let target = config.load_target(target_spec)?;
    let store = RecordStore::new(&config.state_dir);

    println!();
    let Some(record) = store.load(&target.name)? else {
        println!("No deployment record for '{}'.", target.name);
        println!();
        return Ok(exit_codes::SUCCESS);
    };

    println!("Deployment record for {}", style(&target.name).cyan().bold());
    println!("  run id:     {}", record.run_id);
    println!(
        "  started at: {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("{:<20} {:<24} {:<10} Detail", "Timestamp", "Step", "State");
    for entry in &record.entries {
        let state = format!("{:?}", entry.state).to_lowercase();
        println!(
            "{:<20} {:<24} {:<10} {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.step,
            state,
            style(entry.detail.as_deref().unwrap_or("")).dim()
        );
    }
    println!();

    if record.has_dangling_steps() {
        println!(
            "{} a previous run was interrupted; 'shipwright deploy {} --resume' continues it",
            style("note:").yellow().bold(),
            target.name
        );
        println!();
    }
    Ok(exit_codes::SUCCESS)
}

pub fn cmd_list(config: &Config) -> Result<i32> {
    let steps = load_pipeline(&config.pipeline_file)?;
    let graph = StepGraph::build(steps)?;

    let source = if config.pipeline_file.exists() {
        config.pipeline_file.display().to_string()
    } else {
        "built-in default".to_string()
    };
    println!();
    println!("Pipeline ({} steps, from {})", graph.len(), source);
    println!();
    println!("{:<4} {:<20} {:<8} {:<9} Depends on", "#", "Step", "Retries", "Verified");
    for (pos, &idx) in graph.execution_order().iter().enumerate() {
        let step = graph.step(idx);
        println!(
            "{:<4} {:<20} {:<8} {:<9} {}",
            pos + 1,
            step.name,
            step.max_retries,
            if step.verify.is_some() { "yes" } else { "no" },
            style(step.depends_on.join(", ")).dim()
        );
    }
    println!();
    Ok(exit_codes::SUCCESS)
}

pub fn cmd_reset(config: &Config, target_spec: &str, force: bool) -> Result<i32> {
    let target = config.load_target(target_spec)?;

    if !force {
        println!(
            "This deletes the deployment record for '{}'; the next deploy starts from scratch.",
            target.name
        );
        println!("Pass --force to confirm.");
        return Ok(exit_codes::CONFIG);
    }

    let store = RecordStore::new(&config.state_dir);
    // Refuse to pull state out from under an active run.
    let _lock = match store.lock(&target.name) {
        Ok(lock) => lock,
        Err(ConfigError::RunInProgress(name)) => {
            eprintln!(
                "{} a deployment is in progress for '{}'; not resetting",
                style("locked:").red().bold(),
                name
            );
            return Ok(exit_codes::LOCKED);
        }
        Err(e) => return Err(e.into()),
    };
    if store.delete(&target.name)? {
        println!("Deleted deployment record for '{}'.", target.name);
    } else {
        println!("No deployment record for '{}'; nothing to do.", target.name);
    }
    Ok(exit_codes::SUCCESS)
}
