//! Read-only target diagnosis: health checks plus failure classification
//! of the service's own status output. Never mutates the target.

use anyhow::Result;
use console::style;
use shipwright::classify::Classifier;
use shipwright::config::Config;
use shipwright::errors::exit_codes;
use shipwright::executor::{CommandRunner, SshRunner};
use shipwright::verify::HealthChecker;

pub async fn cmd_diagnose(config: &Config, target_spec: &str) -> Result<i32> {
    let target = config.load_target(target_spec)?;
    let runner = SshRunner::new(&target, config.connect_timeout);

    println!();
    println!("Diagnosing {}", style(&target.name).cyan().bold());
    println!();

    let report = match HealthChecker::new()
        .verify(&target, &runner, config.command_timeout)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            println!(
                "{} cannot reach '{}': {}",
                style("unreachable:").red().bold(),
                target.name,
                e
            );
            println!();
            return Ok(exit_codes::UNREACHABLE);
        }
    };

    for check in &report.checks {
        let mark = if check.passed {
            style("ok  ").green()
        } else {
            style("FAIL").red().bold()
        };
        println!("  [{}] {:<18} {}", mark, check.name, check.detail);
    }
    println!();

    if report.passed() {
        println!("{} target is healthy", style("ok:").green().bold());
        println!();
        return Ok(exit_codes::SUCCESS);
    }

    // The service manager's own view of the unit, classified against the
    // known failure signatures. Read-only: recoveries are suggested, not
    // applied.
    let status_cmd = target.render("systemctl status {service} --no-pager -l");
    match runner.run(&status_cmd, config.command_timeout).await {
        Ok(output) if !output.success() => {
            let mut classifier = Classifier::for_target(&target);
            let findings = classifier.classify(&output);
            if findings.is_empty() {
                println!("No known failure signature matched. Recent unit output:");
                for line in output.tail(15).lines() {
                    println!("  {}", style(line).dim());
                }
            } else {
                println!("Known failures in unit status:");
                for finding in &findings {
                    println!(
                        "  {} {}",
                        style(&finding.signature_id).yellow(),
                        style(&finding.matched).dim()
                    );
                    if let Some(recovery) = &finding.recovery {
                        println!(
                            "    suggested recovery: {} (applied automatically during deploy)",
                            recovery
                        );
                    }
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            println!(
                "{} lost connection while inspecting the unit: {}",
                style("unreachable:").red().bold(),
                e
            );
            println!();
            return Ok(exit_codes::UNREACHABLE);
        }
    }
    println!();
    Ok(exit_codes::VERIFICATION_FAILED)
}
