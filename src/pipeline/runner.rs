//! The pipeline runner: resume, execute, classify, recover, retry, verify.
//!
//! Execution is strictly serial per target. Recovery and retry happen in
//! place: later steps never start before an earlier step succeeds or its
//! retries are exhausted. The record is persisted after every state
//! transition so an interrupted run resumes instead of restarting.
//!
//! A runner instance owns all of its mutable state (classifier dedup set,
//! cancellation flag); nothing here is process-global.

use super::graph::StepGraph;
use super::record::{DeploymentRecord, RecordStore};
use super::step::{DeploymentStep, StepState};
use crate::classify::{short_digest, Classifier};
use crate::errors::{exit_codes, ConfigError, TransportError};
use crate::executor::{CommandOutput, CommandRunner};
use crate::recovery::RecoveryRegistry;
use crate::target::DeployTarget;
use crate::verify::HealthChecker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Lines of failing output kept in the final report.
const FAILURE_TAIL_LINES: usize = 20;

/// Record key for the post-pipeline verification pseudo-step.
const VERIFICATION_KEY: &str = "verification";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume from the persisted record instead of starting fresh.
    pub resume: bool,
    /// Log intended commands without executing or persisting anything.
    pub dry_run: bool,
    /// Run only the named step.
    pub only_step: Option<String>,
}

/// Final outcome of a run. Exactly one of these reaches the user.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every step and the independent verification passed.
    Succeeded,
    /// A step exhausted its retries (or the run was cancelled).
    StepFailed {
        step: String,
        reason: String,
        output_tail: String,
        signature: Option<String>,
    },
    /// Steps passed but an external check did not. Never downgraded to a
    /// warning: step-level success is necessary, not sufficient.
    VerificationFailed { check: String, detail: String },
    /// The transport failed; nothing to classify or recover.
    Unreachable { target: String, message: String },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => exit_codes::SUCCESS,
            Self::StepFailed { .. } => exit_codes::STEP_FAILED,
            Self::VerificationFailed { .. } => exit_codes::VERIFICATION_FAILED,
            Self::Unreachable { .. } => exit_codes::UNREACHABLE,
        }
    }
}

enum StepVerdict {
    Succeeded(CommandOutput),
    Failed {
        output: CommandOutput,
        signature: Option<String>,
    },
    Unreachable(TransportError),
}

pub struct PipelineRunner {
    graph: StepGraph,
    target: DeployTarget,
    runner: Arc<dyn CommandRunner>,
    classifier: Classifier,
    recovery: RecoveryRegistry,
    store: RecordStore,
    checker: HealthChecker,
    command_timeout: Duration,
    global_deadline: Option<Duration>,
    cancel: Arc<AtomicBool>,
}

impl PipelineRunner {
    pub fn new(
        graph: StepGraph,
        target: DeployTarget,
        runner: Arc<dyn CommandRunner>,
        store: RecordStore,
        command_timeout: Duration,
    ) -> Self {
        let classifier = Classifier::for_target(&target);
        Self {
            graph,
            target,
            runner,
            classifier,
            recovery: RecoveryRegistry::builtin(),
            store,
            checker: HealthChecker::new(),
            command_timeout,
            global_deadline: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bound the whole run's wall-clock time, checked between steps.
    pub fn with_global_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.global_deadline = deadline;
        self
    }

    /// Flag checked before each step; setting it requests graceful
    /// cancellation. The step in flight is allowed to finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run(&mut self, options: &RunOptions) -> Result<RunOutcome, ConfigError> {
        let _lock = self.store.lock(&self.target.name)?;
        let start = Instant::now();
        let persist = !options.dry_run;

        let mut record = if options.resume {
            self.store
                .load(&self.target.name)?
                .unwrap_or_else(|| DeploymentRecord::new(&self.target.name))
        } else {
            DeploymentRecord::new(&self.target.name)
        };
        let completed = record.completed_steps();

        let order: Vec<usize> = self.graph.execution_order().to_vec();
        for idx in order {
            let step = self.graph.step(idx).clone();
            if let Some(ref only) = options.only_step {
                if step.name != *only {
                    continue;
                }
            }

            if self.cancel.load(Ordering::Relaxed) {
                record.append(
                    &step.name,
                    StepState::Failed,
                    None,
                    Some("run cancelled before step started".into()),
                );
                self.persist(&record, persist)?;
                return Ok(RunOutcome::StepFailed {
                    step: step.name,
                    reason: "run cancelled".into(),
                    output_tail: String::new(),
                    signature: None,
                });
            }
            if let Some(deadline) = self.global_deadline {
                if start.elapsed() >= deadline {
                    record.append(
                        &step.name,
                        StepState::Failed,
                        None,
                        Some(format!("global deadline of {}s exceeded", deadline.as_secs())),
                    );
                    self.persist(&record, persist)?;
                    return Ok(RunOutcome::StepFailed {
                        step: step.name,
                        reason: "global deadline exceeded".into(),
                        output_tail: String::new(),
                        signature: None,
                    });
                }
            }

            if completed.contains(&step.name) {
                info!(step = %step.name, "already completed in a previous run, skipping");
                record.append(
                    &step.name,
                    StepState::Skipped,
                    None,
                    Some("completed in previous run".into()),
                );
                self.persist(&record, persist)?;
                continue;
            }

            // Idempotence: if the step's effect is already present, do not
            // redo the work. A non-mutating runner skips the pre-check so
            // the step's real commands are walked and logged.
            if self.runner.mutates()
                && let Some(ref verify_cmd) = step.verify
            {
                let rendered = self.target.render(verify_cmd);
                match self.runner.run(&rendered, self.command_timeout).await {
                    Ok(out) if out.success() => {
                        info!(step = %step.name, "effect already present, skipping");
                        record.append(
                            &step.name,
                            StepState::Skipped,
                            Some(short_digest(&out.combined())),
                            Some("effect already present".into()),
                        );
                        self.persist(&record, persist)?;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return self.abort_unreachable(&mut record, &step.name, e, persist);
                    }
                }
            }

            record.append(&step.name, StepState::Running, None, None);
            self.persist(&record, persist)?;
            info!(step = %step.name, "running");

            match self.execute_with_retries(&step, &mut record, persist).await? {
                StepVerdict::Succeeded(output) => {
                    record.append(
                        &step.name,
                        StepState::Succeeded,
                        Some(short_digest(&output.combined())),
                        None,
                    );
                    self.persist(&record, persist)?;
                }
                StepVerdict::Failed { output, signature } => {
                    let reason = format!(
                        "failed after {} attempts (exit {})",
                        step.max_retries + 1,
                        output.exit_code
                    );
                    record.append(
                        &step.name,
                        StepState::Failed,
                        Some(short_digest(&output.combined())),
                        Some(reason.clone()),
                    );
                    self.persist(&record, persist)?;
                    warn!(step = %step.name, %reason, "halting pipeline");
                    return Ok(RunOutcome::StepFailed {
                        step: step.name,
                        reason,
                        output_tail: output.tail(FAILURE_TAIL_LINES),
                        signature,
                    });
                }
                StepVerdict::Unreachable(e) => {
                    return self.abort_unreachable(&mut record, &step.name, e, persist);
                }
            }
        }

        if options.dry_run {
            info!("dry-run: all steps walked, skipping verification");
            return Ok(RunOutcome::Succeeded);
        }

        // Steps succeeding is not the same as the deployment working.
        let report = match self
            .checker
            .verify(&self.target, self.runner.as_ref(), self.command_timeout)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                return self.abort_unreachable(&mut record, VERIFICATION_KEY, e, persist);
            }
        };
        if let Some(failure) = report.first_failure() {
            record.append(
                VERIFICATION_KEY,
                StepState::Failed,
                None,
                Some(format!("{}: {}", failure.name, failure.detail)),
            );
            self.persist(&record, persist)?;
            return Ok(RunOutcome::VerificationFailed {
                check: failure.name.to_string(),
                detail: failure.detail.clone(),
            });
        }
        record.append(VERIFICATION_KEY, StepState::Succeeded, None, None);
        self.persist(&record, persist)?;
        Ok(RunOutcome::Succeeded)
    }

    async fn execute_with_retries(
        &mut self,
        step: &DeploymentStep,
        record: &mut DeploymentRecord,
        persist: bool,
    ) -> Result<StepVerdict, ConfigError> {
        let attempts = step.max_retries + 1;
        let mut last_output: Option<CommandOutput> = None;
        let mut last_signature: Option<String> = None;

        for attempt in 1..=attempts {
            let failing = match self.run_action(step).await {
                Err(e) => return Ok(StepVerdict::Unreachable(e)),
                Ok(output) if output.success() => {
                    // Post-condition: the action's exit code alone is not
                    // trusted when a verify command exists.
                    match &step.verify {
                        None => return Ok(StepVerdict::Succeeded(output)),
                        Some(verify_cmd) => {
                            let rendered = self.target.render(verify_cmd);
                            match self.runner.run(&rendered, self.command_timeout).await {
                                Err(e) => return Ok(StepVerdict::Unreachable(e)),
                                Ok(vout) if vout.success() => {
                                    return Ok(StepVerdict::Succeeded(output));
                                }
                                Ok(vout) => {
                                    warn!(
                                        step = %step.name,
                                        "action succeeded but post-check failed"
                                    );
                                    vout
                                }
                            }
                        }
                    }
                }
                Ok(output) => output,
            };

            let findings = self.classifier.classify(&failing);
            if let Some(first) = findings.first() {
                last_signature = Some(first.signature_id.clone());
            }

            if attempt < attempts {
                if let Some(finding) = findings.iter().find(|f| f.actionable()) {
                    let action_id = finding.recovery.as_deref().unwrap_or_default();
                    match self.recovery.resolve(action_id) {
                        Some(action) => {
                            let action = action.clone();
                            match action
                                .apply(self.runner.as_ref(), &self.target, self.command_timeout)
                                .await
                            {
                                Err(e) => return Ok(StepVerdict::Unreachable(e)),
                                Ok(recovery_failure) => {
                                    if recovery_failure.is_some() {
                                        warn!(action = %action.id, "recovery incomplete, retrying anyway");
                                    }
                                    record.append(
                                        &step.name,
                                        StepState::Recovered,
                                        None,
                                        Some(format!("applied recovery '{}'", action.id)),
                                    );
                                    self.persist(record, persist)?;
                                }
                            }
                        }
                        None => {
                            warn!(
                                signature = %finding.signature_id,
                                action = %action_id,
                                "signature references unknown recovery action"
                            );
                        }
                    }
                }
                info!(
                    step = %step.name,
                    attempt,
                    remaining = attempts - attempt,
                    "step failed, retrying"
                );
                record.append(&step.name, StepState::Running, None, None);
                self.persist(record, persist)?;
            }
            last_output = Some(failing);
        }

        Ok(StepVerdict::Failed {
            output: last_output.unwrap_or(CommandOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            }),
            signature: last_signature,
        })
    }

    /// Run a step's command sequence, stopping at the first non-zero exit.
    async fn run_action(&self, step: &DeploymentStep) -> Result<CommandOutput, TransportError> {
        let mut last = CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        };
        for command in &step.commands {
            let rendered = self.target.render(command);
            let output = self.runner.run(&rendered, self.command_timeout).await?;
            if !output.success() {
                return Ok(output);
            }
            last = output;
        }
        Ok(last)
    }

    fn abort_unreachable(
        &self,
        record: &mut DeploymentRecord,
        step: &str,
        error: TransportError,
        persist: bool,
    ) -> Result<RunOutcome, ConfigError> {
        let message = error.to_string();
        record.append(step, StepState::Failed, None, Some(message.clone()));
        self.persist(record, persist)?;
        warn!(target = %self.target.name, %message, "target unreachable, aborting run");
        Ok(RunOutcome::Unreachable {
            target: self.target.name.clone(),
            message,
        })
    }

    fn persist(&self, record: &DeploymentRecord, persist: bool) -> Result<(), ConfigError> {
        if persist {
            self.store.save(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::{failed, ScriptedRunner};
    use crate::pipeline::step::DeploymentStep;
    use tempfile::{tempdir, TempDir};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn target(app_port: u16) -> DeployTarget {
        let mut t = DeployTarget::parse("deploy@127.0.0.1").unwrap();
        t.name = "demo".into();
        t.service = Some("demo".into());
        t.app_dir = Some("/srv/demo".into());
        t.app_port = app_port;
        t
    }

    fn make_runner(
        steps: Vec<DeploymentStep>,
        scripted: ScriptedRunner,
        app_port: u16,
    ) -> (PipelineRunner, TempDir, Arc<ScriptedRunner>) {
        let dir = tempdir().unwrap();
        let scripted = Arc::new(scripted);
        let runner = PipelineRunner::new(
            StepGraph::build(steps).unwrap(),
            target(app_port),
            scripted.clone(),
            RecordStore::new(dir.path()),
            Duration::from_secs(5),
        );
        (runner, dir, scripted)
    }

    /// Minimal HTTP endpoint answering 200 to any request, so verification
    /// can genuinely pass in tests.
    async fn spawn_health_endpoint() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                        )
                        .await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn full_run_succeeds_and_records_every_step() {
        let port = spawn_health_endpoint().await;
        let steps = vec![
            DeploymentStep::new("alpha", vec!["run alpha"]),
            DeploymentStep::new("beta", vec!["run beta"]).depends_on(vec!["alpha"]),
        ];
        let (mut runner, _dir, scripted) = make_runner(steps, ScriptedRunner::new(), port);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(scripted.count_matching("run alpha"), 1);
        assert_eq!(scripted.count_matching("run beta"), 1);

        let record = runner.store.load("demo").unwrap().unwrap();
        assert_eq!(record.latest_state("alpha"), Some(StepState::Succeeded));
        assert_eq!(record.latest_state("beta"), Some(StepState::Succeeded));
        assert_eq!(
            record.latest_state(VERIFICATION_KEY),
            Some(StepState::Succeeded)
        );
        assert!(!record.has_dangling_steps());
    }

    #[tokio::test]
    async fn all_steps_green_but_endpoint_down_is_failure() {
        // Every step exits 0; the health endpoint is unreachable. The run
        // must NOT be reported successful.
        let steps = vec![DeploymentStep::new("alpha", vec!["run alpha"])];
        let (mut runner, _dir, _scripted) = make_runner(steps, ScriptedRunner::new(), 1);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        match &outcome {
            RunOutcome::VerificationFailed { check, detail } => {
                assert_eq!(check, "health-endpoint");
                assert!(detail.contains("unreachable"));
            }
            other => panic!("expected VerificationFailed, got {:?}", other),
        }
        assert_eq!(outcome.exit_code(), exit_codes::VERIFICATION_FAILED);

        let record = runner.store.load("demo").unwrap().unwrap();
        assert_eq!(record.latest_state("alpha"), Some(StepState::Succeeded));
        assert_eq!(record.latest_state(VERIFICATION_KEY), Some(StepState::Failed));
    }

    #[tokio::test]
    async fn always_failing_step_is_attempted_exactly_retries_plus_one_times() {
        let steps = vec![
            DeploymentStep::new("flaky", vec!["apt-get install thing"]).max_retries(2),
            DeploymentStep::new("after", vec!["run after"]).depends_on(vec!["flaky"]),
        ];
        let scripted = ScriptedRunner::new().always("apt-get", failed(100, "E: broken"));
        let (mut runner, _dir, scripted) = make_runner(steps, scripted, 1);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        match &outcome {
            RunOutcome::StepFailed { step, reason, .. } => {
                assert_eq!(step, "flaky");
                assert!(reason.contains("3 attempts"));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert_eq!(scripted.count_matching("apt-get"), 3);
        // The pipeline halted: the dependent step never ran.
        assert_eq!(scripted.count_matching("run after"), 0);
    }

    #[tokio::test]
    async fn dependents_never_run_after_a_failure() {
        let steps = vec![
            DeploymentStep::new("a", vec!["run a"]),
            DeploymentStep::new("b", vec!["run b"]).depends_on(vec!["a"]).max_retries(0),
            DeploymentStep::new("c", vec!["run c"]).depends_on(vec!["b"]),
        ];
        let scripted = ScriptedRunner::new().always("run b", failed(1, "boom"));
        let (mut runner, _dir, scripted) = make_runner(steps, scripted, 1);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::StepFailed { ref step, .. } if step == "b"));
        assert_eq!(scripted.count_matching("run a"), 1);
        assert_eq!(scripted.count_matching("run c"), 0);
    }

    #[tokio::test]
    async fn resume_skips_previously_completed_steps() {
        let port = spawn_health_endpoint().await;
        let dir = tempdir().unwrap();
        let steps = || {
            vec![
                DeploymentStep::new("a", vec!["run a"]),
                DeploymentStep::new("b", vec!["run b"]).depends_on(vec!["a"]).max_retries(0),
            ]
        };

        // First run: a succeeds, b fails.
        let scripted1 = Arc::new(ScriptedRunner::new().always("run b", failed(1, "boom")));
        let mut first = PipelineRunner::new(
            StepGraph::build(steps()).unwrap(),
            target(port),
            scripted1.clone(),
            RecordStore::new(dir.path()),
            Duration::from_secs(5),
        );
        let outcome = first.run(&RunOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::StepFailed { .. }));

        // Second run with --resume: a is not re-executed, b runs and passes.
        let scripted2 = Arc::new(ScriptedRunner::new());
        let mut second = PipelineRunner::new(
            StepGraph::build(steps()).unwrap(),
            target(port),
            scripted2.clone(),
            RecordStore::new(dir.path()),
            Duration::from_secs(5),
        );
        let outcome = second
            .run(&RunOptions {
                resume: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));
        assert_eq!(scripted2.count_matching("run a"), 0);
        assert_eq!(scripted2.count_matching("run b"), 1);

        let record = second.store.load("demo").unwrap().unwrap();
        assert_eq!(record.latest_state("a"), Some(StepState::Skipped));
        assert_eq!(record.latest_state("b"), Some(StepState::Succeeded));
    }

    #[tokio::test]
    async fn second_deploy_is_all_skipped_and_mutation_free() {
        let port = spawn_health_endpoint().await;
        let steps = vec![
            DeploymentStep::new("install", vec!["mutate install"]).verify("check install"),
            DeploymentStep::new("configure", vec!["mutate configure"])
                .depends_on(vec!["install"])
                .verify("check configure"),
        ];
        // Pre-checks all pass: external state says the work is already done.
        let (mut runner, _dir, scripted) = make_runner(steps, ScriptedRunner::new(), port);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));
        assert_eq!(scripted.count_matching("mutate"), 0);
        assert_eq!(scripted.count_matching("check"), 2);

        let record = runner.store.load("demo").unwrap().unwrap();
        assert_eq!(record.latest_state("install"), Some(StepState::Skipped));
        assert_eq!(record.latest_state("configure"), Some(StepState::Skipped));
    }

    #[tokio::test]
    async fn package_conflict_is_recovered_and_retried() {
        let port = spawn_health_endpoint().await;
        let steps = vec![
            DeploymentStep::new("install-runtime", vec!["sudo apt-get install -y nodejs"]),
            DeploymentStep::new("configure-service", vec!["sudo systemctl enable {service}"])
                .depends_on(vec!["install-runtime"]),
            DeploymentStep::new("start-service", vec!["sudo systemctl restart {service}"])
                .depends_on(vec!["configure-service"]),
        ];
        let conflict = failed(
            100,
            "dpkg: error processing archive /var/cache/apt/archives/nodejs_20.1_amd64.deb (--unpack):\n\
             trying to overwrite '/usr/include/node/common.gypi', which is also in package libnode-dev",
        );
        let scripted = ScriptedRunner::new().sequence("apt-get install -y nodejs", vec![conflict]);
        let (mut runner, _dir, scripted) = make_runner(steps, scripted, port);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));

        // The recovery's purge-and-reinstall sequence actually ran.
        assert!(scripted.count_matching("apt-get remove -y --purge") >= 1);
        assert!(scripted.count_matching("deb.nodesource.com") >= 1);
        // Later steps proceeded normally.
        assert_eq!(scripted.count_matching("systemctl enable demo"), 1);
        assert_eq!(scripted.count_matching("systemctl restart demo"), 1);

        let record = runner.store.load("demo").unwrap().unwrap();
        let install_states: Vec<StepState> = record
            .entries
            .iter()
            .filter(|e| e.step == "install-runtime")
            .map(|e| e.state)
            .collect();
        assert!(install_states.contains(&StepState::Recovered));
        assert_eq!(
            record.latest_state("install-runtime"),
            Some(StepState::Succeeded)
        );
    }

    #[tokio::test]
    async fn cancellation_before_a_step_leaves_a_resumable_record() {
        let steps = vec![DeploymentStep::new("a", vec!["run a"])];
        let (mut runner, _dir, scripted) = make_runner(steps, ScriptedRunner::new(), 1);
        runner.cancel_flag().store(true, Ordering::Relaxed);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        match &outcome {
            RunOutcome::StepFailed { step, reason, .. } => {
                assert_eq!(step, "a");
                assert!(reason.contains("cancelled"));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert_eq!(scripted.count_matching("run a"), 0);

        let record = runner.store.load("demo").unwrap().unwrap();
        // No step stuck in Running: the record must stay resumable.
        assert!(!record.has_dangling_steps());
    }

    #[tokio::test]
    async fn concurrent_run_against_same_target_fails_fast() {
        let dir = tempdir().unwrap();
        let held_store = RecordStore::new(dir.path());
        let _held = held_store.lock("demo").unwrap();

        let steps = vec![DeploymentStep::new("a", vec!["run a"])];
        let mut runner = PipelineRunner::new(
            StepGraph::build(steps).unwrap(),
            target(1),
            Arc::new(ScriptedRunner::new()),
            RecordStore::new(dir.path()),
            Duration::from_secs(5),
        );
        let err = runner.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, ConfigError::RunInProgress(t) if t == "demo"));
    }

    #[tokio::test]
    async fn transport_failure_aborts_without_classification() {
        let steps = vec![
            DeploymentStep::new("a", vec!["run a"]),
            DeploymentStep::new("b", vec!["run b"]).depends_on(vec!["a"]),
        ];
        let scripted = ScriptedRunner::new().unreachable("run a");
        let (mut runner, _dir, scripted) = make_runner(steps, scripted, 1);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        match &outcome {
            RunOutcome::Unreachable { target, message } => {
                assert_eq!(target, "demo");
                assert!(message.contains("connection"));
            }
            other => panic!("expected Unreachable, got {:?}", other),
        }
        assert_eq!(outcome.exit_code(), exit_codes::UNREACHABLE);
        assert_eq!(scripted.count_matching("run b"), 0);
    }

    #[tokio::test]
    async fn zero_global_deadline_stops_before_the_first_step() {
        let steps = vec![DeploymentStep::new("a", vec!["run a"])];
        let (runner, _dir, scripted) = make_runner(steps, ScriptedRunner::new(), 1);
        let mut runner = runner.with_global_deadline(Some(Duration::ZERO));

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        assert!(
            matches!(outcome, RunOutcome::StepFailed { ref reason, .. } if reason.contains("deadline"))
        );
        assert_eq!(scripted.count_matching("run a"), 0);
    }

    #[tokio::test]
    async fn only_step_restricts_execution() {
        let port = spawn_health_endpoint().await;
        let steps = vec![
            DeploymentStep::new("a", vec!["run a"]),
            DeploymentStep::new("b", vec!["run b"]),
        ];
        let (mut runner, _dir, scripted) = make_runner(steps, ScriptedRunner::new(), port);

        let outcome = runner
            .run(&RunOptions {
                only_step: Some("b".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));
        assert_eq!(scripted.count_matching("run a"), 0);
        assert_eq!(scripted.count_matching("run b"), 1);
    }

    #[tokio::test]
    async fn post_check_failure_is_not_success() {
        let steps = vec![
            DeploymentStep::new("install", vec!["mutate install"])
                .verify("check install")
                .max_retries(0),
        ];
        // Pre-check fails (work needed), action succeeds, post-check still
        // fails: the step must not be marked Succeeded.
        let scripted = ScriptedRunner::new().always("check install", failed(1, "not installed"));
        let (mut runner, _dir, _scripted) = make_runner(steps, scripted, 1);

        let outcome = runner.run(&RunOptions::default()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::StepFailed { ref step, .. } if step == "install"));

        let record = runner.store.load("demo").unwrap().unwrap();
        assert_eq!(record.latest_state("install"), Some(StepState::Failed));
    }

    #[tokio::test]
    async fn dry_run_logs_commands_behind_a_verify_gate() {
        let steps = vec![
            DeploymentStep::new("install", vec!["mutate install"]).verify("check install"),
        ];
        let dir = tempdir().unwrap();
        let dry = Arc::new(crate::executor::DryRunRunner::new());
        let mut runner = PipelineRunner::new(
            StepGraph::build(steps).unwrap(),
            target(1),
            dry.clone(),
            RecordStore::new(dir.path()),
            Duration::from_secs(5),
        );
        let outcome = runner
            .run(&RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));
        // The idempotence pre-check must not hide the step's mutating
        // commands from the dry-run log.
        assert!(dry.commands().iter().any(|c| c == "mutate install"));
    }

    #[tokio::test]
    async fn dry_run_executes_nothing_and_persists_nothing() {
        let steps = vec![DeploymentStep::new("a", vec!["run a"])];
        let dir = tempdir().unwrap();
        let dry = Arc::new(crate::executor::DryRunRunner::new());
        let mut runner = PipelineRunner::new(
            StepGraph::build(steps).unwrap(),
            target(1),
            dry.clone(),
            RecordStore::new(dir.path()),
            Duration::from_secs(5),
        );
        let outcome = runner
            .run(&RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded));
        assert_eq!(dry.commands(), vec!["run a"]);
        assert!(runner.store.load("demo").unwrap().is_none());
    }
}
