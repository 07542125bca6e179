//! Independent post-pipeline verification.
//!
//! Runs only after every step reports success, and trusts none of them:
//! the checks re-validate external reachability from scratch. Step-level
//! success is necessary but never sufficient; the run is reported successful
//! only when this verification passes. The project's own history is a
//! deployment that "succeeded" at every step while the site was down.

use crate::errors::TransportError;
use crate::executor::CommandRunner;
use crate::target::DeployTarget;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::info;

const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one external check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn first_failure(&self) -> Option<&CheckResult> {
        self.checks.iter().find(|c| !c.passed)
    }
}

/// Re-validates a deployed target: process liveness, listening port, the
/// externally reachable health endpoint, and DNS.
pub struct HealthChecker {
    http_timeout: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            http_timeout: HTTP_PROBE_TIMEOUT,
        }
    }

    pub async fn verify(
        &self,
        target: &DeployTarget,
        runner: &dyn CommandRunner,
        command_timeout: Duration,
    ) -> Result<VerificationReport, TransportError> {
        let mut report = VerificationReport::default();

        // Process liveness, asked of the service manager directly.
        let service = target.service();
        let out = runner
            .run(
                &target.render("systemctl is-active --quiet {service}"),
                command_timeout,
            )
            .await?;
        report.checks.push(if out.success() {
            CheckResult::pass("service-active", format!("unit {} is active", service))
        } else {
            CheckResult::fail(
                "service-active",
                format!("unit {} is not active: {}", service, out.tail(5)),
            )
        });

        // Something must actually be listening on the application port.
        let out = runner
            .run(
                &target.render("ss -ltn | grep -q ':{app_port} '"),
                command_timeout,
            )
            .await?;
        report.checks.push(if out.success() {
            CheckResult::pass("port-listening", format!("port {} is listening", target.app_port))
        } else {
            CheckResult::fail(
                "port-listening",
                format!("nothing listening on port {}", target.app_port),
            )
        });

        // HTTP probe against the externally reachable address, not localhost
        // on the target.
        report.checks.push(self.probe_health_endpoint(target).await);

        // DNS: the configured hostname must resolve to the expected address.
        if let (Some(domain), Some(expected)) = (&target.domain, &target.expected_addr) {
            report.checks.push(check_dns(domain, expected).await);
        }

        info!(
            passed = report.passed(),
            checks = report.checks.len(),
            "verification complete"
        );
        Ok(report)
    }

    async fn probe_health_endpoint(&self, target: &DeployTarget) -> CheckResult {
        let url = target.health_url();
        let client = match reqwest::Client::builder().timeout(self.http_timeout).build() {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::fail("health-endpoint", format!("http client error: {}", e));
            }
        };
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                CheckResult::pass("health-endpoint", format!("{} returned {}", url, resp.status()))
            }
            Ok(resp) => CheckResult::fail(
                "health-endpoint",
                format!("{} returned {}", url, resp.status()),
            ),
            Err(e) => CheckResult::fail("health-endpoint", format!("{} unreachable: {}", url, e)),
        }
    }
}

async fn check_dns(domain: &str, expected: &str) -> CheckResult {
    match lookup_host((domain, 80)).await {
        Ok(addrs) => {
            let resolved: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
            if resolved.iter().any(|ip| ip == expected) {
                CheckResult::pass("dns-resolution", format!("{} resolves to {}", domain, expected))
            } else {
                CheckResult::fail(
                    "dns-resolution",
                    format!(
                        "{} resolves to {:?}, expected {}",
                        domain, resolved, expected
                    ),
                )
            }
        }
        Err(e) => CheckResult::fail(
            "dns-resolution",
            format!("{} did not resolve: {}", domain, e),
        ),
    }
}
