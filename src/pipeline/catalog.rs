//! The default deployment pipeline and `pipeline.json` loading.
//!
//! The built-in pipeline covers the canonical web-app rollout. Projects
//! override it by dropping a `pipeline.json` into `.shipwright/`; the file
//! is the same serde shape as the step definitions here.

use super::step::DeploymentStep;
use crate::errors::ConfigError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PipelineFile {
    steps: Vec<DeploymentStep>,
}

/// Load the pipeline from `path` if it exists, otherwise the built-in
/// default.
pub fn load_pipeline(path: &Path) -> Result<Vec<DeploymentStep>, ConfigError> {
    if !path.exists() {
        return Ok(default_pipeline());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: PipelineFile = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(parsed.steps)
}

/// The built-in rollout pipeline. Every step is idempotent: pre-checks skip
/// work whose effect is already present.
pub fn default_pipeline() -> Vec<DeploymentStep> {
    vec![
        DeploymentStep::new("preflight", vec!["uname -a", "sudo -n true"]).max_retries(1),
        DeploymentStep::new(
            "install-runtime",
            vec![
                "curl -fsSL https://deb.nodesource.com/setup_20.x | sudo -E bash -",
                "sudo apt-get install -y nodejs",
            ],
        )
        .depends_on(vec!["preflight"])
        .verify("node --version"),
        DeploymentStep::new(
            "sync-app",
            vec![
                "sudo mkdir -p {app_dir}",
                "sudo chown {user}:{user} {app_dir}",
                "cd {app_dir} && (git pull --ff-only || git clone {repo_url} .)",
            ],
        )
        .depends_on(vec!["preflight"]),
        DeploymentStep::new("install-deps", vec!["cd {app_dir} && npm ci --omit=dev"])
            .depends_on(vec!["install-runtime", "sync-app"])
            .verify("test -d {app_dir}/node_modules"),
        DeploymentStep::new(
            "configure-service",
            vec![
                "sudo mkdir -p /var/log/{service} /run/{service}",
                "sudo chown -R {user}:{user} /var/log/{service} /run/{service}",
                "sudo systemctl daemon-reload",
                "sudo systemctl enable {service}",
            ],
        )
        .depends_on(vec!["sync-app"])
        .verify("systemctl is-enabled {service}"),
        DeploymentStep::new(
            "configure-proxy",
            vec!["sudo nginx -t", "sudo systemctl reload nginx"],
        )
        .depends_on(vec!["preflight"])
        .verify("systemctl is-active nginx"),
        DeploymentStep::new("start-service", vec!["sudo systemctl restart {service}"])
            .depends_on(vec!["install-deps", "configure-service"])
            .verify("systemctl is-active {service}"),
    ]
}
