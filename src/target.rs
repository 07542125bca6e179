//! Deployment targets: the remote host a pipeline runs against.
//!
//! Targets are normally defined in `.shipwright/targets.toml`; an ad-hoc
//! `user@host[:port]` spec on the command line also works.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn default_user() -> String {
    "deploy".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_app_port() -> u16 {
    8000
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// One remote deployment target and the values steps interpolate into
/// their command templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTarget {
    pub name: String,
    pub host: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Directory the application is deployed into. Error-signature anchors
    /// are scoped to this path.
    #[serde(default)]
    pub app_dir: Option<PathBuf>,
    /// Name of the systemd unit for the application.
    #[serde(default)]
    pub service: Option<String>,
    /// Public hostname. Used for the external HTTP probe and DNS check.
    #[serde(default)]
    pub domain: Option<String>,
    /// Address the domain is expected to resolve to.
    #[serde(default)]
    pub expected_addr: Option<String>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Port the application itself listens on.
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    /// Opaque key/value configuration available to command templates.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl DeployTarget {
    /// Build a target from an ad-hoc `user@host[:port]` spec.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (user, rest) = spec
            .split_once('@')
            .ok_or_else(|| ConfigError::UnknownTarget(spec.to_string()))?;
        if user.is_empty() || rest.is_empty() {
            return Err(ConfigError::UnknownTarget(spec.to_string()));
        }
        let (host, port) = match rest.rsplit_once(':') {
            Some((h, p)) => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| ConfigError::UnknownTarget(spec.to_string()))?;
                (h.to_string(), port)
            }
            None => (rest.to_string(), default_port()),
        };
        if host.is_empty() {
            return Err(ConfigError::UnknownTarget(spec.to_string()));
        }
        Ok(Self {
            name: host.clone(),
            host,
            user: user.to_string(),
            port,
            identity_file: None,
            app_dir: None,
            service: None,
            domain: None,
            expected_addr: None,
            health_path: default_health_path(),
            app_port: default_app_port(),
            variables: BTreeMap::new(),
        })
    }

    /// Application directory, defaulting to `/srv/<name>`.
    pub fn app_dir(&self) -> PathBuf {
        self.app_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/srv").join(&self.name))
    }

    /// Service unit name, defaulting to the target name.
    pub fn service(&self) -> String {
        self.service.clone().unwrap_or_else(|| self.name.clone())
    }

    /// Externally reachable health endpoint URL. Prefers the public domain
    /// over the raw host so the probe exercises the same path users do.
    pub fn health_url(&self) -> String {
        let host = self.domain.as_deref().unwrap_or(&self.host);
        format!("http://{}:{}{}", host, self.app_port, self.health_path)
    }

    /// Render a command template, substituting `{key}` placeholders with
    /// target fields and user-provided variables.
    pub fn render(&self, template: &str) -> String {
        let mut out = template.to_string();
        let app_dir = self.app_dir();
        let service = self.service();
        let builtins: [(&str, String); 7] = [
            ("{host}", self.host.clone()),
            ("{user}", self.user.clone()),
            ("{port}", self.port.to_string()),
            ("{app_dir}", app_dir.display().to_string()),
            ("{service}", service),
            ("{app_port}", self.app_port.to_string()),
            ("{domain}", self.domain.clone().unwrap_or_default()),
        ];
        for (key, value) in builtins {
            out = out.replace(key, &value);
        }
        for (key, value) in &self.variables {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }
}
