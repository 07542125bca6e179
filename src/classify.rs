//! Rule-based error classification for failed command output.
//!
//! Every signature pairs a regex with a required co-occurring anchor string.
//! The anchor is a structural constraint of the type, not a convention: a
//! bare-keyword signature ("Permission denied" anywhere in any output) cannot
//! be constructed. Classification only runs on non-zero exit codes, and each
//! (signature, output) pair is reported at most once per run.

use crate::executor::CommandOutput;
use crate::target::DeployTarget;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// A known failure mode in command output.
#[derive(Debug, Clone)]
pub struct ErrorSignature {
    id: String,
    pattern: Regex,
    /// Context string that must co-occur with the pattern match. Scopes the
    /// signature to this deployment's own commands and paths.
    anchor: String,
    recovery: Option<String>,
}

impl ErrorSignature {
    /// Build a signature. Fails on an invalid regex or an empty anchor;
    /// anchors are mandatory to keep signatures specific.
    pub fn new(
        id: &str,
        pattern: &str,
        anchor: &str,
        recovery: Option<&str>,
    ) -> Result<Self, String> {
        if anchor.trim().is_empty() {
            return Err(format!("signature '{}' has an empty anchor", id));
        }
        let pattern = Regex::new(pattern)
            .map_err(|e| format!("signature '{}' has an invalid pattern: {}", id, e))?;
        Ok(Self {
            id: id.to_string(),
            pattern,
            anchor: anchor.to_string(),
            recovery: recovery.map(String::from),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn recovery(&self) -> Option<&str> {
        self.recovery.as_deref()
    }

    fn match_in<'t>(&self, text: &'t str) -> Option<&'t str> {
        if !text.contains(&self.anchor) {
            return None;
        }
        self.pattern.find(text).map(|m| m.as_str())
    }

    /// Longer pattern + anchor means a more specific signature; used to
    /// break ties when several signatures match one failure.
    fn specificity(&self) -> usize {
        self.pattern.as_str().len() + self.anchor.len()
    }
}

/// One classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub signature_id: String,
    pub matched: String,
    pub recovery: Option<String>,
}

impl Finding {
    pub fn actionable(&self) -> bool {
        self.recovery.is_some()
    }
}

/// Scans failed output against the signature table. Holds per-run dedup
/// state, so one classifier instance belongs to one pipeline run.
pub struct Classifier {
    signatures: Vec<ErrorSignature>,
    seen: HashSet<(String, String)>,
}

impl Classifier {
    pub fn new(signatures: Vec<ErrorSignature>) -> Self {
        Self {
            signatures,
            seen: HashSet::new(),
        }
    }

    /// Classifier with the built-in signature table, anchored to the given
    /// target's own paths and names.
    pub fn for_target(target: &DeployTarget) -> Self {
        Self::new(builtin_signatures(target))
    }

    /// Classify a failed command result. Success output is never scanned:
    /// matching benign output is the classic false-positive source. Returns
    /// new findings only, most specific first.
    pub fn classify(&mut self, output: &CommandOutput) -> Vec<Finding> {
        if output.success() {
            return Vec::new();
        }
        let text = output.combined();

        let mut matched: Vec<(&ErrorSignature, &str)> = self
            .signatures
            .iter()
            .filter_map(|sig| sig.match_in(&text).map(|m| (sig, m)))
            .collect();
        matched.sort_by(|a, b| b.0.specificity().cmp(&a.0.specificity()));

        let mut findings = Vec::new();
        for (sig, matched_text) in matched {
            let key = (sig.id.clone(), short_digest(matched_text));
            if !self.seen.insert(key) {
                debug!(signature = %sig.id, "suppressing duplicate finding");
                continue;
            }
            findings.push(Finding {
                signature_id: sig.id.clone(),
                matched: matched_text.to_string(),
                recovery: sig.recovery.clone(),
            });
        }
        if findings.len() > 1 {
            let rejected: Vec<&str> = findings[1..]
                .iter()
                .map(|f| f.signature_id.as_str())
                .collect();
            debug!(
                preferred = %findings[0].signature_id,
                ?rejected,
                "multiple signatures matched, preferring most specific"
            );
        }
        findings
    }
}

/// Short stable hash of matched text, for the dedup key and output digests.
pub fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// The built-in signature table: the recurring failure families of a
/// web-app deployment, each anchored to target-specific context.
pub fn builtin_signatures(target: &DeployTarget) -> Vec<ErrorSignature> {
    let app_dir = target.app_dir().display().to_string();
    let service = target.service();
    let mut signatures = vec![
        ErrorSignature::new(
            "node-package-conflict",
            r"(?i)(dpkg: error processing archive .*node|trying to overwrite '.*node.*'|unmet dependencies)",
            "node",
            Some("reinstall-node"),
        ),
        ErrorSignature::new(
            "apt-lock-held",
            r"Could not get lock /var/lib/dpkg/lock",
            "/var/lib/dpkg",
            None,
        ),
        ErrorSignature::new(
            "app-dir-permission",
            r"(?i)permission denied",
            &app_dir,
            Some("fix-app-permissions"),
        ),
        ErrorSignature::new(
            "port-in-use",
            r"(?i)address already in use",
            "bind",
            Some("free-port"),
        ),
        ErrorSignature::new(
            "service-start-failed",
            r"Job for \S+\.service failed",
            &format!("{}.service", service),
            Some("prepare-service-dirs"),
        ),
        ErrorSignature::new(
            "command-timeout",
            r"command timed out after \d+s",
            "timed out",
            None,
        ),
    ];
    if let Some(ref domain) = target.domain {
        signatures.push(ErrorSignature::new(
            "dns-resolution",
            r"(?i)(could not resolve host|name or service not known|temporary failure in name resolution)",
            domain,
            None,
        ));
    }
    signatures
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("built-in signatures are valid")
}
