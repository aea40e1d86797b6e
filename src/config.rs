//! Configuration for the admission guard.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FormgateError, Result};

/// How limiter identities are scoped across forms.
///
/// Either mode partitions by client address; the mode only decides whether
/// the form identifier is part of the limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyingMode {
    /// Each form identifier gets an independent limiter.
    PerForm,
    /// All forms share one limiter per client.
    Global,
}

/// Behavior when the storage backend stays unreachable after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject the request. A storage hot-spot must not become a bypass.
    FailClosed,
    /// Accept the request without bookkeeping.
    FailOpen,
}

/// Main configuration for the Formgate guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormgateConfig {
    /// Master switch; when false every submission is accepted untracked
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Limiter key scoping
    #[serde(default = "default_keying_mode")]
    pub keying_mode: KeyingMode,

    /// Accepted submissions per interval; must be positive
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length as a duration string, e.g. "15 minutes"
    #[serde(default = "default_interval")]
    pub interval: String,

    /// IP literals or CIDR blocks that bypass rate limiting
    #[serde(default)]
    pub allow_list: Vec<String>,

    /// IP literals or CIDR blocks that are blocked outright
    #[serde(default)]
    pub deny_list: Vec<String>,

    /// Emit structured events for allow/deny/reject outcomes
    #[serde(default)]
    pub logging_enabled: bool,

    /// Resolution when storage retries are exhausted
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

impl Default for FormgateConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            keying_mode: default_keying_mode(),
            limit: default_limit(),
            interval: default_interval(),
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            logging_enabled: false,
            failure_policy: default_failure_policy(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_keying_mode() -> KeyingMode {
    KeyingMode::PerForm
}

fn default_limit() -> u64 {
    5
}

fn default_interval() -> String {
    "15 minutes".to_string()
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::FailClosed
}

impl FormgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FormgateError::Config(e.to_string()))
    }

    /// Fail-fast validation, performed once before any limiter is built.
    ///
    /// Returns the parsed interval so callers never re-parse it per request.
    pub fn validate(&self) -> Result<Duration> {
        if self.limit == 0 {
            return Err(FormgateError::Config("limit must be positive".to_string()));
        }
        let interval = parse_interval(&self.interval).ok_or_else(|| {
            FormgateError::Config(format!("invalid interval {:?}", self.interval))
        })?;
        if interval.is_zero() {
            return Err(FormgateError::Config("interval must be positive".to_string()));
        }
        Ok(interval)
    }
}

/// Parse interval strings of the form `"<count> <unit>"`, e.g. "15 minutes".
///
/// A bare count is read as seconds. Units may be singular or plural.
pub fn parse_interval(spec: &str) -> Option<Duration> {
    let mut parts = spec.split_whitespace();
    let count: u64 = parts.next()?.parse().ok()?;
    let unit = parts.next().unwrap_or("seconds");
    if parts.next().is_some() {
        return None;
    }
    let unit_secs = match unit.trim_end_matches('s') {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        "day" => 86400,
        _ => return None,
    };
    count.checked_mul(unit_secs).map(Duration::from_secs)
}
