// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

fn default_namespace() -> String {
    "mycel/v1".to_string()
}

fn default_discovery_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_concurrent_executions() -> usize {
    2
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_inline_stripping_threshold() -> usize {
    10 * 1024
}

fn default_work_base_dir() -> String {
    "/tmp/mycel-sandbox".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Topic namespace prefix shared by every component of one deployment.
    /// All broker topics are built as `{namespace}/...`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Gateway id used when building status/response topics for tasks that
    /// did not arrive from a peer agent.
    #[serde(default)]
    pub gateway_id: Option<String>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name — the routing key in every agent topic.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// Coalesce streamed text deltas until this many bytes have accumulated
    /// before publishing a status update. 0 disables batching (every delta
    /// is forwarded immediately).
    #[serde(default)]
    pub stream_batching_threshold_bytes: usize,
    /// Seconds between AgentCard broadcasts on the discovery topic.
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
    /// Seconds between peer-timeout sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Worker pool size for blocking tool calls and checkpoint writes.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// When false (the default) no token-usage records are accumulated.
    #[serde(default)]
    pub track_token_usage: bool,
    /// Files uploaded once at startup under the shared defaults user so
    /// every session sees them without an explicit upload.
    #[serde(default)]
    pub default_artifacts: Vec<DefaultArtifact>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            description: String::new(),
            version: String::new(),
            stream_batching_threshold_bytes: 0,
            discovery_interval_secs: default_discovery_interval(),
            sweep_interval_secs: default_sweep_interval(),
            worker_threads: default_worker_threads(),
            track_token_usage: false,
            default_artifacts: Vec::new(),
        }
    }
}

/// One file to expose to every user of this agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultArtifact {
    pub path: String,
    /// Store under this name instead of the basename of `path`.
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Child process with rlimits applied before exec; no filesystem isolation.
    #[default]
    Direct,
    /// bubblewrap sandbox: whitelist mounts, pid/user namespaces, nobody uid.
    Bwrap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,
    /// Profile applied when a tool does not declare its own.
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default = "default_work_base_dir")]
    pub work_base_dir: String,
    /// Read-only directory bind-mounted into bwrap sandboxes (tool assets).
    #[serde(default)]
    pub tools_dir: Option<String>,
    /// Binary to exec as the tool-runner child. Defaults to the current
    /// executable; must be set explicitly when bwrap hides the host path.
    #[serde(default)]
    pub runner_bin: Option<String>,
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    /// File-part bytes above this size are stripped from task logs and
    /// replaced with a placeholder.
    #[serde(default = "default_inline_stripping_threshold")]
    pub inline_stripping_threshold_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Direct,
            default_profile: None,
            work_base_dir: default_work_base_dir(),
            tools_dir: None,
            runner_bin: None,
            max_concurrent_executions: default_max_concurrent_executions(),
            timeout_secs: default_sandbox_timeout(),
            inline_stripping_threshold_bytes: default_inline_stripping_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackend,
    /// Root directory for the filesystem backend.
    #[serde(default)]
    pub root: Option<String>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Filesystem,
            root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the checkpoint database. `:memory:` is accepted for tests.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub blob: BlobConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            blob: BlobConfig::default(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_namespace() {
        let cfg: Config = serde_yaml::from_str("agent:\n  name: demo\n").unwrap();
        assert_eq!(cfg.namespace, "mycel/v1");
        assert_eq!(cfg.agent.name, "demo");
    }

    #[test]
    fn batching_threshold_defaults_to_disabled() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.stream_batching_threshold_bytes, 0);
    }

    #[test]
    fn token_tracking_defaults_off() {
        let cfg = AgentConfig::default();
        assert!(!cfg.track_token_usage);
    }

    #[test]
    fn sandbox_mode_parses_lowercase() {
        let cfg: SandboxConfig = serde_yaml::from_str("mode: bwrap\n").unwrap();
        assert_eq!(cfg.mode, SandboxMode::Bwrap);
    }

    #[test]
    fn sandbox_defaults() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.max_concurrent_executions, 2);
        assert_eq!(cfg.timeout_secs, 60);
        assert_eq!(cfg.inline_stripping_threshold_bytes, 10 * 1024);
    }

    #[test]
    fn default_artifact_optional_fields() {
        let a: DefaultArtifact = serde_yaml::from_str("path: /data/readme.md\n").unwrap();
        assert!(a.filename.is_none());
        assert!(a.mime_type.is_none());
    }
}
