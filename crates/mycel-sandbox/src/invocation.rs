// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exit codes of the tool-runner child process.
pub mod exit_codes {
    /// Tool ran and returned a non-error result.
    pub const SUCCESS: i32 = 0;
    /// Tool ran and returned an error result (or panicked).
    pub const TOOL_FAILED: i32 = 1;
    /// The invocation spec or pre-loaded inputs could not be decoded.
    pub const INPUT_DECODE_FAILED: i32 = 2;
    /// The child-side timeout fired before the tool finished.
    pub const TIMEOUT: i32 = 3;
    /// Recorded by the parent when it had to kill the child.
    pub const KILLED_BY_PARENT: i32 = 124;
}

/// Name of the invocation spec file inside the work directory.
pub const INVOCATION_SPEC_FILENAME: &str = "invocation.json";

/// One pre-loaded artifact the child rebuilds from `input/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactDescriptor {
    /// Tool parameter this artifact satisfies.
    pub param: String,
    pub filename: String,
    pub version: u64,
    pub mime_type: String,
    /// Path relative to the work directory's `input/`.
    pub file: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Everything the tool-runner child needs, written as JSON into the work
/// directory before spawn. Contains no secrets: artifact bytes live in
/// `input/`, credentials never cross this boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRunnerSpec {
    pub task_id: String,
    pub tool_name: String,
    pub args: Value,
    #[serde(default)]
    pub tool_config: HashMap<String, Value>,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    /// Child-side wall-clock budget; the parent enforces its own slightly
    /// larger one on top.
    pub timeout_seconds: u64,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
}

impl ToolRunnerSpec {
    pub fn input_dir(&self) -> PathBuf {
        self.work_dir.join(crate::workdir::INPUT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join(crate::workdir::OUTPUT_DIR)
    }

    pub fn status_pipe(&self) -> PathBuf {
        self.work_dir.join(crate::STATUS_PIPE_FILENAME)
    }

    pub fn spec_path(&self) -> PathBuf {
        self.work_dir.join(INVOCATION_SPEC_FILENAME)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_round_trips() {
        let spec = ToolRunnerSpec {
            task_id: "t1".into(),
            tool_name: "process_file".into(),
            args: json!({"input_file": "data.csv:2"}),
            tool_config: HashMap::new(),
            app_name: "app".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            timeout_seconds: 60,
            work_dir: PathBuf::from("/tmp/work/t1"),
            artifacts: vec![ArtifactDescriptor {
                param: "input_file".into(),
                filename: "data.csv".into(),
                version: 2,
                mime_type: "text/csv".into(),
                file: "data.csv".into(),
                metadata: HashMap::new(),
            }],
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: ToolRunnerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert_eq!(back.input_dir(), PathBuf::from("/tmp/work/t1/input"));
        assert_eq!(back.output_dir(), PathBuf::from("/tmp/work/t1/output"));
        assert_eq!(back.status_pipe(), PathBuf::from("/tmp/work/t1/status.pipe"));
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(exit_codes::SUCCESS, 0);
        assert_eq!(exit_codes::TOOL_FAILED, 1);
        assert_eq!(exit_codes::INPUT_DECODE_FAILED, 2);
        assert_eq!(exit_codes::TIMEOUT, 3);
        assert_eq!(exit_codes::KILLED_BY_PARENT, 124);
    }
}
