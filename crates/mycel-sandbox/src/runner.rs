// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use mycel_blob::ScopedArtifactService;
use mycel_config::{SandboxConfig, SandboxMode};
use mycel_tools::runtime::resolve_artifact_args;
use mycel_tools::{
    error_codes, ArtifactValue, DataDisposition, DataObject, StatusSignal, ToolResult, ToolSpec,
};

use crate::command::{build_bwrap_command, build_direct_command};
use crate::invocation::{exit_codes, ArtifactDescriptor, ToolRunnerSpec};
use crate::profiles::{get_profile, SandboxProfile};
use crate::stream::{consume_status_pipe, StreamBody};
use crate::workdir::{
    check_disk_space, cleanup_work_directory, safe_filename, setup_work_directory, INPUT_DIR,
};
use crate::SandboxError;

/// Grace period between SIGTERM and SIGKILL when the wall clock expires.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Refuse to start a tool with less than this much free disk.
const MIN_FREE_DISK_MB: u64 = 100;

/// One sandboxed tool call.
pub struct SandboxRequest {
    pub task_id: String,
    pub tool_name: String,
    pub args: Value,
    pub tool_config: HashMap<String, Value>,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    /// Overrides the configured default timeout.
    pub timeout_seconds: Option<u64>,
    /// Status frames from the child are forwarded here.
    pub status_tx: Option<mpsc::UnboundedSender<StatusSignal>>,
}

/// Runs tools in isolated OS processes.
///
/// Holds no per-task state; a semaphore bounds concurrent children per
/// agent. Every failure mode comes back as an error [`ToolResult`] — the
/// sandbox protects the host, not the other way around.
pub struct SandboxRunner {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        let permits = config.max_concurrent_executions.max(1);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Currently free execution slots — test hook.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn execute(
        &self,
        request: SandboxRequest,
        spec: &ToolSpec,
        artifacts: &ScopedArtifactService,
    ) -> ToolResult {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ToolResult::error("sandbox runner shut down", error_codes::SYSTEM_ERROR)
            }
        };
        match self.run_isolated(request, spec, artifacts).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "sandbox execution failed");
                e.to_tool_result()
            }
        }
    }

    async fn run_isolated(
        &self,
        request: SandboxRequest,
        spec: &ToolSpec,
        artifacts: &ScopedArtifactService,
    ) -> Result<ToolResult, SandboxError> {
        let base = Path::new(&self.config.work_base_dir);
        std::fs::create_dir_all(base)?;
        if !check_disk_space(base, MIN_FREE_DISK_MB) {
            return Err(SandboxError::ResourceExceeded(format!(
                "less than {MIN_FREE_DISK_MB} MiB free under {}",
                base.display()
            )));
        }

        let work_dir = setup_work_directory(base, &request.task_id)?;
        let result = self
            .run_in_work_dir(&request, spec, artifacts, &work_dir)
            .await;
        cleanup_work_directory(&work_dir);
        result
    }

    async fn run_in_work_dir(
        &self,
        request: &SandboxRequest,
        spec: &ToolSpec,
        artifacts: &ScopedArtifactService,
        work_dir: &Path,
    ) -> Result<ToolResult, SandboxError> {
        // ── Artifact pre-load ────────────────────────────────────────────────
        let resolved = match resolve_artifact_args(&spec.artifact_params, &request.args, artifacts)
            .await
        {
            Ok(resolved) => resolved,
            // Artifact problems are complete tool errors already.
            Err(result) => return Ok(result),
        };
        let descriptors = write_input_artifacts(&resolved, work_dir)?;

        // ── Invocation spec ──────────────────────────────────────────────────
        let timeout_secs = request.timeout_seconds.unwrap_or(self.config.timeout_secs);
        let runner_spec = ToolRunnerSpec {
            task_id: request.task_id.clone(),
            tool_name: request.tool_name.clone(),
            args: request.args.clone(),
            tool_config: request.tool_config.clone(),
            app_name: request.app_name.clone(),
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            timeout_seconds: timeout_secs,
            work_dir: work_dir.to_path_buf(),
            artifacts: descriptors,
        };
        let spec_json = serde_json::to_vec(&runner_spec)
            .map_err(|e| SandboxError::Setup(format!("encoding invocation spec: {e}")))?;
        std::fs::write(runner_spec.spec_path(), spec_json)?;

        // ── Command ──────────────────────────────────────────────────────────
        let profile_name = spec
            .sandbox_profile
            .as_deref()
            .or(self.config.default_profile.as_deref())
            .unwrap_or("standard");
        let profile = get_profile(profile_name);
        let runner_bin = self.runner_bin()?;
        let argv = match self.config.mode {
            SandboxMode::Direct => build_direct_command(&runner_bin, work_dir),
            SandboxMode::Bwrap => build_bwrap_command(
                &runner_bin,
                work_dir,
                self.config.tools_dir.as_deref(),
                profile,
            ),
        };
        debug!(tool = %request.tool_name, mode = ?self.config.mode, profile = profile.name, "spawning sandbox child");

        // ── Status pipe consumer ─────────────────────────────────────────────
        // Opened before the child spawns: the child's sender open would fail
        // if no reader existed yet. The dummy sender keeps the pipe from
        // hitting EOF before the child connects.
        let pipe_path = runner_spec.status_pipe();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let pipe_hold = match tokio::net::unix::pipe::OpenOptions::new().open_receiver(&pipe_path)
        {
            Ok(receiver) => {
                let hold = tokio::net::unix::pipe::OpenOptions::new()
                    .open_sender(&pipe_path)
                    .ok();
                tokio::spawn(consume_status_pipe(receiver, frames_tx));
                hold
            }
            Err(e) => {
                warn!(error = %e, "status pipe unavailable, running without streaming");
                None
            }
        };

        // ── Spawn ────────────────────────────────────────────────────────────
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        apply_pre_exec(&mut cmd, profile);

        let mut child = cmd.spawn()?;
        let child_pid = child.id();
        let status_tx = request.status_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                match frame.body {
                    StreamBody::Status { message } => {
                        if let Some(tx) = &status_tx {
                            let _ = tx.send(StatusSignal::Status(message));
                        }
                    }
                    StreamBody::Heartbeat {} => debug!("sandbox heartbeat"),
                    StreamBody::Error { ref error, .. } => {
                        debug!(error = %error, "child reported stream error")
                    }
                    // The authoritative result arrives on stdout.
                    StreamBody::Result { .. } => {}
                }
            }
        });

        // ── Collect stdout/stderr concurrently with the wait ─────────────────
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        // The parent allows the child its own timeout plus slack for
        // serialisation before escalating.
        let parent_budget = Duration::from_secs(timeout_secs + 5);
        let exit = match tokio::time::timeout(parent_budget, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(tool = %request.tool_name, timeout_secs, "sandbox wall clock expired, escalating");
                terminate_group(child_pid);
                match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        kill_group(child_pid);
                        child.wait().await?
                    }
                };
                forwarder.abort();
                return Err(SandboxError::Timeout(timeout_secs));
            }
        };
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        // Let the pipe hit EOF now that the child is gone, then drain the
        // tail of the status stream.
        drop(pipe_hold);
        let _ = tokio::time::timeout(Duration::from_secs(1), forwarder).await;

        // ── Interpret exit ───────────────────────────────────────────────────
        let mut result = interpret_exit(exit.code(), &stdout, &stderr, timeout_secs)?;

        // ── Output harvest ───────────────────────────────────────────────────
        harvest_output_artifacts(&mut result, &runner_spec.output_dir());
        info!(tool = %request.tool_name, status = ?result.status, "sandbox execution finished");
        Ok(result)
    }

    fn runner_bin(&self) -> Result<String, SandboxError> {
        if let Some(bin) = &self.config.runner_bin {
            return Ok(bin.clone());
        }
        std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| SandboxError::Setup(format!("cannot locate runner binary: {e}")))
    }
}

/// Write each pre-loaded artifact under `input/` and describe it for the
/// child. Filenames pass the jail check against the input directory.
fn write_input_artifacts(
    resolved: &HashMap<String, ArtifactValue>,
    work_dir: &Path,
) -> Result<Vec<ArtifactDescriptor>, SandboxError> {
    let input_dir = work_dir.join(INPUT_DIR);
    let mut descriptors = Vec::new();
    for (param, value) in resolved {
        for artifact in value.many() {
            let path = safe_filename(&artifact.filename, &input_dir)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &artifact.bytes)?;
            descriptors.push(ArtifactDescriptor {
                param: param.clone(),
                filename: artifact.filename.clone(),
                version: artifact.version,
                mime_type: artifact.mime_type.clone(),
                file: artifact.filename.clone(),
                metadata: artifact.metadata.clone(),
            });
        }
    }
    Ok(descriptors)
}

fn apply_pre_exec(cmd: &mut Command, profile: &SandboxProfile) {
    #[cfg(unix)]
    {
        let as_bytes = profile.rlimit_as_mb * 1024 * 1024;
        let cpu = profile.rlimit_cpu_sec;
        let fsize = profile.rlimit_fsize_mb * 1024 * 1024;
        let nofile = profile.rlimit_nofile;
        let nproc = profile.rlimit_nproc;
        unsafe {
            cmd.pre_exec(move || {
                // New process group for clean signal delivery to the whole
                // tree.
                libc::setsid();
                // The RLIMIT_* constant type differs between libc targets;
                // a macro sidesteps naming it.
                macro_rules! limit {
                    ($resource:expr, $value:expr) => {{
                        let lim = libc::rlimit {
                            rlim_cur: $value,
                            rlim_max: $value,
                        };
                        if libc::setrlimit($resource, &lim) != 0 {
                            return Err(std::io::Error::last_os_error());
                        }
                    }};
                }
                limit!(libc::RLIMIT_CORE, 0);
                limit!(libc::RLIMIT_AS, as_bytes);
                limit!(libc::RLIMIT_CPU, cpu);
                limit!(libc::RLIMIT_FSIZE, fsize);
                limit!(libc::RLIMIT_NOFILE, nofile);
                limit!(libc::RLIMIT_NPROC, nproc);
                Ok(())
            });
        }
    }
    #[cfg(not(unix))]
    let _ = profile;
}

/// SIGTERM the child's whole process group (it called setsid).
fn terminate_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

/// Map the child's exit to a [`ToolResult`], parsing the serialised result
/// from stdout when one is expected.
fn interpret_exit(
    code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
    timeout_secs: u64,
) -> Result<ToolResult, SandboxError> {
    match code {
        Some(exit_codes::SUCCESS) | Some(exit_codes::TOOL_FAILED) => {
            let text = String::from_utf8_lossy(stdout);
            // The result is the last non-empty stdout line; tools may print
            // above it.
            let last_line = text.lines().rev().find(|l| !l.trim().is_empty());
            match last_line
                .and_then(|line| serde_json::from_str::<Value>(line).ok())
                .and_then(|v| ToolResult::from_serialized(&v).ok())
            {
                Some(result) => Ok(result),
                None => Ok(ToolResult::error(
                    format!(
                        "tool produced no parseable result (stderr: {})",
                        String::from_utf8_lossy(stderr).trim()
                    ),
                    error_codes::SYSTEM_ERROR,
                )),
            }
        }
        Some(exit_codes::INPUT_DECODE_FAILED) => Ok(ToolResult::error(
            "tool runner could not decode its inputs",
            error_codes::SYSTEM_ERROR,
        )),
        Some(exit_codes::TIMEOUT) => Err(SandboxError::Timeout(timeout_secs)),
        Some(exit_codes::KILLED_BY_PARENT) => Err(SandboxError::Timeout(timeout_secs)),
        Some(other) => Err(SandboxError::Killed(format!(
            "exit code {other} (stderr: {})",
            String::from_utf8_lossy(stderr).trim()
        ))),
        // Terminated by signal — most likely an rlimit (SIGKILL from the
        // kernel) or an operator action.
        None => Err(SandboxError::Killed("terminated by signal".to_string())),
    }
}

/// Fold every file found under `output/` into the result as an
/// artifact-disposition [`DataObject`]. Objects the tool returned itself
/// win on name collision.
pub fn harvest_output_artifacts(result: &mut ToolResult, output_dir: &Path) {
    if !output_dir.is_dir() {
        return;
    }
    let existing: std::collections::HashSet<String> =
        result.data_objects.iter().map(|o| o.name.clone()).collect();

    let mut harvested = Vec::new();
    for entry in walkdir::WalkDir::new(output_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(rel) = entry.path().strip_prefix(output_dir) else {
            continue;
        };
        let name = rel.to_string_lossy().into_owned();
        if existing.contains(&name) {
            debug!(name, "tool-returned object shadows harvested file");
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        let mime = mime_guess::from_path(entry.path())
            .first_raw()
            .unwrap_or("application/octet-stream");
        harvested.push(
            DataObject::bytes(name, &bytes, mime).with_disposition(DataDisposition::Artifact),
        );
    }
    harvested.sort_by(|a, b| a.name.cmp(&b.name));
    result.data_objects.extend(harvested);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(max_concurrent: usize) -> SandboxRunner {
        let tmp = tempfile::tempdir().unwrap();
        SandboxRunner::new(SandboxConfig {
            work_base_dir: tmp.path().to_string_lossy().into_owned(),
            max_concurrent_executions: max_concurrent,
            ..Default::default()
        })
    }

    #[test]
    fn semaphore_matches_config() {
        assert_eq!(runner(7).available_slots(), 7);
        assert_eq!(runner(2).available_slots(), 2);
    }

    #[test]
    fn interpret_success_parses_last_stdout_line() {
        let stdout = b"some tool chatter\n{\"status\":\"success\",\"message\":\"ok\"}\n";
        let result = interpret_exit(Some(0), stdout, b"", 60).unwrap();
        assert_eq!(result.status, mycel_tools::ToolStatus::Success);
        assert_eq!(result.message.as_deref(), Some("ok"));
    }

    #[test]
    fn interpret_tool_failure_parses_error_result() {
        let stdout = b"{\"status\":\"error\",\"message\":\"bad input\",\"error_code\":\"SYSTEM_ERROR\"}\n";
        let result = interpret_exit(Some(1), stdout, b"", 60).unwrap();
        assert!(result.is_error());
        assert_eq!(result.message.as_deref(), Some("bad input"));
    }

    #[test]
    fn interpret_garbage_stdout_is_system_error() {
        let result = interpret_exit(Some(0), b"not json", b"boom", 60).unwrap();
        assert!(result.is_error());
        assert_eq!(result.error_code.as_deref(), Some(error_codes::SYSTEM_ERROR));
    }

    #[test]
    fn interpret_decode_failure() {
        let result = interpret_exit(Some(2), b"", b"", 60).unwrap();
        assert!(result.is_error());
    }

    #[test]
    fn interpret_timeout_codes() {
        assert!(matches!(
            interpret_exit(Some(3), b"", b"", 30),
            Err(SandboxError::Timeout(30))
        ));
        assert!(matches!(
            interpret_exit(Some(124), b"", b"", 30),
            Err(SandboxError::Timeout(30))
        ));
    }

    #[test]
    fn interpret_signal_death_is_killed() {
        assert!(matches!(
            interpret_exit(None, b"", b"", 30),
            Err(SandboxError::Killed(_))
        ));
    }

    #[test]
    fn harvest_merges_with_tool_returned_winning() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("summary.txt"), b"from disk").unwrap();
        std::fs::write(tmp.path().join("extra.csv"), b"a,b\n").unwrap();

        let mut result = ToolResult::ok("done")
            .with_object(DataObject::text("summary.txt", "from tool"));
        harvest_output_artifacts(&mut result, tmp.path());

        // summary.txt: the tool's copy wins; extra.csv harvested as artifact.
        assert_eq!(result.data_objects.len(), 2);
        let summary = result
            .data_objects
            .iter()
            .find(|o| o.name == "summary.txt")
            .unwrap();
        assert_eq!(summary.content.as_text(), Some("from tool"));
        let extra = result.data_objects.iter().find(|o| o.name == "extra.csv").unwrap();
        assert_eq!(extra.disposition, DataDisposition::Artifact);
        assert_eq!(extra.mime_type, "text/csv");
        assert_eq!(extra.content.as_bytes(), b"a,b\n");
    }

    #[test]
    fn harvest_missing_output_dir_is_noop() {
        let mut result = ToolResult::ok("done");
        harvest_output_artifacts(&mut result, Path::new("/nonexistent/out"));
        assert!(result.data_objects.is_empty());
    }

    #[test]
    fn harvest_includes_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("charts")).unwrap();
        std::fs::write(tmp.path().join("charts/plot.png"), b"\x89PNG").unwrap();

        let mut result = ToolResult::ok("done");
        harvest_output_artifacts(&mut result, tmp.path());
        assert_eq!(result.data_objects.len(), 1);
        assert_eq!(result.data_objects[0].name, "charts/plot.png");
        assert_eq!(result.data_objects[0].mime_type, "image/png");
    }
}
