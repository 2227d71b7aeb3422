// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The child half of the sandbox.
//!
//! Runs inside the isolated process. Reads the invocation spec written by
//! the parent, rebuilds the pre-loaded [`Artifact`] values from `input/`,
//! executes the tool from the same registry the in-process runtime uses,
//! streams status frames into the FIFO, writes artifact-destined outputs
//! into `output/`, and prints the serialised result on stdout. The exit
//! code is the parent's coarse signal (see [`crate::exit_codes`]).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mycel_tools::{
    error_codes, Artifact, ArtifactValue, DataDisposition, StatusSignal, ToolContextFacade,
    ToolHandler, ToolInvocation, ToolRegistry, ToolResult,
};

use crate::invocation::{exit_codes, ToolRunnerSpec};
use crate::stream::{StreamMessage, HEARTBEAT_INTERVAL};
use crate::workdir::safe_filename;

/// Entry point for the host binary's `tool-runner` subcommand.
/// Returns the process exit code.
pub async fn run(registry: Arc<ToolRegistry>, spec_path: &Path) -> i32 {
    let spec = match read_spec(spec_path) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("tool-runner: {e}");
            return exit_codes::INPUT_DECODE_FAILED;
        }
    };

    let Some(tool) = registry.get(&spec.tool_name) else {
        let result = ToolResult::error(
            format!("unknown tool: {}", spec.tool_name),
            error_codes::UNKNOWN_TOOL,
        );
        emit_result(&result);
        return exit_codes::TOOL_FAILED;
    };

    let artifacts = match build_artifact_values(&spec, &tool.artifact_params) {
        Ok(artifacts) => artifacts,
        Err(e) => {
            eprintln!("tool-runner: {e}");
            return exit_codes::INPUT_DECODE_FAILED;
        }
    };

    // ── Status streaming into the FIFO ───────────────────────────────────────
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let pipe_task = spawn_pipe_writer(spec.status_pipe(), status_rx).await;

    let facade = Arc::new(
        ToolContextFacade::new(&spec.app_name, &spec.user_id, &spec.session_id)
            .with_tool_config(spec.tool_config.clone())
            .with_status_sender(status_tx),
    );

    let invocation = ToolInvocation {
        args: spec.args.clone(),
        artifacts,
        ctx: tool.wants_context.then(|| Arc::clone(&facade)),
    };

    // ── Execute with the child-side wall clock ───────────────────────────────
    let handler = tool.handler.clone();
    let work = async move {
        match handler {
            ToolHandler::Async(f) => tokio::spawn(f(invocation)).await,
            ToolHandler::Blocking(f) => {
                tokio::task::spawn_blocking(move || f(invocation)).await
            }
        }
    };
    let mut result = match tokio::time::timeout(Duration::from_secs(spec.timeout_seconds), work)
        .await
    {
        Err(_) => {
            eprintln!("tool-runner: tool exceeded {}s", spec.timeout_seconds);
            return exit_codes::TIMEOUT;
        }
        Ok(Err(join_err)) => ToolResult::error(
            format!("tool crashed: {join_err}"),
            error_codes::SYSTEM_ERROR,
        ),
        Ok(Ok(result)) => result,
    };

    // ── Persist artifact-destined outputs ────────────────────────────────────
    if let Err(e) = extract_output_artifacts(&mut result, &spec.output_dir()) {
        warn!(error = %e, "output extraction failed");
        result = ToolResult::error(
            format!("could not write tool outputs: {e}"),
            error_codes::SYSTEM_ERROR,
        );
    }

    // Drop the facade so the pipe writer drains and closes.
    drop(facade);
    if let Some(task) = pipe_task {
        let _ = task.await;
    }

    emit_result(&result);
    if result.is_error() {
        exit_codes::TOOL_FAILED
    } else {
        exit_codes::SUCCESS
    }
}

fn read_spec(path: &Path) -> Result<ToolRunnerSpec, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("parsing {}: {e}", path.display()))
}

fn emit_result(result: &ToolResult) {
    println!("{}", result.serialize_result());
}

/// Rebuild the artifact parameter map from the descriptors and `input/`.
fn build_artifact_values(
    spec: &ToolRunnerSpec,
    declared: &[mycel_tools::ArtifactParam],
) -> Result<HashMap<String, ArtifactValue>, String> {
    let input_dir = spec.input_dir();
    let mut by_param: HashMap<String, Vec<Artifact>> = HashMap::new();
    for descriptor in &spec.artifacts {
        let path = safe_filename(&descriptor.file, &input_dir)
            .map_err(|e| format!("artifact '{}': {e}", descriptor.file))?;
        let bytes =
            std::fs::read(&path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        by_param.entry(descriptor.param.clone()).or_default().push(Artifact {
            filename: descriptor.filename.clone(),
            version: descriptor.version,
            mime_type: descriptor.mime_type.clone(),
            bytes,
            metadata: descriptor.metadata.clone(),
        });
    }

    let mut values = HashMap::new();
    for param in declared {
        let Some(mut loaded) = by_param.remove(&param.name) else {
            return Err(format!("missing pre-loaded artifact for '{}'", param.name));
        };
        let value = if param.is_list {
            ArtifactValue::Many(loaded)
        } else if loaded.len() == 1 {
            ArtifactValue::Single(loaded.remove(0))
        } else {
            return Err(format!(
                "parameter '{}' expects one artifact, got {}",
                param.name,
                loaded.len()
            ));
        };
        values.insert(param.name.clone(), value);
    }
    Ok(values)
}

/// Open the status FIFO and bridge facade signals into NDJSON frames.
/// While the tool is silent, a heartbeat frame goes out every
/// [`HEARTBEAT_INTERVAL`] to keep the reader side informed.
async fn spawn_pipe_writer(
    pipe_path: std::path::PathBuf,
    mut rx: mpsc::UnboundedReceiver<StatusSignal>,
) -> Option<tokio::task::JoinHandle<()>> {
    let mut sender = match tokio::net::unix::pipe::OpenOptions::new().open_sender(&pipe_path) {
        Ok(sender) => sender,
        Err(e) => {
            // No reader on the other side (or no pipe): statuses are
            // best-effort, keep running.
            warn!(error = %e, "status pipe not writable, statuses dropped");
            return None;
        }
    };
    Some(tokio::spawn(async move {
        let mut idle = tokio::time::interval(HEARTBEAT_INTERVAL);
        idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        idle.reset();
        loop {
            let frame = tokio::select! {
                signal = rx.recv() => match signal {
                    Some(StatusSignal::Status(message)) => StreamMessage::status(message),
                    Some(StatusSignal::Signal(data)) => {
                        StreamMessage::status(data.to_string())
                    }
                    None => return,
                },
                _ = idle.tick() => StreamMessage::heartbeat(),
            };
            idle.reset();
            if sender
                .write_all(frame.to_ndjson_line().as_bytes())
                .await
                .is_err()
            {
                debug!("status pipe reader gone");
                return;
            }
        }
    }))
}

/// Write every artifact-destined data object into `output/` and drop it
/// from the result; the parent harvests the files into versioned
/// artifacts. Inline objects stay in the result.
pub fn extract_output_artifacts(
    result: &mut ToolResult,
    output_dir: &Path,
) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let mut kept = Vec::new();
    for object in result.data_objects.drain(..) {
        if object.disposition == DataDisposition::Inline {
            kept.push(object);
            continue;
        }
        let Ok(path) = safe_filename(&object.name, output_dir) else {
            warn!(name = %object.name, "unsafe output name skipped");
            continue;
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, object.content.as_bytes())?;
    }
    result.data_objects = kept;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mycel_tools::DataObject;

    #[test]
    fn extract_writes_files_and_clears_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let mut result = ToolResult::ok("done")
            .with_object(DataObject::text("processing_summary.txt", "152 chars"));
        extract_output_artifacts(&mut result, tmp.path()).unwrap();

        assert!(result.data_objects.is_empty());
        let on_disk = std::fs::read_to_string(tmp.path().join("processing_summary.txt")).unwrap();
        assert_eq!(on_disk, "152 chars");
    }

    #[test]
    fn inline_objects_stay_in_result() {
        let tmp = tempfile::tempdir().unwrap();
        let mut result = ToolResult::ok("done")
            .with_object(
                DataObject::text("note.txt", "inline me")
                    .with_disposition(DataDisposition::Inline),
            )
            .with_object(DataObject::text("file.txt", "to disk"));
        extract_output_artifacts(&mut result, tmp.path()).unwrap();

        assert_eq!(result.data_objects.len(), 1);
        assert_eq!(result.data_objects[0].name, "note.txt");
        assert!(tmp.path().join("file.txt").exists());
        assert!(!tmp.path().join("note.txt").exists());
    }

    #[test]
    fn unsafe_output_names_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut result =
            ToolResult::ok("done").with_object(DataObject::text("../escape.txt", "nope"));
        extract_output_artifacts(&mut result, tmp.path()).unwrap();
        assert!(result.data_objects.is_empty());
        assert!(!tmp.path().join("../escape.txt").exists());
    }

    #[tokio::test]
    async fn missing_spec_file_is_decode_failure() {
        let registry = Arc::new(ToolRegistry::new());
        let code = run(registry, Path::new("/nonexistent/spec.json")).await;
        assert_eq!(code, exit_codes::INPUT_DECODE_FAILED);
    }

    #[tokio::test]
    async fn unknown_tool_fails_with_tool_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ToolRunnerSpec {
            task_id: "t".into(),
            tool_name: "ghost".into(),
            args: serde_json::json!({}),
            tool_config: HashMap::new(),
            app_name: "app".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            timeout_seconds: 5,
            work_dir: tmp.path().to_path_buf(),
            artifacts: vec![],
        };
        let spec_path = tmp.path().join("invocation.json");
        std::fs::write(&spec_path, serde_json::to_vec(&spec).unwrap()).unwrap();

        let registry = Arc::new(ToolRegistry::new());
        let code = run(registry, &spec_path).await;
        assert_eq!(code, exit_codes::TOOL_FAILED);
    }
}
