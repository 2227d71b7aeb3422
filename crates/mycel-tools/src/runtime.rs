// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use mycel_blob::{parse_artifact_filename, BlobError, ScopedArtifactService};

use crate::result::error_codes;
use crate::{
    Artifact, ArtifactValue, ToolContextFacade, ToolHandler, ToolInvocation, ToolRegistry,
    ToolResult,
};

/// Executes registered tools in-process with the full tool contract:
/// artifact pre-load, facade injection, worker-pool dispatch for blocking
/// handlers, and panic/error capture into error results.
pub struct ToolRuntime {
    registry: Arc<ToolRegistry>,
}

impl ToolRuntime {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run one tool call to completion. Never returns an `Err`: every
    /// failure mode is captured as an error [`ToolResult`] so the LLM can
    /// react instead of the task aborting.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        facade: Arc<ToolContextFacade>,
        artifacts: &ScopedArtifactService,
    ) -> ToolResult {
        let Some(spec) = self.registry.get(name) else {
            return ToolResult::error(format!("unknown tool: {name}"), error_codes::UNKNOWN_TOOL);
        };

        let resolved = match resolve_artifact_args(&spec.artifact_params, &args, artifacts).await {
            Ok(resolved) => resolved,
            Err(result) => return result,
        };

        let invocation = ToolInvocation {
            args,
            artifacts: resolved,
            ctx: spec.wants_context.then(|| Arc::clone(&facade)),
        };

        debug!(tool = %spec.name, blocking = spec.is_blocking(), "invoking tool");
        match &spec.handler {
            ToolHandler::Async(handler) => {
                let fut = handler(invocation);
                match tokio::spawn(fut).await {
                    Ok(result) => result,
                    Err(join_err) => {
                        error!(tool = name, error = %join_err, "async tool crashed");
                        ToolResult::error(
                            format!("tool '{name}' crashed: {join_err}"),
                            error_codes::SYSTEM_ERROR,
                        )
                    }
                }
            }
            ToolHandler::Blocking(handler) => {
                let handler = Arc::clone(handler);
                match tokio::task::spawn_blocking(move || handler(invocation)).await {
                    Ok(result) => result,
                    Err(join_err) => {
                        error!(tool = name, error = %join_err, "blocking tool crashed");
                        ToolResult::error(
                            format!("tool '{name}' crashed: {join_err}"),
                            error_codes::SYSTEM_ERROR,
                        )
                    }
                }
            }
        }
    }
}

/// Load every declared artifact parameter from the scoped service.
///
/// Each argument value is a filename literal, optionally `name:N` to pin a
/// version; list params take an array of such literals. Failures come back
/// as ready-made error results (`ARTIFACT_*` codes) — artifact problems are
/// tool errors, never task aborts.
pub async fn resolve_artifact_args(
    params: &[crate::ArtifactParam],
    args: &Value,
    artifacts: &ScopedArtifactService,
) -> Result<HashMap<String, ArtifactValue>, ToolResult> {
    let mut resolved = HashMap::new();
    for param in params {
        let Some(arg) = args.get(&param.name) else {
            return Err(ToolResult::error(
                format!("missing artifact parameter '{}'", param.name),
                error_codes::ARTIFACT_NOT_FOUND,
            ));
        };
        if param.is_list {
            let Some(names) = arg.as_array() else {
                return Err(ToolResult::error(
                    format!("artifact parameter '{}' expects a list of filenames", param.name),
                    error_codes::ARTIFACT_NOT_FOUND,
                ));
            };
            let mut loaded = Vec::with_capacity(names.len());
            for name in names {
                let Some(name) = name.as_str() else {
                    return Err(ToolResult::error(
                        format!("artifact parameter '{}' contains a non-string entry", param.name),
                        error_codes::ARTIFACT_NOT_FOUND,
                    ));
                };
                loaded.push(load_one(name, artifacts).await?);
            }
            resolved.insert(param.name.clone(), ArtifactValue::Many(loaded));
        } else {
            let Some(name) = arg.as_str() else {
                return Err(ToolResult::error(
                    format!("artifact parameter '{}' expects a filename string", param.name),
                    error_codes::ARTIFACT_NOT_FOUND,
                ));
            };
            resolved.insert(
                param.name.clone(),
                ArtifactValue::Single(load_one(name, artifacts).await?),
            );
        }
    }
    Ok(resolved)
}

async fn load_one(
    name: &str,
    artifacts: &ScopedArtifactService,
) -> Result<Artifact, ToolResult> {
    let (base, selector) = parse_artifact_filename(name);
    match artifacts.load_artifact(base, selector).await {
        Ok(loaded) => Ok(Artifact {
            filename: loaded.filename,
            version: loaded.version,
            mime_type: loaded.meta.mime_type,
            bytes: loaded.bytes,
            metadata: loaded.meta.metadata,
        }),
        Err(BlobError::NotFound(_)) => Err(ToolResult::error(
            format!("artifact not found: {name}"),
            error_codes::ARTIFACT_NOT_FOUND,
        )),
        Err(BlobError::Permission(reason)) => Err(ToolResult::error(
            format!("artifact access denied: {reason}"),
            error_codes::ARTIFACT_PERMISSION,
        )),
        Err(e) => Err(ToolResult::error(
            format!("artifact load failed: {e}"),
            error_codes::SYSTEM_ERROR,
        )),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataObject, ToolSpec};
    use mycel_blob::{ArtifactStore, MemoryBlobStore};
    use serde_json::json;

    fn scoped() -> ScopedArtifactService {
        let store = ArtifactStore::new(Arc::new(MemoryBlobStore::new()));
        ScopedArtifactService::new(store, "app", "u1", "s1")
    }

    fn runtime_with(spec: ToolSpec) -> ToolRuntime {
        let mut registry = ToolRegistry::new();
        registry.register(spec);
        ToolRuntime::new(Arc::new(registry))
    }

    fn facade() -> Arc<ToolContextFacade> {
        Arc::new(ToolContextFacade::new("app", "u1", "s1"))
    }

    // The scenario tool: counts characters, words and lines of its input
    // and returns a summary artifact plus statistics.
    fn process_file_spec() -> ToolSpec {
        ToolSpec::builder("process_file")
            .description("Count characters, words and lines of a text file")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "input_file": { "type": "object", "description": "File to process" }
                },
                "required": ["input_file"]
            }))
            .artifact_param("input_file", false)
            .with_context()
            .handler_async(|inv| async move {
                let Some(input) = inv.artifact("input_file") else {
                    return ToolResult::error("no input", error_codes::ARTIFACT_NOT_FOUND);
                };
                if let Some(ctx) = &inv.ctx {
                    ctx.send_status("Processing file...");
                }
                let text = input.as_text();
                let characters = text.chars().count();
                let words = text.split_whitespace().count();
                let lines = text.lines().count();
                let summary = format!(
                    "Processed '{}': {characters} characters, {words} words, {lines} lines\n",
                    input.filename
                );
                ToolResult::ok("Processing complete")
                    .with_data(json!({
                        "statistics": {
                            "characters": characters,
                            "words": words,
                            "lines": lines,
                        }
                    }))
                    .with_object(DataObject::text("processing_summary.txt", summary))
            })
    }

    #[tokio::test]
    async fn happy_path_counts_match() {
        let artifacts = scoped();
        let content = "This is a test file for the portable process_file tool.\n\
                       It contains multiple lines of text that will be analyzed.\n\
                       The tool should count characters, words, and lines.\n\
                       It demonstrates Artifact type annotation injection.\n\
                       Line five is here.\n\
                       Line six follows.\n\
                       And finally, line seven.";
        artifacts
            .save_artifact("test_input.txt", content.as_bytes().to_vec(), "text/plain", Default::default())
            .await
            .unwrap();

        let runtime = runtime_with(process_file_spec());
        let result = runtime
            .invoke(
                "process_file",
                json!({"input_file": "test_input.txt"}),
                facade(),
                &artifacts,
            )
            .await;

        assert_eq!(result.status, crate::ToolStatus::Success);
        let stats = &result.data.as_ref().unwrap()["statistics"];
        assert_eq!(stats["lines"], 7);
        assert_eq!(stats["words"], content.split_whitespace().count());
        assert_eq!(stats["characters"], content.chars().count());
        assert_eq!(result.data_objects.len(), 1);
        assert_eq!(result.data_objects[0].name, "processing_summary.txt");
    }

    #[tokio::test]
    async fn versioned_filename_selects_exact_version() {
        let artifacts = scoped();
        artifacts
            .save_artifact("f.txt", b"old".to_vec(), "text/plain", Default::default())
            .await
            .unwrap();
        artifacts
            .save_artifact("f.txt", b"new content".to_vec(), "text/plain", Default::default())
            .await
            .unwrap();

        let spec = ToolSpec::builder("peek")
            .artifact_param("input_file", false)
            .handler_blocking(|inv| {
                let input = inv.artifact("input_file").unwrap();
                ToolResult::ok(input.as_text()).with_data(json!({"version": input.version}))
            });
        let runtime = runtime_with(spec);

        let result = runtime
            .invoke("peek", json!({"input_file": "f.txt:0"}), facade(), &artifacts)
            .await;
        assert_eq!(result.message.as_deref(), Some("old"));
        assert_eq!(result.data.unwrap()["version"], 0);

        let result = runtime
            .invoke("peek", json!({"input_file": "f.txt"}), facade(), &artifacts)
            .await;
        assert_eq!(result.data.unwrap()["version"], 1);
    }

    #[tokio::test]
    async fn missing_artifact_is_tool_error_not_abort() {
        let runtime = runtime_with(process_file_spec());
        let result = runtime
            .invoke(
                "process_file",
                json!({"input_file": "ghost.txt"}),
                facade(),
                &scoped(),
            )
            .await;
        assert!(result.is_error());
        assert_eq!(result.error_code.as_deref(), Some(error_codes::ARTIFACT_NOT_FOUND));
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let runtime = runtime_with(process_file_spec());
        let result = runtime
            .invoke("nope", json!({}), facade(), &scoped())
            .await;
        assert!(result.is_error());
        assert_eq!(result.error_code.as_deref(), Some(error_codes::UNKNOWN_TOOL));
    }

    #[tokio::test]
    async fn list_artifact_param_loads_all() {
        let artifacts = scoped();
        for (name, content) in [("a.txt", "aa"), ("b.txt", "bbb")] {
            artifacts
                .save_artifact(name, content.as_bytes().to_vec(), "text/plain", Default::default())
                .await
                .unwrap();
        }
        let spec = ToolSpec::builder("concat")
            .artifact_param("inputs", true)
            .handler_blocking(|inv| {
                let combined: String = inv
                    .artifact_list("inputs")
                    .iter()
                    .map(|a| a.as_text())
                    .collect();
                ToolResult::ok(combined)
            });
        let runtime = runtime_with(spec);
        let result = runtime
            .invoke("concat", json!({"inputs": ["a.txt", "b.txt"]}), facade(), &artifacts)
            .await;
        assert_eq!(result.message.as_deref(), Some("aabbb"));
    }

    #[tokio::test]
    async fn panicking_tool_becomes_system_error() {
        let spec = ToolSpec::builder("boom").handler_blocking(|_| panic!("kaboom"));
        let runtime = runtime_with(spec);
        let result = runtime.invoke("boom", json!({}), facade(), &scoped()).await;
        assert!(result.is_error());
        assert_eq!(result.error_code.as_deref(), Some(error_codes::SYSTEM_ERROR));
    }

    #[tokio::test]
    async fn context_only_injected_when_declared() {
        let spec = ToolSpec::builder("no_ctx").handler_blocking(|inv| {
            ToolResult::ok("").with_data(json!({"has_ctx": inv.ctx.is_some()}))
        });
        let runtime = runtime_with(spec);
        let result = runtime.invoke("no_ctx", json!({}), facade(), &scoped()).await;
        assert_eq!(result.data.unwrap()["has_ctx"], false);
    }
}
