// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::{Artifact, ToolContextFacade, ToolResult};

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// An artifact-typed parameter as declared in the tool spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactParam {
    pub name: String,
    pub is_list: bool,
}

/// A resolved artifact argument: single or list, matching the declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactValue {
    Single(Artifact),
    Many(Vec<Artifact>),
}

impl ArtifactValue {
    pub fn single(&self) -> Option<&Artifact> {
        match self {
            Self::Single(a) => Some(a),
            Self::Many(_) => None,
        }
    }

    pub fn many(&self) -> &[Artifact] {
        match self {
            Self::Single(a) => std::slice::from_ref(a),
            Self::Many(v) => v,
        }
    }
}

/// Everything a tool receives for one call.
pub struct ToolInvocation {
    /// The LLM-provided arguments (artifact params still present as the
    /// original string values).
    pub args: Value,
    /// Resolved artifact parameters, keyed by parameter name.
    pub artifacts: HashMap<String, ArtifactValue>,
    /// The context facade; present iff the spec declared `wants_context`.
    pub ctx: Option<Arc<ToolContextFacade>>,
}

impl ToolInvocation {
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name).and_then(|v| v.single())
    }

    pub fn artifact_list(&self, name: &str) -> &[Artifact] {
        self.artifacts.get(name).map(|v| v.many()).unwrap_or(&[])
    }
}

/// The tool body as a tagged variant: the runtime dispatches `Blocking`
/// handlers to the worker pool and `Async` handlers on the event loop —
/// decided once at registration, never per call.
#[derive(Clone)]
pub enum ToolHandler {
    Async(Arc<dyn Fn(ToolInvocation) -> ToolFuture + Send + Sync>),
    Blocking(Arc<dyn Fn(ToolInvocation) -> ToolResult + Send + Sync>),
}

/// Where the tool body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolLocation {
    #[default]
    InProcess,
    /// Executed by the sandbox runner in an isolated OS process.
    Sandbox,
}

/// A registered tool: declared schema plus execution metadata.
///
/// Schemas are plain data declared at registration; there is no runtime
/// function introspection. The LLM-visible schema is derived once in
/// [`ToolSpec::llm_parameters`], with artifact params exposed as strings.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Full JSON-Schema of the parameters as the tool sees them.
    pub parameters: Value,
    pub artifact_params: Vec<ArtifactParam>,
    pub wants_context: bool,
    /// Parallel-safe tools may run concurrently within one task; others are
    /// serialised by a per-task lock.
    pub parallel_safe: bool,
    pub location: ToolLocation,
    /// Sandbox profile override; `None` uses the runner's default.
    pub sandbox_profile: Option<String>,
    pub handler: ToolHandler,
}

impl ToolSpec {
    pub fn builder(name: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            artifact_params: Vec::new(),
            wants_context: false,
            parallel_safe: false,
            location: ToolLocation::InProcess,
            sandbox_profile: None,
        }
    }

    /// The schema exposed to the LLM.
    ///
    /// Artifact parameters are surfaced as STRING (or ARRAY-of-STRING for
    /// lists) — the model passes filenames, optionally `name:version`, and
    /// the runtime substitutes loaded [`Artifact`] values before the call.
    pub fn llm_parameters(&self) -> Value {
        let mut schema = self.parameters.clone();
        if let Some(props) = schema
            .get_mut("properties")
            .and_then(|p| p.as_object_mut())
        {
            for param in &self.artifact_params {
                let description = props
                    .get(&param.name)
                    .and_then(|p| p.get("description"))
                    .cloned();
                let mut replacement = if param.is_list {
                    serde_json::json!({
                        "type": "array",
                        "items": { "type": "string" }
                    })
                } else {
                    serde_json::json!({ "type": "string" })
                };
                if let Some(desc) = description {
                    replacement["description"] = desc;
                }
                props.insert(param.name.clone(), replacement);
            }
        }
        schema
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.handler, ToolHandler::Blocking(_))
    }
}

pub struct ToolSpecBuilder {
    name: String,
    description: String,
    parameters: Value,
    artifact_params: Vec<ArtifactParam>,
    wants_context: bool,
    parallel_safe: bool,
    location: ToolLocation,
    sandbox_profile: Option<String>,
}

impl ToolSpecBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn artifact_param(mut self, name: impl Into<String>, is_list: bool) -> Self {
        self.artifact_params.push(ArtifactParam {
            name: name.into(),
            is_list,
        });
        self
    }

    pub fn with_context(mut self) -> Self {
        self.wants_context = true;
        self
    }

    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    pub fn sandboxed(mut self, profile: Option<&str>) -> Self {
        self.location = ToolLocation::Sandbox;
        self.sandbox_profile = profile.map(str::to_string);
        self
    }

    pub fn handler_async<F, Fut>(self, f: F) -> ToolSpec
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.finish(ToolHandler::Async(Arc::new(move |inv| Box::pin(f(inv)))))
    }

    pub fn handler_blocking<F>(self, f: F) -> ToolSpec
    where
        F: Fn(ToolInvocation) -> ToolResult + Send + Sync + 'static,
    {
        self.finish(ToolHandler::Blocking(Arc::new(f)))
    }

    fn finish(self, handler: ToolHandler) -> ToolSpec {
        ToolSpec {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            artifact_params: self.artifact_params,
            wants_context: self.wants_context,
            parallel_safe: self.parallel_safe,
            location: self.location,
            sandbox_profile: self.sandbox_profile,
            handler,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with_artifacts() -> ToolSpec {
        ToolSpec::builder("analyze")
            .description("Analyze input files")
            .parameters(json!({
                "type": "object",
                "properties": {
                    "input_file": {
                        "type": "object",
                        "description": "The file to analyze"
                    },
                    "references": { "type": "object" },
                    "mode": { "type": "string" }
                },
                "required": ["input_file"]
            }))
            .artifact_param("input_file", false)
            .artifact_param("references", true)
            .with_context()
            .handler_blocking(|_| ToolResult::ok("done"))
    }

    #[test]
    fn llm_schema_exposes_artifacts_as_strings() {
        let spec = spec_with_artifacts();
        let schema = spec.llm_parameters();
        assert_eq!(schema["properties"]["input_file"]["type"], "string");
        assert_eq!(
            schema["properties"]["input_file"]["description"],
            "The file to analyze"
        );
        assert_eq!(schema["properties"]["references"]["type"], "array");
        assert_eq!(schema["properties"]["references"]["items"]["type"], "string");
        // Non-artifact params untouched.
        assert_eq!(schema["properties"]["mode"]["type"], "string");
        // The declared (tool-side) schema is unchanged.
        assert_eq!(spec.parameters["properties"]["input_file"]["type"], "object");
    }

    #[test]
    fn handler_kind_is_declared_once() {
        let blocking = ToolSpec::builder("b").handler_blocking(|_| ToolResult::ok("x"));
        assert!(blocking.is_blocking());
        let async_spec =
            ToolSpec::builder("a").handler_async(|_| async { ToolResult::ok("y") });
        assert!(!async_spec.is_blocking());
    }

    #[test]
    fn artifact_value_views() {
        let artifact = Artifact {
            filename: "f".into(),
            version: 0,
            mime_type: "text/plain".into(),
            bytes: vec![],
            metadata: Default::default(),
        };
        let single = ArtifactValue::Single(artifact.clone());
        assert!(single.single().is_some());
        assert_eq!(single.many().len(), 1);
        let many = ArtifactValue::Many(vec![artifact.clone(), artifact]);
        assert!(many.single().is_none());
        assert_eq!(many.many().len(), 2);
    }

    #[test]
    fn defaults() {
        let spec = ToolSpec::builder("t").handler_blocking(|_| ToolResult::ok(""));
        assert_eq!(spec.location, ToolLocation::InProcess);
        assert!(!spec.parallel_safe);
        assert!(!spec.wants_context);
        assert!(spec.sandbox_profile.is_none());
    }
}
