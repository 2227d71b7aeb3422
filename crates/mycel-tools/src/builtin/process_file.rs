// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::json;

use crate::{error_codes, DataObject, ToolResult, ToolSpec};

/// Text-statistics tool: counts characters, words and lines of an input
/// artifact and produces a summary artifact plus structured totals.
///
/// Deliberately environment-agnostic — the same spec runs in-process or
/// sandboxed, which makes it the canonical smoke test for both paths.
pub fn process_file_tool() -> ToolSpec {
    ToolSpec::builder("process_file")
        .description(
            "Process a text file and report statistics: character, word and \
             line counts. Produces a processing_summary.txt artifact.",
        )
        .parameters(json!({
            "type": "object",
            "properties": {
                "input_file": {
                    "type": "object",
                    "description": "The file to process (filename, optionally name:version)"
                }
            },
            "required": ["input_file"]
        }))
        .artifact_param("input_file", false)
        .with_context()
        .parallel_safe()
        .handler_async(|inv| async move {
            let Some(input) = inv.artifact("input_file") else {
                return ToolResult::error(
                    "input_file artifact missing",
                    error_codes::ARTIFACT_NOT_FOUND,
                );
            };
            if let Some(ctx) = &inv.ctx {
                ctx.send_status(format!("Processing {}...", input.filename));
            }

            let text = input.as_text();
            let characters = text.chars().count();
            let words = text.split_whitespace().count();
            let lines = text.lines().count();

            let summary = format!(
                "Processed '{}' (version {})\ncharacters: {characters}\nwords: {words}\nlines: {lines}\n",
                input.filename, input.version
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

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Artifact, ArtifactValue, ToolHandler, ToolInvocation};
    use std::collections::HashMap;

    fn invoke_with(text: &str) -> ToolResult {
        let spec = process_file_tool();
        let ToolHandler::Async(handler) = &spec.handler else {
            panic!("process_file is async");
        };
        let mut artifacts = HashMap::new();
        artifacts.insert(
            "input_file".to_string(),
            ArtifactValue::Single(Artifact {
                filename: "test_input.txt".into(),
                version: 0,
                mime_type: "text/plain".into(),
                bytes: text.as_bytes().to_vec(),
                metadata: HashMap::new(),
            }),
        );
        let invocation = ToolInvocation {
            args: json!({"input_file": "test_input.txt"}),
            artifacts,
            ctx: None,
        };
        futures_executor(handler(invocation))
    }

    fn futures_executor<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn counts_seven_line_fixture() {
        let text = "This is a test file for the portable process_file tool.\n\
                    It contains multiple lines of text that will be analyzed.\n\
                    The tool should count characters, words, and lines.\n\
                    It demonstrates Artifact type annotation injection.\n\
                    Line five is here.\n\
                    Line six follows.\n\
                    And finally, line seven.";
        let result = invoke_with(text);
        assert_eq!(result.status, crate::ToolStatus::Success);
        let stats = &result.data.as_ref().unwrap()["statistics"];
        assert_eq!(stats["lines"], 7);
        assert_eq!(stats["characters"], text.chars().count());
        assert_eq!(stats["words"], text.split_whitespace().count());
    }

    #[test]
    fn produces_summary_artifact() {
        let result = invoke_with("one two three\n");
        assert_eq!(result.data_objects.len(), 1);
        let summary = &result.data_objects[0];
        assert_eq!(summary.name, "processing_summary.txt");
        assert!(summary.content.as_text().unwrap().contains("words: 3"));
    }

    #[test]
    fn empty_file_counts_zero() {
        let result = invoke_with("");
        let stats = &result.data.as_ref().unwrap()["statistics"];
        assert_eq!(stats["characters"], 0);
        assert_eq!(stats["words"], 0);
        assert_eq!(stats["lines"], 0);
    }

    #[test]
    fn missing_artifact_is_error() {
        let spec = process_file_tool();
        let ToolHandler::Async(handler) = &spec.handler else {
            panic!();
        };
        let invocation = ToolInvocation {
            args: json!({}),
            artifacts: HashMap::new(),
            ctx: None,
        };
        let result = futures_executor(handler(invocation));
        assert!(result.is_error());
    }
}
