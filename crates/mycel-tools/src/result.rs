// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Stable machine-readable error codes surfaced to the LLM in error results.
pub mod error_codes {
    pub const PEER_TIMEOUT: &str = "PEER_TIMEOUT";
    pub const PEER_PUBLISH_FAILED: &str = "PEER_PUBLISH_FAILED";
    pub const SANDBOX_TIMEOUT: &str = "SANDBOX_TIMEOUT";
    pub const SANDBOX_KILLED: &str = "SANDBOX_KILLED";
    pub const SANDBOX_RESOURCE_EXCEEDED: &str = "SANDBOX_RESOURCE_EXCEEDED";
    pub const ARTIFACT_NOT_FOUND: &str = "ARTIFACT_NOT_FOUND";
    pub const ARTIFACT_PERMISSION: &str = "ARTIFACT_PERMISSION";
    pub const SYSTEM_ERROR: &str = "SYSTEM_ERROR";
    pub const UNKNOWN_TOOL: &str = "UNKNOWN_TOOL";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    /// Some of the requested work finished; `data_objects` carries what did.
    Partial,
    Error,
}

/// What the runtime should do with a returned [`DataObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDisposition {
    /// Runtime decides by size and mime type.
    #[default]
    Auto,
    /// Embed directly in the status/result message.
    Inline,
    /// Persist as a versioned artifact.
    Artifact,
    /// Persist as an artifact and embed `preview` inline.
    ArtifactWithPreview,
}

/// Content of a data object: UTF-8 text or raw bytes (base64 on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataContent {
    Text(String),
    Bytes { encoding: String, data: String },
}

impl DataContent {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Bytes {
            encoding: "base64".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Self::Text(t) => t.as_bytes().to_vec(),
            Self::Bytes { data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data)
                .unwrap_or_default(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Bytes { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Bytes { data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map(|b| b.len())
                .unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for DataContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for DataContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A named output produced by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub name: String,
    pub content: DataContent,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub disposition: DataDisposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

impl DataObject {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: DataContent::Text(content.into()),
            mime_type: default_mime_type(),
            disposition: DataDisposition::default(),
            description: None,
            preview: None,
            metadata: HashMap::new(),
        }
    }

    pub fn bytes(name: impl Into<String>, bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: DataContent::from_bytes(bytes),
            mime_type: mime_type.into(),
            disposition: DataDisposition::default(),
            description: None,
            preview: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_disposition(mut self, disposition: DataDisposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The uniform result of every tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_objects: Vec<DataObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            message: Some(message.into()),
            data: None,
            data_objects: Vec::new(),
            error_code: None,
        }
    }

    pub fn partial(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Partial,
            message: Some(message.into()),
            data: None,
            data_objects: Vec::new(),
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>, error_code: &str) -> Self {
        Self {
            status: ToolStatus::Error,
            message: Some(message.into()),
            data: None,
            data_objects: Vec::new(),
            error_code: Some(error_code.to_string()),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_object(mut self, object: DataObject) -> Self {
        self.data_objects.push(object);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Serialise to the JSON dict shape that crosses process and wire
    /// boundaries (sandbox stdout, peer results, checkpoint rows).
    pub fn serialize_result(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "status": "error",
                "message": "unserialisable tool result",
                "error_code": error_codes::SYSTEM_ERROR,
            })
        })
    }

    pub fn from_serialized(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disposition_values_on_the_wire() {
        assert_eq!(serde_json::to_string(&DataDisposition::Auto).unwrap(), "\"auto\"");
        assert_eq!(
            serde_json::to_string(&DataDisposition::ArtifactWithPreview).unwrap(),
            "\"artifact_with_preview\""
        );
        assert_eq!(serde_json::to_string(&DataDisposition::Inline).unwrap(), "\"inline\"");
        assert_eq!(serde_json::to_string(&DataDisposition::Artifact).unwrap(), "\"artifact\"");
    }

    #[test]
    fn data_object_defaults() {
        let obj = DataObject::text("test.txt", "content");
        assert_eq!(obj.disposition, DataDisposition::Auto);
        assert_eq!(obj.mime_type, "text/plain");
        assert!(obj.description.is_none());
        assert!(obj.preview.is_none());
    }

    #[test]
    fn bytes_content_round_trips_base64() {
        let obj = DataObject::bytes("b.bin", &[0, 1, 2, 3], "application/octet-stream");
        let json = serde_json::to_string(&obj).unwrap();
        let back: DataObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content.as_bytes(), vec![0, 1, 2, 3]);
        assert_eq!(back.content.len(), 4);
    }

    #[test]
    fn text_content_parses_from_plain_string() {
        let obj: DataObject =
            serde_json::from_value(json!({"name": "t", "content": "hello"})).unwrap();
        assert_eq!(obj.content.as_text(), Some("hello"));
    }

    #[test]
    fn serialize_result_has_status_string() {
        let result = ToolResult::ok("Done").with_data(json!({"statistics": {"lines": 7}}));
        let v = result.serialize_result();
        assert_eq!(v["status"], "success");
        assert_eq!(v["message"], "Done");
        assert_eq!(v["data"]["statistics"]["lines"], 7);
    }

    #[test]
    fn error_result_carries_code() {
        let result = ToolResult::error("deadline expired", error_codes::PEER_TIMEOUT);
        assert!(result.is_error());
        let v = result.serialize_result();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error_code"], "PEER_TIMEOUT");
    }

    #[test]
    fn round_trip_through_serialized_form() {
        let result = ToolResult::partial("half done")
            .with_object(DataObject::text("a.txt", "A").with_disposition(DataDisposition::Artifact))
            .with_object(DataObject::bytes("b.bin", b"BB", "application/octet-stream"));
        let back = ToolResult::from_serialized(&result.serialize_result()).unwrap();
        assert_eq!(back, result);
    }
}
