// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A pre-loaded artifact handed to a tool.
///
/// Tools declare artifact parameters in their [`crate::ToolSpec`]; the
/// runtime resolves the LLM-provided filename (optionally `name:N`) against
/// the scoped artifact service and substitutes one of these before the tool
/// runs. Tools never talk to blob storage for their inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub version: u64,
    pub mime_type: String,
    #[serde(with = "bytes_base64")]
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Artifact {
    /// Interpret the content as UTF-8 text (lossy).
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Inline bytes travel base64-encoded (artifact payloads cross the sandbox
/// invocation-spec boundary as JSON).
mod bytes_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_text_decodes_utf8() {
        let artifact = Artifact {
            filename: "notes.txt".into(),
            version: 0,
            mime_type: "text/plain".into(),
            bytes: b"hello world".to_vec(),
            metadata: HashMap::new(),
        };
        assert_eq!(artifact.as_text(), "hello world");
        assert_eq!(artifact.size_bytes(), 11);
    }

    #[test]
    fn bytes_round_trip_as_base64() {
        let artifact = Artifact {
            filename: "img.png".into(),
            version: 2,
            mime_type: "image/png".into(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
            metadata: HashMap::new(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["bytes"], "iVBORw==");
        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }
}
