// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single content part in an A2A message.
///
/// The `kind` tag is the wire discriminator. Only the three canonical forms
/// exist; anything else fails deserialisation and is treated as malformed
/// traffic by the receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    File { file: FileContent },
    Data { data: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn data(data: Value) -> Self {
        Self::Data { data }
    }

    /// File part carrying inline bytes (base64 on the wire).
    pub fn file_from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self::File {
            file: FileContent {
                name: Some(name.into()),
                mime_type: Some(mime_type.into()),
                uri: None,
                bytes: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            },
        }
    }

    /// File part referencing external content by URI.
    pub fn file_from_uri(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self::File {
            file: FileContent {
                name: Some(name.into()),
                mime_type: Some(mime_type.into()),
                uri: Some(uri.into()),
                bytes: None,
            },
        }
    }
}

/// File payload of a [`Part::File`]. Exactly one of `uri` / `bytes` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Base64-encoded inline content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
}

impl FileContent {
    /// Decode the inline bytes, if present and valid base64.
    pub fn decoded_bytes(&self) -> Option<Vec<u8>> {
        self.bytes
            .as_deref()
            .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// An A2A message: an ordered list of parts with routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl Message {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            task_id: None,
            context_id: None,
        }
    }

    pub fn agent(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Agent,
            parts,
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            task_id: None,
            context_id: None,
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::agent(vec![Part::text(text)])
    }
}

/// Combine the text and file descriptions of `parts` into one display string.
///
/// Data parts are intentionally ignored — they carry structured payloads
/// meant for programs, not transcripts.
pub fn text_from_parts(parts: &[Part]) -> String {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Part::Text { text } => out.push(text.clone()),
            Part::Data { .. } => continue,
            Part::File { file } => {
                let mut info = format!(
                    "File: '{}' ({})",
                    file.name.as_deref().unwrap_or("unknown"),
                    file.mime_type.as_deref().unwrap_or("unknown"),
                );
                if let Some(uri) = &file.uri {
                    info.push_str(&format!(" URI: {uri}"));
                } else if let Some(decoded) = file.decoded_bytes() {
                    info.push_str(&format!(" (Size: {} bytes)", decoded.len()));
                } else if file.bytes.is_some() {
                    info.push_str(" (Encoded Bytes)");
                }
                out.push(info);
            }
        }
    }
    out.join("\n")
}

/// Return a copy of `message` with oversized inline file bytes replaced by a
/// placeholder. Used before writing messages into task logs so a single
/// upload cannot bloat the log store.
pub fn strip_large_file_bytes(message: &Message, threshold_bytes: usize) -> Message {
    let mut sanitized = message.clone();
    for part in &mut sanitized.parts {
        if let Part::File { file } = part {
            let too_big = file
                .decoded_bytes()
                .map(|b| b.len() > threshold_bytes)
                .unwrap_or(false);
            if too_big {
                file.bytes = Some(String::new());
                file.uri = Some(format!(
                    "stripped://{}",
                    file.name.as_deref().unwrap_or("unnamed")
                ));
            }
        }
    }
    sanitized
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_wire_tags() {
        let p = Part::text("hi");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["kind"], "text");
        assert_eq!(v["text"], "hi");

        let p = Part::data(json!({"a": 1}));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["kind"], "data");
        assert_eq!(v["data"]["a"], 1);
    }

    #[test]
    fn file_bytes_round_trip() {
        let p = Part::file_from_bytes("a.bin", "application/octet-stream", &[0, 1, 2]);
        if let Part::File { file } = &p {
            assert_eq!(file.decoded_bytes().unwrap(), vec![0, 1, 2]);
        } else {
            panic!("not a file part");
        }
        let json = serde_json::to_string(&p).unwrap();
        let back: Part = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let r: Result<Part, _> = serde_json::from_str(r#"{"kind":"video","uri":"x"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn text_extraction_skips_data_parts() {
        let parts = vec![
            Part::text("hello"),
            Part::data(json!({"skip": true})),
            Part::file_from_uri("f.txt", "text/plain", "blob://f"),
        ];
        let text = text_from_parts(&parts);
        assert!(text.contains("hello"));
        assert!(text.contains("File: 'f.txt'"));
        assert!(!text.contains("skip"));
    }

    #[test]
    fn large_file_bytes_are_stripped() {
        let msg = Message::user(vec![Part::file_from_bytes(
            "big.bin",
            "application/octet-stream",
            &vec![7u8; 64],
        )]);
        let out = strip_large_file_bytes(&msg, 16);
        if let Part::File { file } = &out.parts[0] {
            assert_eq!(file.bytes.as_deref(), Some(""));
            assert_eq!(file.uri.as_deref(), Some("stripped://big.bin"));
        } else {
            panic!("not a file part");
        }
        // Original untouched.
        if let Part::File { file } = &msg.parts[0] {
            assert_eq!(file.decoded_bytes().unwrap().len(), 64);
        }
    }

    #[test]
    fn small_file_bytes_survive() {
        let msg = Message::user(vec![Part::file_from_bytes("s.txt", "text/plain", b"ok")]);
        let out = strip_large_file_bytes(&msg, 16);
        assert_eq!(out, msg);
    }
}
