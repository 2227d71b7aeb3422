// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// JSON-RPC 2.0 internal-error code; the only error code the core emits.
pub const INTERNAL_ERROR: i64 = -32603;

/// Methods the task engine handles.
pub const METHOD_MESSAGE_SEND: &str = "message/send";
pub const METHOD_MESSAGE_STREAM: &str = "message/stream";
pub const METHOD_TASKS_CANCEL: &str = "tasks/cancel";

/// JSON-RPC request ids may be strings or numbers; both must round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl From<&str> for RpcId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: Option<RpcId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params: Some(params),
        }
    }

    /// Parse raw broker bytes into a request, rejecting anything that is not
    /// a JSON-RPC 2.0 request envelope.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let req: Self = serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if req.jsonrpc != "2.0" {
            return Err(ProtocolError::Malformed(format!(
                "unsupported jsonrpc version: {}",
                req.jsonrpc
            )));
        }
        Ok(req)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Internal error tagged with the task it belongs to, so gateways can
    /// route the failure without parsing the message text.
    pub fn internal(message: impl Into<String>, task_id: &str) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
            data: Some(serde_json::json!({ "taskId": task_id })),
        }
    }
}

/// A response envelope: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn result(id: Option<RpcId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let resp: Self = serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if resp.jsonrpc != "2.0" {
            return Err(ProtocolError::Malformed(format!(
                "unsupported jsonrpc version: {}",
                resp.jsonrpc
            )));
        }
        Ok(resp)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
