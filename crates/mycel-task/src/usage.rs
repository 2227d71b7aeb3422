// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One bucket of token counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
}

impl TokenTotals {
    fn add(&mut self, input: u64, output: u64, cached: u64) {
        self.input += input;
        self.output += output;
        self.cached += cached;
    }
}

/// Accumulated token usage for one task.
///
/// Three views of the same counts: a grand total, a per-model breakdown, and
/// a per-source breakdown where sources are `"agent"` for the main loop and
/// `"tool:<name>"` for tool-initiated completions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    #[serde(default)]
    pub totals: TokenTotals,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub by_model: HashMap<String, TokenTotals>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub by_source: HashMap<String, TokenTotals>,
}

impl TokenUsage {
    pub fn record(&mut self, model: &str, source: &str, input: u64, output: u64, cached: u64) {
        self.totals.add(input, output, cached);
        self.by_model
            .entry(model.to_string())
            .or_default()
            .add(input, output, cached);
        self.by_source
            .entry(source.to_string())
            .or_default()
            .add(input, output, cached);
    }

    pub fn is_empty(&self) -> bool {
        self.totals == TokenTotals::default() && self.by_model.is_empty() && self.by_source.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
