// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Topic grammar.
//!
//! Every deployment shares one `{namespace}` prefix; the functions here are
//! the single place topic strings are built, so a format change cannot
//! desynchronise publishers and subscribers.

/// Request topic an agent consumes task submissions from.
pub fn agent_request_topic(namespace: &str, agent_name: &str) -> String {
    format!("{namespace}/agent/{agent_name}/request")
}

/// Response topic an agent consumes peer replies from.
pub fn agent_response_topic(namespace: &str, agent_name: &str) -> String {
    format!("{namespace}/agent/{agent_name}/response")
}

/// Status topic a gateway watches for one task's progress.
pub fn gateway_status_topic(namespace: &str, gateway_id: &str, task_id: &str) -> String {
    format!("{namespace}/gateway/{gateway_id}/task/{task_id}/status")
}

/// Reply topic a gateway receives one task's final response on.
pub fn gateway_response_topic(namespace: &str, gateway_id: &str, task_id: &str) -> String {
    format!("{namespace}/gateway/{gateway_id}/task/{task_id}/response")
}

/// Topic AgentCards are broadcast on.
pub fn discovery_topic(namespace: &str) -> String {
    format!("{namespace}/discovery/agentcards")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_shapes() {
        assert_eq!(
            agent_request_topic("acme/prod", "planner"),
            "acme/prod/agent/planner/request"
        );
        assert_eq!(
            agent_response_topic("acme/prod", "planner"),
            "acme/prod/agent/planner/response"
        );
        assert_eq!(
            gateway_status_topic("acme/prod", "gw1", "t-7"),
            "acme/prod/gateway/gw1/task/t-7/status"
        );
        assert_eq!(
            gateway_response_topic("acme/prod", "gw1", "t-7"),
            "acme/prod/gateway/gw1/task/t-7/response"
        );
        assert_eq!(discovery_topic("acme/prod"), "acme/prod/discovery/agentcards");
    }
}
