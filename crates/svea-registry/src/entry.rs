// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TRANSPORT_STAMP_TTL_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Terminating,
}

/// One registry document, `<agent_id>.json` in the registry directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Stable `<system>-<kind>-<port>` identifier, assigned at startup.
    pub agent_id: String,
    pub pid: u32,
    pub kind: String,
    /// HTTP endpoint of the agent's server.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uds_path: Option<String>,
    /// User-assigned display name; resolution checks it first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub cwd: String,
    pub status: AgentStatus,
    /// Preview of the task currently being worked on, for the list view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    /// Last transport used to reach or be reached by this agent ("uds" or
    /// "tcp"). Observability only; aged out after a few seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transport_at: Option<DateTime<Utc>>,
    pub status_updated_at: DateTime<Utc>,
}

impl AgentEntry {
    pub fn new(agent_id: impl Into<String>, kind: impl Into<String>, port: u16) -> Self {
        Self {
            agent_id: agent_id.into(),
            pid: std::process::id(),
            kind: kind.into(),
            url: format!("http://127.0.0.1:{port}"),
            uds_path: None,
            display_name: None,
            role: None,
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            status: AgentStatus::Running,
            current_task: None,
            last_transport: None,
            last_transport_at: None,
            status_updated_at: Utc::now(),
        }
    }

    /// The transport stamp, unless it has aged past its TTL.
    pub fn fresh_transport(&self) -> Option<&str> {
        let at = self.last_transport_at?;
        if (Utc::now() - at).num_seconds() > TRANSPORT_STAMP_TTL_SECS {
            return None;
        }
        self.last_transport.as_deref()
    }

    pub fn stamp_transport(&mut self, transport: &str) {
        self.last_transport = Some(transport.to_string());
        self.last_transport_at = Some(Utc::now());
    }

    pub fn touch(&mut self, status: AgentStatus) {
        self.status = status;
        self.status_updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_stamp_ages_out() {
        let mut e = AgentEntry::new("svea-claude-8100", "claude", 8100);
        e.stamp_transport("tcp");
        assert_eq!(e.fresh_transport(), Some("tcp"));
        e.last_transport_at = Some(Utc::now() - chrono::Duration::seconds(10));
        assert_eq!(e.fresh_transport(), None);
    }

    #[test]
    fn entry_serializes_without_empty_options() {
        let e = AgentEntry::new("svea-claude-8100", "claude", 8100);
        let v = serde_json::to_value(&e).unwrap();
        assert!(v.get("display_name").is_none());
        assert_eq!(v["status"], "running");
        assert_eq!(v["url"], "http://127.0.0.1:8100");
    }
}
