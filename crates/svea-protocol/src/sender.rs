// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Identifies who sent a task.
///
/// Populated by the sender from its own registry entry and trusted verbatim
/// by the receiver; there is no cross-checking against the registry on the
/// receiving side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenderDescriptor {
    /// Sender agent identifier (`<system>-<kind>-<port>`).
    pub id: String,
    #[serde(default)]
    pub kind: String,
    /// HTTP endpoint of the sender's own server.
    #[serde(default)]
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uds_path: Option<String>,
    /// Sender-side task id replies should be linked to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl SenderDescriptor {
    /// Minimal validity: an id plus at least one way to reach the sender.
    /// Only minimally-valid descriptors are eligible for reply tracking.
    pub fn is_minimal(&self) -> bool {
        !self.id.is_empty() && (!self.url.is_empty() || self.uds_path.is_some())
    }
}

/// Metadata carried alongside a task's message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderDescriptor>,
    /// The sender expects an answer; eligible tasks are recorded in the
    /// receiver's reply-target store.
    #[serde(default)]
    pub response_expected: bool,
    /// Sender-side task id minted via `/tasks/create` before sending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_task_id: Option<String>,
    /// Set on replies: the task id the original asker allocated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}
