// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire types for the svea agent-to-agent protocol.
//!
//! Everything that crosses an HTTP body or lands in a registry file lives
//! here so the server, the client and the CLI helpers agree on one schema.
//! Field names are lower-snake-case, timestamps are RFC 3339 UTC, task
//! identifiers are 32-character lowercase hex (UUIDv4 without dashes).

mod card;
mod error;
mod message;
mod priority;
mod sender;
mod task;

pub use card::{AgentCapabilities, AgentCard, AgentSkill};
pub use error::{ErrorBody, ErrorCode};
pub use message::{Message, Part, Role};
pub use priority::Priority;
pub use sender::{SenderDescriptor, TaskMetadata};
pub use task::{Artifact, Task, TaskState, TransitionError};

/// The system prefix baked into every agent identifier.
pub const SYSTEM: &str = "svea";

/// Marker prepended to every message injected into a wrapped program.
pub const INJECT_PREFIX: &str = "A2A:";

/// Parse an agent identifier of the shape `<system>-<kind>-<port>`.
///
/// The kind itself may contain dashes (`svea-my-tool-8130`), so the port is
/// taken from the last segment and the system from the first.
pub fn parse_agent_id(id: &str) -> Option<(&str, &str, u16)> {
    let (head, port) = id.rsplit_once('-')?;
    let port: u16 = port.parse().ok()?;
    let (system, kind) = head.split_once('-')?;
    if system.is_empty() || kind.is_empty() {
        return None;
    }
    Some((system, kind, port))
}

/// Allocate a fresh task identifier: UUIDv4 rendered as 32 lowercase hex.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
