// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Who am I speaking for?
//!
//! Helper tools run inside the wrapped program, so "the calling agent" is
//! not this process. Resolution order:
//!
//! 1. An explicit `--from` identifier, validated for shape and registry
//!    presence, then trusted.
//! 2. `SVEA_AGENT_ID`, exported by the supervisor into the wrapped
//!    program's environment and inherited by everything it spawns.
//! 3. Walking the ancestor PID chain against registered supervisor PIDs.
//!    Zero-configuration, and the fallback when the variable was stripped.

use tracing::debug;

use svea_protocol::parse_agent_id;
use svea_registry::{AgentEntry, Registry};

use crate::ClientError;

/// Longest ancestor chain worth walking before giving up.
const MAX_ANCESTRY_DEPTH: usize = 20;

pub fn resolve_self(
    registry: &Registry,
    explicit: Option<&str>,
) -> Result<AgentEntry, ClientError> {
    if let Some(id) = explicit {
        if parse_agent_id(id).is_none() {
            return Err(ClientError::Identity(format!(
                "'{id}' is not a <system>-<kind>-<port> identifier"
            )));
        }
        return registry
            .lookup(id)?
            .ok_or_else(|| ClientError::Identity(format!("'{id}' is not registered")));
    }

    if let Ok(id) = std::env::var("SVEA_AGENT_ID") {
        if let Some(entry) = registry.lookup(&id)? {
            debug!(agent_id = %id, "identified via SVEA_AGENT_ID");
            return Ok(entry);
        }
        return Err(ClientError::Identity(format!(
            "SVEA_AGENT_ID={id} is not registered"
        )));
    }

    ancestry_walk(registry)
}

/// Match each ancestor PID against live registry entries; the first hit is
/// the agent this process runs inside.
fn ancestry_walk(registry: &Registry) -> Result<AgentEntry, ClientError> {
    let live = registry.list_live()?;
    let mut pid = std::process::id();
    for _ in 0..MAX_ANCESTRY_DEPTH {
        if let Some(entry) = live.iter().find(|e| e.pid == pid) {
            debug!(agent_id = %entry.agent_id, pid, "identified via process ancestry");
            return Ok(entry.clone());
        }
        match parent_pid(pid) {
            Some(parent) if parent > 1 => pid = parent,
            _ => break,
        }
    }
    Err(ClientError::Identity(
        "no ancestor process is a registered agent (pass --from or set SVEA_AGENT_ID)".into(),
    ))
}

/// Parent PID from `/proc/<pid>/stat`. The comm field may contain spaces
/// and parentheses, so the parse anchors on the *last* closing paren.
fn parent_pid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
