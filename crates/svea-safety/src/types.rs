// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};

/// Identity of a lock requester or holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub agent_id: String,
    pub agent_kind: String,
    pub pid: u32,
    /// Coordinator-mode processes delegate instead of editing; write
    /// validation denies them unconditionally.
    pub coordinator: bool,
}

impl LockOwner {
    pub fn new(agent_id: impl Into<String>, agent_kind: impl Into<String>, pid: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_kind: agent_kind.into(),
            pid,
            coordinator: false,
        }
    }
}

/// A live lock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub path: String,
    pub agent_id: String,
    pub agent_kind: String,
    pub pid: u32,
    pub intent: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A live lock is held by someone else.
    Held,
    /// The requester is a coordinator-mode process.
    Coordinator,
    /// The store could not decide; fail closed.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        /// The stale lock that was replaced, if any. Advisory, not an
        /// error.
        reclaimed: Option<LockRecord>,
    },
    Denied {
        holder: Option<LockRecord>,
        reason: DenyReason,
    },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    Allowed,
    Denied {
        holder: Option<LockRecord>,
        reason: DenyReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Modify => "modify",
            ChangeKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeKind::Create),
            "modify" => Some(ChangeKind::Modify),
            "delete" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// One append-only modification-log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub path: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub kind: ChangeKind,
    pub intent: String,
    pub created_at: DateTime<Utc>,
}
