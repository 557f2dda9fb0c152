// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Task — the lifecycle object created for every inbound message.
//!
//! ```text
//! submitted ──► working ──► completed   (terminal)
//!                 │   ▲  └► failed      (terminal)
//!                 │   │  └► canceled    (terminal)
//!                 ▼   │
//!           input-required
//! ```
//!
//! Terminal states are final: the only field that may still change on a
//! terminal task is its artifact list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Message, Part};
use crate::sender::TaskMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid task transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

/// An output produced by the wrapped program for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 32-character lowercase hex, unique within one agent's store.
    pub id: String,
    /// Groups related tasks into a multi-turn conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub state: TaskState,
    /// The original inbound message.
    pub message: Message,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(message: Message, metadata: TaskMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_task_id(),
            context_id: None,
            state: TaskState::Submitted,
            message,
            artifacts: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition, enforcing the lifecycle rules.
    ///
    /// `canceled` is reachable from any non-terminal state; otherwise only
    /// the submitted → working → {terminal, input-required} → working edges
    /// exist.
    pub fn transition(&mut self, to: TaskState) -> Result<(), TransitionError> {
        use TaskState::*;
        let from = self.state;
        let allowed = match (from, to) {
            _ if from.is_terminal() => false,
            (_, Canceled) => true,
            (Submitted, Working) => true,
            // Delivery can fail before the task ever starts working.
            (Submitted, Failed) => true,
            (Working, Completed) | (Working, Failed) | (Working, InputRequired) => true,
            (InputRequired, Working) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError { from, to });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Artifacts are the one field terminal tasks still accept.
    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
        self.updated_at = Utc::now();
    }
}
