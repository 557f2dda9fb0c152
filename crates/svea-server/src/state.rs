// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use svea_pty::SupervisorHandle;
use svea_protocol::AgentCard;
use svea_registry::{Registry, ReplyStore};

use crate::tasks::TaskStore;

/// Shared state behind every route handler, on both listeners.
#[derive(Clone)]
pub struct AppState {
    pub agent_id: String,
    pub card: AgentCard,
    pub tasks: Arc<TaskStore>,
    pub registry: Registry,
    pub replies: Arc<ReplyStore>,
    pub supervisor: SupervisorHandle,
}
