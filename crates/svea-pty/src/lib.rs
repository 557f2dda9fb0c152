// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! PTY supervisor — the component that owns the wrapped program.
//!
//! # Design
//!
//! ```text
//!   user stdin ──► input pump ─────────┐
//!                                      ├──► writer task ──► PTY master
//!   server ──► injection consumer ─────┘         (single serialization point)
//!   (normal + urgent lanes)
//!
//!   PTY master ──► output pump ──► user stdout (unchanged)
//!                      └─────────► state observer ──► watch<AgentState>
//!
//!   child exit ──► exit watcher ──► oneshot ──► bootstrap teardown
//! ```
//!
//! Every byte that reaches the PTY goes through the writer task, so a
//! framework injection is atomic with respect to other framework writes.
//! It cannot be atomic with respect to the user mid-keystroke; instead the
//! consumer emits a leading newline so injected text always starts on a
//! fresh line.
//!
//! Priorities 1–4 are advisory labels on a single FIFO lane. Priority 5 is
//! the emergency lane: the consumer prefers it, sends an interrupt byte
//! (ETX, the in-band Ctrl-C) through the PTY first, and then writes the
//! message without waiting for any acknowledgement.

mod inject;
mod observe;
mod supervisor;

pub use inject::{format_payload, InjectRequest, INTERRUPT_BYTE};
pub use svea_protocol::Priority;
pub use observe::{AgentState, StateObserver};
pub use supervisor::{
    RawModeGuard, Supervisor, SupervisorEvents, SupervisorHandle, SupervisorOptions,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(String),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("pty i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern in profile: {0}")]
    Pattern(#[from] regex::Error),

    #[error("supervisor is gone")]
    Closed,
}
