// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Filesystem-backed discovery shared by every agent on the host.
//!
//! One JSON document per live agent under the registry directory; writers
//! rely on rename atomicity, readers tolerate partial files, and liveness
//! is decided by signalling the recorded PID with the zero signal. There
//! is no janitor process: any agent that notices a dead peer reaps its
//! entry during enumeration.

mod entry;
mod liveness;
mod reply;
mod store;

pub use entry::{AgentEntry, AgentStatus};
pub use liveness::process_alive;
pub use reply::{ReplyStore, ReplyTarget};
pub use store::{Registry, RegistryError};

/// How long a `last_transport` stamp stays visible before readers treat it
/// as absent.
pub const TRANSPORT_STAMP_TTL_SECS: i64 = 3;
