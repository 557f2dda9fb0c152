// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Outbound side of the protocol.
//!
//! The client is what `svea send` and `svea reply` run, usually from a
//! helper process spawned *inside* the wrapped program. It figures out
//! which agent it is speaking for (explicit flag, environment, or process
//! ancestry), resolves the destination through the registry, and prefers
//! the destination's Unix socket over TCP on same-host calls.

mod identity;
mod send;
mod transport;

pub use identity::resolve_self;
pub use send::{Client, ReplyOutcome, SendOptions, SendOutcome};
pub use transport::{HttpReply, Transport};

use thiserror::Error;

use svea_protocol::ErrorCode;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Registry(#[from] svea_registry::RegistryError),

    #[error("cannot determine calling agent: {0}")]
    Identity(String),

    #[error("transport failure reaching {target}: {detail}")]
    Transport { target: String, detail: String },

    #[error("UDS unreachable and TCP is blocked in sandbox mode")]
    SandboxExhausted,

    #[error("no pending messages to reply to")]
    NoPendingReplies,

    #[error("{target} answered {code:?}: {message}")]
    Api {
        target: String,
        code: ErrorCode,
        message: String,
    },

    #[error("malformed response from {target}: {detail}")]
    BadResponse { target: String, detail: String },
}
