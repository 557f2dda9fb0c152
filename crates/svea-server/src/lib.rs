// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The per-agent server: one handler set, two listeners.
//!
//! The same axum `Router` is served over TCP (the port embedded in the
//! agent identifier) and over a Unix domain socket for same-host callers.
//! A crash of either listener never takes down the other; the bootstrap
//! keeps running on whichever survives.
//!
//! Inbound tasks are accepted, recorded, and handed to the PTY supervisor
//! without awaiting the wrapped program; callers that need an answer use
//! the reply-tracking flow instead of holding the request open.

mod error;
mod routes;
mod state;
mod tasks;
mod uds;

pub use error::ApiError;
pub use routes::{router, ReplyTargetResponse, SendTaskRequest, StatusResponse};
pub use state::AppState;
pub use tasks::{TaskStore, TaskStoreError};
pub use uds::serve_uds;
