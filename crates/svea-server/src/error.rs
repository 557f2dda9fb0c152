// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use svea_protocol::{ErrorBody, ErrorCode};

use crate::tasks::TaskStoreError;

/// Errors surfaced over the HTTP/UDS API.
///
/// Every variant maps onto a stable [`ErrorCode`] so callers can match
/// without parsing prose.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no agent matches target '{0}'")]
    TargetNotFound(String),

    #[error("priority must be between 1 and 5, got {0}")]
    BadPriority(u8),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("task prefix '{prefix}' is ambiguous")]
    PrefixCollision {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("operation not permitted in the task's current state: {0}")]
    State(String),

    #[error("supervisor is gone")]
    SupervisorGone,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::TargetNotFound(_) => ErrorCode::TargetNotFound,
            ApiError::BadPriority(_) => ErrorCode::BadPriority,
            ApiError::Validation(_) => ErrorCode::Validation,
            ApiError::UnknownTask(_) => ErrorCode::UnknownTask,
            ApiError::PrefixCollision { .. } => ErrorCode::PrefixCollision,
            ApiError::State(_) => ErrorCode::State,
            ApiError::SupervisorGone | ApiError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::TargetNotFound(_) | ApiError::UnknownTask(_) => StatusCode::NOT_FOUND,
            ApiError::BadPriority(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PrefixCollision { .. } | ApiError::State(_) => StatusCode::CONFLICT,
            ApiError::SupervisorGone | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn candidates(&self) -> Vec<String> {
        match self {
            ApiError::PrefixCollision { candidates, .. } => candidates.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<TaskStoreError> for ApiError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::Unknown(id) => ApiError::UnknownTask(id),
            TaskStoreError::Ambiguous { prefix, candidates } => {
                ApiError::PrefixCollision { prefix, candidates }
            }
            TaskStoreError::Transition(t) => ApiError::State(t.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code().as_str(), "api error: {self}");
        } else {
            tracing::debug!(code = self.code().as_str(), "api error: {self}");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            candidates: self.candidates(),
        };
        (status, Json(body)).into_response()
    }
}
