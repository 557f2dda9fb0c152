// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Stable machine-matchable error codes returned in HTTP error bodies.
///
/// Callers match on the code, never on the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TargetNotFound,
    AmbiguousTarget,
    Validation,
    BadPriority,
    State,
    PrefixCollision,
    UnknownTask,
    LockDenied,
    Transport,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TargetNotFound => "target_not_found",
            ErrorCode::AmbiguousTarget => "ambiguous_target",
            ErrorCode::Validation => "validation",
            ErrorCode::BadPriority => "bad_priority",
            ErrorCode::State => "state",
            ErrorCode::PrefixCollision => "prefix_collision",
            ErrorCode::UnknownTask => "unknown_task",
            ErrorCode::LockDenied => "lock_denied",
            ErrorCode::Transport => "transport",
            ErrorCode::Internal => "internal",
        }
    }
}

/// The JSON body every error response carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Conflicting identifiers for ambiguous-target and prefix-collision
    /// errors; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_wire_value_matches_as_str() {
        for code in [
            ErrorCode::TargetNotFound,
            ErrorCode::AmbiguousTarget,
            ErrorCode::PrefixCollision,
            ErrorCode::Internal,
        ] {
            assert_eq!(serde_json::to_value(code).unwrap(), code.as_str());
        }
    }
}
