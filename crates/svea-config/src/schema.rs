// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Configuration schema.
//!
//! A *profile* is the declarative description of one kind of wrapped
//! program: how to launch it, how to recognise that it is waiting for
//! input, how to submit injected text, and which port band its agents
//! claim. Built-in reference profiles cover the common CLI agents; user
//! config layers may override any of them or add new kinds.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Payloads longer than this are spooled to a file and injected by
/// reference instead of through the terminal input buffer.
pub const DEFAULT_LONG_MESSAGE_THRESHOLD: usize = 200;

fn default_quiet_ms() -> u64 {
    2_000
}

fn default_long_message_threshold() -> usize {
    DEFAULT_LONG_MESSAGE_THRESHOLD
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root of the shared on-disk state (registry, reply files, UDS
    /// sockets, safety database). Defaults to `~/.a2a`.
    pub data_dir: Option<PathBuf>,
    /// Gate the initial-instruction injection behind a y/N prompt.
    /// Forced to `auto` when stdin is not a terminal.
    #[serde(default)]
    pub approval: ApprovalMode,
    /// Treat outbound TCP as unavailable: UDS failures become terminal
    /// instead of falling back.
    #[serde(default)]
    pub sandbox: bool,
    /// User-defined profiles; entries here shadow the built-ins of the
    /// same name.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Config {
    /// Resolve the shared state root, honouring the override chain:
    /// `SVEA_DATA_DIR` env → `data_dir` config key → `~/.a2a`.
    pub fn a2a_root(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("SVEA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".a2a")
    }

    /// Look up a profile by kind: user config first, then built-ins.
    pub fn profile(&self, kind: &str) -> Option<Profile> {
        if let Some(p) = self.profiles.get(kind) {
            return Some(p.clone());
        }
        builtin_profiles().remove(kind)
    }

    /// All known profile kinds, user overrides included.
    pub fn profile_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = builtin_profiles().keys().cloned().collect();
        for k in self.profiles.keys() {
            if !kinds.contains(k) {
                kinds.push(k.clone());
            }
        }
        kinds.sort();
        kinds
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    #[default]
    Auto,
    Ask,
}

/// How readiness of the wrapped program is detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStyle {
    /// The idle pattern alone decides.
    Pattern,
    /// A quiet period with no new output decides.
    Timeout,
    /// Pattern required, with the quiet period as a guard.
    #[default]
    Hybrid,
}

/// Byte sequence appended after injected text so the wrapped program
/// treats it as submitted input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitSequence {
    #[default]
    Cr,
    Lf,
    CrLf,
}

impl SubmitSequence {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            SubmitSequence::Cr => b"\r",
            SubmitSequence::Lf => b"\n",
            SubmitSequence::CrLf => b"\r\n",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Executable to spawn inside the PTY.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Matches the output tail when the program is waiting for input.
    pub idle_pattern: String,
    /// Stronger readiness signal, e.g. the prompt glyph itself.
    pub input_ready_pattern: Option<String>,
    /// Matches when the program is waiting for the user to pick an option.
    pub waiting_pattern: Option<String>,
    #[serde(default)]
    pub detection: DetectionStyle,
    /// Quiet period (ms) with no new output before timeout-style detection
    /// declares readiness.
    #[serde(default = "default_quiet_ms")]
    pub quiet_ms: u64,
    #[serde(default)]
    pub submit: SubmitSequence,
    /// Inclusive port band reserved for this kind.
    pub port_range: (u16, u16),
    #[serde(default = "default_long_message_threshold")]
    pub long_message_threshold: usize,
    /// Initial-instruction template injected on first readiness.
    /// `{agent_id}` is substituted before injection.
    pub instructions: Option<String>,
    /// Extra environment for the wrapped program.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

const DEFAULT_INSTRUCTIONS: &str = "You are reachable as agent {agent_id}. Messages from peer \
agents arrive prefixed with 'A2A:'. To answer one marked [REPLY EXPECTED], run: svea reply \
\"<your answer>\". To message another agent, run: svea send <target> \"<message>\". Run \
`svea list` to see who is online.";

/// Built-in reference profiles, keyed by kind. Port bands are allocated in
/// decades so an identifier's port also names its kind.
pub fn builtin_profiles() -> HashMap<String, Profile> {
    let mut map = HashMap::new();
    map.insert(
        "claude".to_string(),
        Profile {
            command: "claude".into(),
            args: vec![],
            idle_pattern: r"(?m)^\s*>\s*$".into(),
            input_ready_pattern: Some(r"\? for shortcuts".into()),
            waiting_pattern: Some(r"❯\s+\d+\.".into()),
            detection: DetectionStyle::Hybrid,
            quiet_ms: default_quiet_ms(),
            submit: SubmitSequence::Cr,
            port_range: (8100, 8109),
            long_message_threshold: DEFAULT_LONG_MESSAGE_THRESHOLD,
            instructions: Some(DEFAULT_INSTRUCTIONS.into()),
            env: HashMap::new(),
        },
    );
    map.insert(
        "gemini".to_string(),
        Profile {
            command: "gemini".into(),
            args: vec![],
            idle_pattern: r"(?m)^\s*>\s*$".into(),
            input_ready_pattern: None,
            waiting_pattern: None,
            detection: DetectionStyle::Hybrid,
            quiet_ms: default_quiet_ms(),
            submit: SubmitSequence::Cr,
            port_range: (8110, 8119),
            long_message_threshold: DEFAULT_LONG_MESSAGE_THRESHOLD,
            instructions: Some(DEFAULT_INSTRUCTIONS.into()),
            env: HashMap::new(),
        },
    );
    map.insert(
        "codex".to_string(),
        Profile {
            command: "codex".into(),
            args: vec![],
            idle_pattern: r"(?m)^\s*▌".into(),
            input_ready_pattern: None,
            waiting_pattern: None,
            detection: DetectionStyle::Hybrid,
            quiet_ms: default_quiet_ms(),
            submit: SubmitSequence::Cr,
            port_range: (8120, 8129),
            long_message_threshold: DEFAULT_LONG_MESSAGE_THRESHOLD,
            instructions: Some(DEFAULT_INSTRUCTIONS.into()),
            env: HashMap::new(),
        },
    );
    // Plain shell profile, mostly useful for integration testing: any
    // POSIX shell prompt counts as idle.
    map.insert(
        "shell".to_string(),
        Profile {
            command: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".into()),
            args: vec![],
            idle_pattern: r"[$#%>]\s*$".into(),
            input_ready_pattern: None,
            waiting_pattern: None,
            detection: DetectionStyle::Timeout,
            quiet_ms: 800,
            submit: SubmitSequence::Lf,
            port_range: (8190, 8199),
            long_message_threshold: DEFAULT_LONG_MESSAGE_THRESHOLD,
            instructions: None,
            env: HashMap::new(),
        },
    );
    map
}
