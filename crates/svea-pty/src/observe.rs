// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! State observation — classifying the wrapped program from its output.
//!
//! The observer never parses semantics; it only matches profile-supplied
//! patterns against the tail of accumulated output and tracks how long the
//! program has been quiet.

use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

use svea_config::{DetectionStyle, Profile};

/// Bytes of output tail kept for pattern matching.
const TAIL_CAP: usize = 4096;

/// How long the transient `done` marker lingers before decaying to `ready`.
pub(crate) const DONE_DECAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Busy: the idle pattern does not match the tail.
    Processing,
    /// Waiting for input.
    Ready,
    /// Waiting for the user to pick an option.
    Waiting,
    /// A delivered task just completed; decays to `ready` shortly.
    Done,
}

#[derive(Debug)]
pub struct StateObserver {
    idle: Regex,
    input_ready: Option<Regex>,
    waiting: Option<Regex>,
    detection: DetectionStyle,
    quiet: Duration,
    tail: Vec<u8>,
    last_output: Instant,
    done_until: Option<Instant>,
}

impl StateObserver {
    pub fn new(profile: &Profile) -> Result<Self, regex::Error> {
        Ok(Self {
            idle: Regex::new(&profile.idle_pattern)?,
            input_ready: profile
                .input_ready_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()?,
            waiting: profile
                .waiting_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()?,
            detection: profile.detection,
            quiet: Duration::from_millis(profile.quiet_ms),
            tail: Vec::new(),
            last_output: Instant::now(),
            done_until: None,
        })
    }

    /// Account for a fresh chunk of program output.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.tail.extend_from_slice(chunk);
        if self.tail.len() > TAIL_CAP {
            let cut = self.tail.len() - TAIL_CAP;
            self.tail.drain(..cut);
        }
        self.last_output = Instant::now();
    }

    /// Mark the transient post-completion state.
    pub fn mark_done(&mut self) {
        self.done_until = Some(Instant::now() + DONE_DECAY);
    }

    /// Classify the current state.
    pub fn classify(&mut self) -> AgentState {
        if let Some(until) = self.done_until {
            if Instant::now() < until {
                return AgentState::Done;
            }
            self.done_until = None;
        }

        let tail = String::from_utf8_lossy(&self.tail);

        if let Some(waiting) = &self.waiting {
            if waiting.is_match(&tail) {
                return AgentState::Waiting;
            }
        }

        let quiet_elapsed = self.last_output.elapsed() >= self.quiet;
        let idle_matches = self.idle.is_match(&tail);
        let ready = match self.detection {
            DetectionStyle::Pattern => idle_matches,
            DetectionStyle::Timeout => quiet_elapsed,
            DetectionStyle::Hybrid => {
                let confirmed = match &self.input_ready {
                    Some(p) => p.is_match(&tail),
                    None => false,
                };
                idle_matches && (confirmed || quiet_elapsed)
            }
        };

        if ready {
            AgentState::Ready
        } else {
            AgentState::Processing
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
