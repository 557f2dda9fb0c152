// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use svea_config::Profile;
use svea_protocol::{Priority, INJECT_PREFIX};

/// ETX — what the terminal driver turns Ctrl-C into.
pub const INTERRUPT_BYTE: u8 = 0x03;

/// One framework write queued for the PTY.
#[derive(Debug, Clone)]
pub struct InjectRequest {
    pub text: String,
    pub priority: Priority,
    /// Task whose delivery this injection is; completion tracking keys on
    /// it once the wrapped program goes busy and returns to idle.
    pub task_id: Option<String>,
    pub reply_expected: bool,
    /// Bypass the `A2A:` framing entirely (initial instructions).
    pub raw: bool,
}

impl InjectRequest {
    pub fn message(text: impl Into<String>, priority: Priority, reply_expected: bool) -> Self {
        Self {
            text: text.into(),
            priority,
            task_id: None,
            reply_expected,
            raw: false,
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            priority: Priority::NORMAL,
            task_id: None,
            reply_expected: false,
            raw: true,
        }
    }
}

/// Render the line injected into the wrapped program.
///
/// Payloads above the profile threshold are spooled to a file under
/// `spool_dir` and replaced by a reference, so terminal input-length
/// limits are never tripped.
pub fn format_payload(
    req: &InjectRequest,
    profile: &Profile,
    spool_dir: &Path,
    fallback_id: &str,
) -> std::io::Result<String> {
    if req.raw {
        return Ok(req.text.clone());
    }

    let marker = if req.reply_expected {
        format!("{INJECT_PREFIX} [REPLY EXPECTED] ")
    } else {
        format!("{INJECT_PREFIX} ")
    };

    if req.text.len() > profile.long_message_threshold {
        let path = spool_payload(&req.text, spool_dir, req.task_id.as_deref(), fallback_id)?;
        return Ok(format!("{marker}Long message saved to {}", path.display()));
    }
    Ok(format!("{marker}{}", req.text))
}

fn spool_payload(
    text: &str,
    spool_dir: &Path,
    task_id: Option<&str>,
    fallback_id: &str,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(spool_dir)?;
    let name = task_id.unwrap_or(fallback_id);
    let path = spool_dir.join(format!("{name}.txt"));
    std::fs::write(&path, text)?;
    Ok(path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        svea_config::Config::default().profile("claude").unwrap()
    }

    #[test]
    fn short_payload_is_framed_inline() {
        let dir = tempfile::tempdir().unwrap();
        let req = InjectRequest::message("hello", Priority::NORMAL, false);
        let line = format_payload(&req, &profile(), dir.path(), "x").unwrap();
        assert_eq!(line, "A2A: hello");
    }

    #[test]
    fn reply_expected_adds_marker() {
        let dir = tempfile::tempdir().unwrap();
        let req = InjectRequest::message("hello", Priority::NORMAL, true);
        let line = format_payload(&req, &profile(), dir.path(), "x").unwrap();
        assert_eq!(line, "A2A: [REPLY EXPECTED] hello");
    }

    #[test]
    fn long_payload_is_spooled_by_reference() {
        let dir = tempfile::tempdir().unwrap();
        let long = "x".repeat(500);
        let mut req = InjectRequest::message(long.clone(), Priority::NORMAL, false);
        req.task_id = Some("0123456789abcdef0123456789abcdef".into());

        let line = format_payload(&req, &profile(), dir.path(), "x").unwrap();
        assert!(line.starts_with("A2A: Long message saved to "));
        let path = line.trim_start_matches("A2A: Long message saved to ");
        assert_eq!(std::fs::read_to_string(path).unwrap(), long);
    }

    #[test]
    fn raw_request_skips_framing() {
        let dir = tempfile::tempdir().unwrap();
        let req = InjectRequest::raw("you are agent X");
        let line = format_payload(&req, &profile(), dir.path(), "x").unwrap();
        assert_eq!(line, "you are agent X");
    }
}
