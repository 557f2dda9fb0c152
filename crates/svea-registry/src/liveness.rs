// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The one liveness rule, shared by registry reaping and lock reclamation.
//!
//! Agents are sometimes started under different uids than the reader, in
//! which case the zero signal fails with EPERM even though the process is
//! very much alive. Misclassifying that case as dead makes agents delete
//! each other's registry entries, so only ESRCH counts as dead; every
//! other failure is treated as alive.

/// Probe a PID with the zero signal.
///
/// Returns `false` only on "no such process"; EPERM and any unexpected
/// errno are conservatively treated as alive.
pub fn process_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(code) if code == libc::ESRCH => false,
        Some(code) if code == libc::EPERM => true,
        _ => true,
    }
}
