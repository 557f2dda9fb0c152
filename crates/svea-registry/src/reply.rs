// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Reply-target store — "who asked me something last?"
//!
//! Despite the legacy `reply-stack` route names this is a map keyed by
//! sender identifier with insertion-order recency: re-setting a sender
//! moves it to the tail, and `peek_last` answers "the most recent asker".
//!
//! The store is dual-backed. The in-memory map serves the running server;
//! the JSON file next to the registry entry lets an out-of-process helper
//! (the `svea reply` command running inside the wrapped program) discover
//! who should receive a reply even when it cannot reach the server. Writes
//! go to both; file failures are logged and non-fatal.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    /// HTTP endpoint of the asker.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uds_path: Option<String>,
    /// Sender-side task id the reply should be linked to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReplyStore {
    path: PathBuf,
    inner: Mutex<IndexMap<String, ReplyTarget>>,
}

impl ReplyStore {
    /// Open the store backed by `path`, loading any pending targets a
    /// previous process left behind.
    pub fn open(path: PathBuf) -> Self {
        let initial = read_file(&path).unwrap_or_default();
        Self {
            path,
            inner: Mutex::new(initial),
        }
    }

    /// Upsert; a re-set sender moves to the tail of the recency order.
    pub fn set(&self, sender_id: &str, target: ReplyTarget) {
        let mut map = self.lock();
        map.shift_remove(sender_id);
        map.insert(sender_id.to_string(), target);
        self.persist(&map);
    }

    /// Non-destructive lookup; falls back to the file when the in-memory
    /// map has no entry (another process may have written one).
    pub fn get(&self, sender_id: &str) -> Option<ReplyTarget> {
        if let Some(t) = self.lock().get(sender_id) {
            return Some(t.clone());
        }
        read_file(&self.path)?.shift_remove(sender_id)
    }

    /// The most recently inserted target, without removing it.
    pub fn peek_last(&self) -> Option<(String, ReplyTarget)> {
        let map = self.lock();
        if let Some((k, v)) = map.last() {
            return Some((k.clone(), v.clone()));
        }
        drop(map);
        let file = read_file(&self.path)?;
        file.last().map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Remove and return; clears both backings.
    pub fn pop(&self, sender_id: &str) -> Option<ReplyTarget> {
        let mut map = self.lock();
        let found = map.shift_remove(sender_id);
        if found.is_some() {
            self.persist(&map);
            return found;
        }
        // In-memory miss: the record may only exist on disk.
        let mut file = read_file(&self.path)?;
        let found = file.shift_remove(sender_id);
        if found.is_some() {
            self.persist(&file);
        }
        found
    }

    /// All pending senders, oldest first.
    pub fn list(&self) -> Vec<(String, ReplyTarget)> {
        let map = self.lock();
        if !map.is_empty() {
            return map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        drop(map);
        read_file(&self.path)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty() && read_file(&self.path).map_or(true, |m| m.is_empty())
    }

    /// Delete the backing file; called on agent teardown.
    pub fn remove_file(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, ReplyTarget>> {
        // The store never panics while holding the lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, map: &IndexMap<String, ReplyTarget>) {
        match serde_json::to_vec_pretty(map) {
            Ok(bytes) => {
                if let Err(e) = write_atomic(&self.path, &bytes) {
                    warn!(path = %self.path.display(), error = %e,
                        "reply-target file write failed; in-memory store still valid");
                }
            }
            Err(e) => warn!(error = %e, "reply-target serialization failed"),
        }
    }
}

/// Best-effort file read: missing or unparsable files read as absent.
fn read_file(path: &PathBuf) -> Option<IndexMap<String, ReplyTarget>> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unparsable reply-target file");
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn target(task: &str) -> ReplyTarget {
        ReplyTarget {
            url: "http://127.0.0.1:8100".into(),
            uds_path: None,
            task_id: Some(task.into()),
            inserted_at: Utc::now(),
        }
    }

    fn store() -> (tempfile::TempDir, ReplyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ReplyStore::open(dir.path().join("a.reply.json"));
        (dir, store)
    }

    #[test]
    fn set_then_get_returns_record() {
        let (_d, s) = store();
        let t = target("t1");
        s.set("svea-claude-8100", t.clone());
        assert_eq!(s.get("svea-claude-8100"), Some(t));
    }

    #[test]
    fn pop_empties_and_second_pop_is_none() {
        let (_d, s) = store();
        let t = target("t1");
        s.set("svea-claude-8100", t.clone());
        assert_eq!(s.pop("svea-claude-8100"), Some(t));
        assert_eq!(s.pop("svea-claude-8100"), None);
        assert!(s.is_empty());
    }

    #[test]
    fn reset_moves_sender_to_tail() {
        let (_d, s) = store();
        s.set("a", target("t1"));
        s.set("b", target("t2"));
        s.set("a", target("t3"));
        let (last, t) = s.peek_last().unwrap();
        assert_eq!(last, "a");
        assert_eq!(t.task_id.as_deref(), Some("t3"));
        assert_eq!(s.list().len(), 2);
    }

    #[test]
    fn survives_process_restart_via_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.reply.json");
        {
            let s = ReplyStore::open(path.clone());
            s.set("asker", target("t1"));
        }
        // New store, same file: the pending record is still there.
        let s2 = ReplyStore::open(path);
        let (sender, t) = s2.peek_last().unwrap();
        assert_eq!(sender, "asker");
        assert_eq!(t.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn out_of_process_reader_sees_file_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.reply.json");
        let writer = ReplyStore::open(path.clone());
        writer.set("asker", target("t1"));

        // A second handle opened later (simulating the CLI helper) reads
        // through to the file even before any in-memory writes.
        let reader = ReplyStore::open(path);
        assert!(reader.get("asker").is_some());
        assert!(reader.pop("asker").is_some());
        assert!(reader.is_empty());
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.reply.json");
        std::fs::write(&path, b"{broken").unwrap();
        let s = ReplyStore::open(path);
        assert!(s.is_empty());
        // And the store keeps working.
        s.set("a", target("t1"));
        assert_eq!(s.list().len(), 1);
    }

    #[test]
    fn remove_file_deletes_backing() {
        let (_d, s) = store();
        s.set("a", target("t1"));
        s.remove_file();
        // In-memory copy still answers within this process.
        assert!(s.get("a").is_some());
    }
}
