// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::entry::AgentEntry;
use crate::liveness::process_alive;

/// Retry delay when a registry file fails to parse. A parse failure is
/// almost always a reader racing a writer's rename, so one short retry
/// settles it.
const PARSE_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("no agent matches target '{target}'")]
    NotFound { target: String },

    #[error("target '{target}' is ambiguous: {}", candidates.join(", "))]
    Ambiguous {
        target: String,
        candidates: Vec<String>,
    },
}

/// Handle to the host-shared registry directory.
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Open (and create if missing) a registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, agent_id: &str) -> PathBuf {
        self.root.join(format!("{agent_id}.json"))
    }

    /// Path of the reply-target file co-located with an agent's entry.
    pub fn reply_path(&self, agent_id: &str) -> PathBuf {
        self.root.join(format!("{agent_id}.reply.json"))
    }

    /// Remember an off-host peer under `external/`, a sibling of the
    /// registry directory. External entries carry no PID and are never
    /// subject to liveness reaping.
    pub fn record_external(&self, name: &str, url: &str) -> Result<(), RegistryError> {
        let dir = self
            .root
            .parent()
            .map(|p| p.join("external"))
            .unwrap_or_else(|| self.root.join("external"));
        fs::create_dir_all(&dir)?;
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let doc = serde_json::json!({
            "name": name,
            "url": url,
            "last_seen": chrono::Utc::now(),
        });
        write_atomic(
            &dir.join(format!("{safe}.json")),
            &serde_json::to_vec_pretty(&doc).map_err(io_other)?,
        )?;
        Ok(())
    }

    /// Write the entry atomically: temp file, fsync, rename.
    pub fn register(&self, entry: &AgentEntry) -> Result<(), RegistryError> {
        let path = self.entry_path(&entry.agent_id);
        write_atomic(&path, &serde_json::to_vec_pretty(entry).map_err(io_other)?)?;
        debug!(agent_id = %entry.agent_id, "registered");
        Ok(())
    }

    /// Remove the entry; missing files are not an error.
    pub fn unregister(&self, agent_id: &str) -> Result<(), RegistryError> {
        match fs::remove_file(self.entry_path(agent_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn lookup(&self, agent_id: &str) -> Result<Option<AgentEntry>, RegistryError> {
        Ok(read_entry(&self.entry_path(agent_id)))
    }

    /// Read-modify-write an entry in place. Returns `false` when the entry
    /// does not exist. The closure runs between read and atomic rewrite;
    /// last writer wins, which is acceptable for the advisory fields this
    /// is used for.
    pub fn update<F>(&self, agent_id: &str, f: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&mut AgentEntry),
    {
        let Some(mut entry) = read_entry(&self.entry_path(agent_id)) else {
            return Ok(false);
        };
        f(&mut entry);
        self.register(&entry)?;
        Ok(true)
    }

    /// Enumerate all live agents, reaping entries whose process is
    /// demonstrably dead.
    pub fn list_live(&self) -> Result<Vec<AgentEntry>, RegistryError> {
        let mut live = Vec::new();
        for path in self.entry_files()? {
            let Some(entry) = read_entry(&path) else {
                continue;
            };
            if process_alive(entry.pid) {
                live.push(entry);
            } else {
                warn!(agent_id = %entry.agent_id, pid = entry.pid, "reaping dead agent entry");
                let _ = fs::remove_file(&path);
            }
        }
        live.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(live)
    }

    /// Map a user-facing target onto a live entry.
    ///
    /// Precedence, first match wins: exact display name, exact agent id,
    /// `<kind>-<port>` shorthand, then bare kind when exactly one agent of
    /// that kind is live.
    pub fn resolve(&self, target: &str) -> Result<AgentEntry, RegistryError> {
        let live = self.list_live()?;

        let by_name: Vec<&AgentEntry> = live
            .iter()
            .filter(|e| e.display_name.as_deref() == Some(target))
            .collect();
        match by_name.len() {
            1 => return Ok(by_name[0].clone()),
            n if n > 1 => {
                return Err(RegistryError::Ambiguous {
                    target: target.to_string(),
                    candidates: by_name.iter().map(|e| e.agent_id.clone()).collect(),
                })
            }
            _ => {}
        }

        if let Some(e) = live.iter().find(|e| e.agent_id == target) {
            return Ok(e.clone());
        }

        // `<kind>-<port>` shorthand: the id without the system prefix.
        if let Some(e) = live
            .iter()
            .find(|e| e.agent_id.strip_prefix(&format!("{}-", svea_protocol::SYSTEM))
                == Some(target))
        {
            return Ok(e.clone());
        }

        let by_kind: Vec<&AgentEntry> = live.iter().filter(|e| e.kind == target).collect();
        match by_kind.len() {
            0 => Err(RegistryError::NotFound {
                target: target.to_string(),
            }),
            1 => Ok(by_kind[0].clone()),
            _ => Err(RegistryError::Ambiguous {
                target: target.to_string(),
                candidates: by_kind.iter().map(|e| e.agent_id.clone()).collect(),
            }),
        }
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, RegistryError> {
        let mut files = Vec::new();
        for dirent in fs::read_dir(&self.root)? {
            let path = dirent?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Reply-target files live in the same directory.
            if name.ends_with(".json") && !name.ends_with(".reply.json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

/// Read and parse one entry, treating a parse failure as transient noise:
/// retry once after a short sleep, then give up on the file.
fn read_entry(path: &Path) -> Option<AgentEntry> {
    for attempt in 0..2 {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entry) => return Some(entry),
                Err(e) if attempt == 0 => {
                    debug!(path = %path.display(), error = %e, "registry parse failure, retrying");
                    std::thread::sleep(PARSE_RETRY);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparsable registry file");
                    return None;
                }
            },
            Err(_) => return None,
        }
    }
    None
}

/// Write-temp-fsync-rename. Readers observe either the old or the new
/// content, never a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn io_other(e: impl std::error::Error + Send + Sync + 'static) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AgentStatus;

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path()).unwrap();
        (dir, reg)
    }

    fn live_entry(id: &str, kind: &str, port: u16) -> AgentEntry {
        // Own PID so liveness checks pass.
        AgentEntry::new(id, kind, port)
    }

    #[test]
    fn register_lookup_unregister() {
        let (_dir, reg) = registry();
        let e = live_entry("svea-claude-8100", "claude", 8100);
        reg.register(&e).unwrap();
        let got = reg.lookup("svea-claude-8100").unwrap().unwrap();
        assert_eq!(got.agent_id, e.agent_id);
        reg.unregister("svea-claude-8100").unwrap();
        assert!(reg.lookup("svea-claude-8100").unwrap().is_none());
        // Double unregister tolerated.
        reg.unregister("svea-claude-8100").unwrap();
    }

    #[test]
    fn list_live_reaps_dead_pids() {
        let (_dir, reg) = registry();
        let mut dead = live_entry("svea-claude-8101", "claude", 8101);
        dead.pid = 4_000_000;
        reg.register(&dead).unwrap();
        reg.register(&live_entry("svea-claude-8100", "claude", 8100))
            .unwrap();

        let live = reg.list_live().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].agent_id, "svea-claude-8100");
        // The dead entry's file is gone.
        assert!(reg.lookup("svea-claude-8101").unwrap().is_none());
    }

    #[test]
    fn reply_files_are_not_entries() {
        let (_dir, reg) = registry();
        reg.register(&live_entry("svea-claude-8100", "claude", 8100))
            .unwrap();
        std::fs::write(reg.reply_path("svea-claude-8100"), b"{}").unwrap();
        assert_eq!(reg.list_live().unwrap().len(), 1);
    }

    #[test]
    fn unparsable_entry_is_skipped_not_fatal() {
        let (_dir, reg) = registry();
        std::fs::write(reg.root().join("garbage.json"), b"{not json").unwrap();
        reg.register(&live_entry("svea-claude-8100", "claude", 8100))
            .unwrap();
        let live = reg.list_live().unwrap();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn resolve_precedence() {
        let (_dir, reg) = registry();
        let mut named = live_entry("svea-claude-8100", "claude", 8100);
        named.display_name = Some("reviewer".into());
        reg.register(&named).unwrap();
        reg.register(&live_entry("svea-gemini-8110", "gemini", 8110))
            .unwrap();

        assert_eq!(reg.resolve("reviewer").unwrap().agent_id, "svea-claude-8100");
        assert_eq!(
            reg.resolve("svea-gemini-8110").unwrap().agent_id,
            "svea-gemini-8110"
        );
        assert_eq!(reg.resolve("claude-8100").unwrap().agent_id, "svea-claude-8100");
        assert_eq!(reg.resolve("gemini").unwrap().agent_id, "svea-gemini-8110");
    }

    #[test]
    fn resolve_ambiguous_kind_lists_candidates() {
        let (_dir, reg) = registry();
        reg.register(&live_entry("svea-claude-8100", "claude", 8100))
            .unwrap();
        reg.register(&live_entry("svea-claude-8101", "claude", 8101))
            .unwrap();

        match reg.resolve("claude") {
            Err(RegistryError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates.contains(&"svea-claude-8100".to_string()));
                assert!(candidates.contains(&"svea-claude-8101".to_string()));
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let (_dir, reg) = registry();
        assert!(matches!(
            reg.resolve("nobody"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn update_stamps_transport() {
        let (_dir, reg) = registry();
        reg.register(&live_entry("svea-claude-8100", "claude", 8100))
            .unwrap();
        let found = reg
            .update("svea-claude-8100", |e| e.stamp_transport("uds"))
            .unwrap();
        assert!(found);
        let got = reg.lookup("svea-claude-8100").unwrap().unwrap();
        assert_eq!(got.fresh_transport(), Some("uds"));
        // Missing entries report false instead of erroring.
        assert!(!reg.update("svea-nobody-1", |_| {}).unwrap());
    }

    #[test]
    fn external_entries_live_beside_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path().join("registry")).unwrap();
        reg.record_external("peer one", "http://10.0.0.2:8100").unwrap();

        let path = dir.path().join("external/peer_one.json");
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(doc["name"], "peer one");
        assert_eq!(doc["url"], "http://10.0.0.2:8100");
        // Not an entry; enumeration ignores it.
        assert!(reg.list_live().unwrap().is_empty());
    }

    #[test]
    fn atomic_write_leaves_no_tmp_behind() {
        let (_dir, reg) = registry();
        let mut e = live_entry("svea-claude-8100", "claude", 8100);
        for i in 0..20 {
            e.touch(if i % 2 == 0 {
                AgentStatus::Running
            } else {
                AgentStatus::Terminating
            });
            reg.register(&e).unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(reg.root())
            .unwrap()
            .filter_map(|d| d.ok())
            .filter(|d| d.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
