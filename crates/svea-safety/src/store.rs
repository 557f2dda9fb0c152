// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, warn};

use svea_registry::process_alive;

use crate::types::{
    AcquireOutcome, ChangeKind, DenyReason, LockOwner, LockRecord, Modification, WriteDecision,
};
use crate::{clamp_poll_interval, RETENTION_DAYS};

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("safety database: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("bad timestamp in safety database: {0}")]
    Timestamp(String),
}

pub struct SafetyStore {
    conn: Mutex<Connection>,
}

impl SafetyStore {
    /// Open (or create) the shared database. `":memory:"` works for tests.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                path        TEXT PRIMARY KEY,
                agent_id    TEXT NOT NULL,
                agent_kind  TEXT NOT NULL,
                pid         INTEGER NOT NULL,
                intent      TEXT NOT NULL DEFAULT '',
                acquired_at TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS modifications (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                path       TEXT NOT NULL,
                agent_id   TEXT NOT NULL,
                task_id    TEXT,
                kind       TEXT NOT NULL,
                intent     TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_modifications_path
                ON modifications(path, created_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Try to take the lock on `path`.
    ///
    /// Runs in one immediate transaction: an existing live lock denies; a
    /// stale one (dead pid or past expiry) is replaced and reported back
    /// as reclaimed. Internal errors deny.
    pub fn acquire(
        &self,
        path: &str,
        owner: &LockOwner,
        intent: &str,
        ttl: Duration,
    ) -> AcquireOutcome {
        match self.try_acquire(path, owner, intent, ttl) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path, error = %e, "lock acquire failed internally; denying");
                AcquireOutcome::Denied {
                    holder: None,
                    reason: DenyReason::Internal,
                }
            }
        }
    }

    /// Wait-mode acquire: poll until acquired or `timeout` elapses. The
    /// polling cadence is clamped to [200 ms, 10 s].
    pub fn acquire_wait(
        &self,
        path: &str,
        owner: &LockOwner,
        intent: &str,
        ttl: Duration,
        poll: Duration,
        timeout: Duration,
    ) -> AcquireOutcome {
        let poll = clamp_poll_interval(poll);
        let deadline = Instant::now() + timeout;
        loop {
            let outcome = self.acquire(path, owner, intent, ttl);
            if outcome.is_acquired() || Instant::now() + poll > deadline {
                return outcome;
            }
            std::thread::sleep(poll);
        }
    }

    fn try_acquire(
        &self,
        path: &str,
        owner: &LockOwner,
        intent: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, SafetyError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = query_lock(&tx, path)?;
        let reclaimed = match existing {
            Some(holder) if holder.agent_id != owner.agent_id => {
                if lock_is_stale(&holder) {
                    debug!(path, holder = %holder.agent_id, "reclaiming stale lock");
                    Some(holder)
                } else {
                    return Ok(AcquireOutcome::Denied {
                        holder: Some(holder),
                        reason: DenyReason::Held,
                    });
                }
            }
            // Re-acquiring one's own lock refreshes it.
            other => other,
        };

        let now = Utc::now();
        let expires = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        tx.execute(
            "INSERT INTO locks (path, agent_id, agent_kind, pid, intent, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                agent_id = excluded.agent_id,
                agent_kind = excluded.agent_kind,
                pid = excluded.pid,
                intent = excluded.intent,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at",
            params![
                path,
                owner.agent_id,
                owner.agent_kind,
                owner.pid,
                intent,
                now.to_rfc3339(),
                expires.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        let reclaimed = reclaimed.filter(|r| r.agent_id != owner.agent_id);
        Ok(AcquireOutcome::Acquired { reclaimed })
    }

    /// Release the lock. Succeeds whether or not the caller held it; a
    /// release of someone else's live lock is refused silently.
    pub fn release(&self, path: &str, agent_id: &str) {
        let conn = self.lock_conn();
        if let Err(e) = conn.execute(
            "DELETE FROM locks WHERE path = ?1 AND agent_id = ?2",
            params![path, agent_id],
        ) {
            warn!(path, error = %e, "lock release failed");
        }
    }

    /// Drop every lock owned by `agent_id`; used during teardown.
    pub fn release_all(&self, agent_id: &str) {
        let conn = self.lock_conn();
        if let Err(e) = conn.execute("DELETE FROM locks WHERE agent_id = ?1", params![agent_id]) {
            warn!(agent_id, error = %e, "bulk lock release failed");
        }
    }

    /// Read-only write check: same logic as acquisition, no state change.
    /// Coordinator-mode requesters are denied unconditionally.
    pub fn validate_write(&self, path: &str, requester: &LockOwner) -> WriteDecision {
        if requester.coordinator {
            return WriteDecision::Denied {
                holder: None,
                reason: DenyReason::Coordinator,
            };
        }
        let conn = self.lock_conn();
        match query_lock(&conn, path) {
            Ok(None) => WriteDecision::Allowed,
            Ok(Some(holder)) => {
                if holder.agent_id == requester.agent_id || lock_is_stale(&holder) {
                    WriteDecision::Allowed
                } else {
                    WriteDecision::Denied {
                        holder: Some(holder),
                        reason: DenyReason::Held,
                    }
                }
            }
            Err(e) => {
                warn!(path, error = %e, "write validation failed internally; denying");
                WriteDecision::Denied {
                    holder: None,
                    reason: DenyReason::Internal,
                }
            }
        }
    }

    /// Append one modification-log row.
    pub fn record_modification(
        &self,
        path: &str,
        agent_id: &str,
        task_id: Option<&str>,
        kind: ChangeKind,
        intent: &str,
    ) -> Result<(), SafetyError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO modifications (path, agent_id, task_id, kind, intent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                path,
                agent_id,
                task_id,
                kind.as_str(),
                intent,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Modification history for a path since `since`, oldest first.
    pub fn recent_modifications(
        &self,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Modification>, SafetyError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT path, agent_id, task_id, kind, intent, created_at
             FROM modifications
             WHERE path = ?1 AND created_at >= ?2
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![path, since.to_rfc3339()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (path, agent_id, task_id, kind, intent, created_at) = row?;
            out.push(Modification {
                path,
                agent_id,
                task_id,
                kind: ChangeKind::parse(&kind)
                    .ok_or_else(|| SafetyError::Timestamp(format!("bad change kind {kind}")))?,
                intent,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(out)
    }

    /// Scan all locks, drop the stale ones, return the reclaimed paths.
    pub fn reclaim_stale(&self) -> Result<Vec<String>, SafetyError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT path, agent_id, agent_kind, pid, intent, acquired_at, expires_at
                 FROM locks",
            )?;
            let rows = stmt.query_map([], row_to_lock)?;
            let mut stale = Vec::new();
            for row in rows {
                let lock = lock_from_row(row?)?;
                if lock_is_stale(&lock) {
                    stale.push(lock.path);
                }
            }
            stale
        };
        for path in &stale {
            tx.execute("DELETE FROM locks WHERE path = ?1", params![path])?;
        }
        tx.commit()?;
        Ok(stale)
    }

    /// Trim modification-log rows older than the retention window.
    pub fn prune_modifications(&self, retention: Option<Duration>) -> Result<usize, SafetyError> {
        let cutoff = Utc::now()
            - retention
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .unwrap_or_else(|| chrono::Duration::days(RETENTION_DAYS));
        let conn = self.lock_conn();
        let n = conn.execute(
            "DELETE FROM modifications WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    /// The current lock on `path`, live or not.
    pub fn lock_holder(&self, path: &str) -> Result<Option<LockRecord>, SafetyError> {
        let conn = self.lock_conn();
        query_lock(&conn, path)
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_is_stale(lock: &LockRecord) -> bool {
    lock.expires_at <= Utc::now() || !process_alive(lock.pid)
}

type LockRow = (String, String, String, u32, String, String, String);

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<LockRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn lock_from_row(row: LockRow) -> Result<LockRecord, SafetyError> {
    let (path, agent_id, agent_kind, pid, intent, acquired_at, expires_at) = row;
    Ok(LockRecord {
        path,
        agent_id,
        agent_kind,
        pid,
        intent,
        acquired_at: parse_ts(&acquired_at)?,
        expires_at: parse_ts(&expires_at)?,
    })
}

fn query_lock(conn: &Connection, path: &str) -> Result<Option<LockRecord>, SafetyError> {
    let row = conn
        .query_row(
            "SELECT path, agent_id, agent_kind, pid, intent, acquired_at, expires_at
             FROM locks WHERE path = ?1",
            params![path],
            row_to_lock,
        )
        .optional()?;
    row.map(lock_from_row).transpose()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, SafetyError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SafetyError::Timestamp(format!("{s}: {e}")))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SafetyStore {
        SafetyStore::open(":memory:").expect("in-memory db should initialize")
    }

    fn me() -> LockOwner {
        LockOwner::new("svea-claude-8100", "claude", std::process::id())
    }

    fn other_live() -> LockOwner {
        // Another agent whose pid is alive (our own pid under a different
        // identity is good enough for the liveness probe).
        LockOwner::new("svea-gemini-8110", "gemini", std::process::id())
    }

    const TTL: Duration = Duration::from_secs(600);

    #[test]
    fn acquire_then_conflicting_acquire_is_denied_with_holder() {
        let s = store();
        assert!(s.acquire("/tmp/f.txt", &me(), "edit", TTL).is_acquired());

        match s.acquire("/tmp/f.txt", &other_live(), "edit", TTL) {
            AcquireOutcome::Denied {
                holder: Some(h),
                reason: DenyReason::Held,
            } => assert_eq!(h.agent_id, "svea-claude-8100"),
            other => panic!("expected denial with holder, got {other:?}"),
        }
    }

    #[test]
    fn reacquire_own_lock_refreshes() {
        let s = store();
        assert!(s.acquire("/tmp/f.txt", &me(), "edit", TTL).is_acquired());
        let again = s.acquire("/tmp/f.txt", &me(), "edit", TTL);
        assert!(matches!(again, AcquireOutcome::Acquired { reclaimed: None }));
    }

    #[test]
    fn dead_holder_is_reclaimed() {
        let s = store();
        let ghost = LockOwner::new("svea-claude-8105", "claude", 4_000_000);
        assert!(s.acquire("/tmp/f.txt", &ghost, "edit", TTL).is_acquired());

        match s.acquire("/tmp/f.txt", &me(), "edit", TTL) {
            AcquireOutcome::Acquired {
                reclaimed: Some(prev),
            } => assert_eq!(prev.agent_id, "svea-claude-8105"),
            other => panic!("expected reclaim, got {other:?}"),
        }
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let s = store();
        assert!(s
            .acquire("/tmp/f.txt", &other_live(), "edit", Duration::ZERO)
            .is_acquired());
        assert!(s.acquire("/tmp/f.txt", &me(), "edit", TTL).is_acquired());
    }

    #[test]
    fn release_returns_lock_to_acquirable_state() {
        let s = store();
        assert!(s.acquire("/tmp/f.txt", &me(), "edit", TTL).is_acquired());
        s.release("/tmp/f.txt", "svea-claude-8100");
        assert!(s
            .acquire("/tmp/f.txt", &other_live(), "edit", TTL)
            .is_acquired());
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let s = store();
        s.release("/tmp/nothing.txt", "svea-claude-8100");
        // Releasing under the wrong identity leaves the lock in place.
        assert!(s.acquire("/tmp/f.txt", &me(), "edit", TTL).is_acquired());
        s.release("/tmp/f.txt", "svea-gemini-8110");
        assert!(s.lock_holder("/tmp/f.txt").unwrap().is_some());
    }

    #[test]
    fn validate_write_tracks_lock_state() {
        let s = store();
        assert_eq!(s.validate_write("/tmp/f.txt", &me()), WriteDecision::Allowed);

        assert!(s
            .acquire("/tmp/f.txt", &other_live(), "edit", TTL)
            .is_acquired());
        match s.validate_write("/tmp/f.txt", &me()) {
            WriteDecision::Denied {
                holder: Some(h), ..
            } => assert_eq!(h.agent_id, "svea-gemini-8110"),
            other => panic!("expected denial, got {other:?}"),
        }

        // Holding agent may write.
        assert_eq!(
            s.validate_write("/tmp/f.txt", &other_live()),
            WriteDecision::Allowed
        );
    }

    #[test]
    fn coordinator_is_always_denied() {
        let s = store();
        let mut boss = me();
        boss.coordinator = true;
        assert!(matches!(
            s.validate_write("/tmp/f.txt", &boss),
            WriteDecision::Denied {
                reason: DenyReason::Coordinator,
                ..
            }
        ));
    }

    #[test]
    fn modification_history_survives_reclaim() {
        let s = store();
        let ghost = LockOwner::new("svea-claude-8105", "claude", 4_000_000);
        assert!(s.acquire("/tmp/f.txt", &ghost, "edit", TTL).is_acquired());
        s.record_modification("/tmp/f.txt", "svea-claude-8105", Some("t1"), ChangeKind::Modify, "edit")
            .unwrap();

        assert!(s.acquire("/tmp/f.txt", &me(), "edit", TTL).is_acquired());

        let since = Utc::now() - chrono::Duration::hours(1);
        let history = s.recent_modifications("/tmp/f.txt", since).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].agent_id, "svea-claude-8105");
        assert_eq!(history[0].kind, ChangeKind::Modify);
    }

    #[test]
    fn reclaim_stale_reports_paths() {
        let s = store();
        let ghost = LockOwner::new("svea-claude-8105", "claude", 4_000_000);
        assert!(s.acquire("/tmp/a.txt", &ghost, "edit", TTL).is_acquired());
        assert!(s.acquire("/tmp/b.txt", &me(), "edit", TTL).is_acquired());

        let reclaimed = s.reclaim_stale().unwrap();
        assert_eq!(reclaimed, vec!["/tmp/a.txt".to_string()]);
        assert!(s.lock_holder("/tmp/a.txt").unwrap().is_none());
        assert!(s.lock_holder("/tmp/b.txt").unwrap().is_some());
    }

    #[test]
    fn release_all_drops_only_own_locks() {
        let s = store();
        assert!(s.acquire("/tmp/a.txt", &me(), "edit", TTL).is_acquired());
        assert!(s.acquire("/tmp/b.txt", &me(), "edit", TTL).is_acquired());
        assert!(s.acquire("/tmp/c.txt", &other_live(), "edit", TTL).is_acquired());

        s.release_all("svea-claude-8100");
        assert!(s.lock_holder("/tmp/a.txt").unwrap().is_none());
        assert!(s.lock_holder("/tmp/b.txt").unwrap().is_none());
        assert!(s.lock_holder("/tmp/c.txt").unwrap().is_some());
    }

    #[test]
    fn prune_drops_old_rows_only() {
        let s = store();
        s.record_modification("/tmp/f.txt", "svea-claude-8100", None, ChangeKind::Create, "init")
            .unwrap();
        // Nothing is older than 30 days yet.
        assert_eq!(s.prune_modifications(None).unwrap(), 0);
        // With a zero retention everything goes.
        assert_eq!(s.prune_modifications(Some(Duration::ZERO)).unwrap(), 1);
    }

    #[test]
    fn wait_mode_times_out_against_live_holder() {
        let s = store();
        assert!(s
            .acquire("/tmp/f.txt", &other_live(), "edit", TTL)
            .is_acquired());
        let start = Instant::now();
        let outcome = s.acquire_wait(
            "/tmp/f.txt",
            &me(),
            "edit",
            TTL,
            Duration::from_millis(200),
            Duration::from_millis(450),
        );
        assert!(!outcome.is_acquired());
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
