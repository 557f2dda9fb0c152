// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use indexmap::IndexMap;
use thiserror::Error;

use svea_protocol::{Task, TaskState, TransitionError};

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("unknown task '{0}'")]
    Unknown(String),

    #[error("task prefix '{prefix}' matches {} tasks", candidates.len())]
    Ambiguous {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// In-memory catalog of this agent's tasks, insertion-ordered.
///
/// Nothing survives a restart; the registry and reply files are the only
/// durable state an agent keeps.
#[derive(Debug, Default)]
pub struct TaskStore {
    inner: Mutex<IndexMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.lock().insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().get(id).cloned()
    }

    /// Exact-or-prefix lookup. Unique prefixes of any length match; a
    /// prefix shared by several tasks is a collision listing the full
    /// conflicting identifiers.
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Task, TaskStoreError> {
        let map = self.lock();
        if let Some(task) = map.get(prefix) {
            return Ok(task.clone());
        }
        let matches: Vec<&Task> = map.values().filter(|t| t.id.starts_with(prefix)).collect();
        match matches.len() {
            0 => Err(TaskStoreError::Unknown(prefix.to_string())),
            1 => Ok(matches[0].clone()),
            _ => Err(TaskStoreError::Ambiguous {
                prefix: prefix.to_string(),
                candidates: matches.iter().map(|t| t.id.clone()).collect(),
            }),
        }
    }

    /// Transition a task (full id) and return the updated copy.
    pub fn transition(&self, id: &str, to: TaskState) -> Result<Task, TaskStoreError> {
        let mut map = self.lock();
        let task = map
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::Unknown(id.to_string()))?;
        task.transition(to)?;
        Ok(task.clone())
    }

    pub fn complete(&self, id: &str) -> Result<Task, TaskStoreError> {
        self.transition(id, TaskState::Completed)
    }

    pub fn fail(&self, id: &str) -> Result<Task, TaskStoreError> {
        self.transition(id, TaskState::Failed)
    }

    /// Cancel by prefix; terminal tasks refuse.
    pub fn cancel(&self, prefix: &str) -> Result<Task, TaskStoreError> {
        let id = self.get_by_prefix(prefix)?.id;
        self.transition(&id, TaskState::Canceled)
    }

    /// All tasks, oldest first, optionally filtered by state.
    pub fn list(&self, state: Option<TaskState>) -> Vec<Task> {
        self.lock()
            .values()
            .filter(|t| state.map_or(true, |s| t.state == s))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, Task>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use svea_protocol::{Message, TaskMetadata};

    fn task_with_id(id: &str) -> Task {
        let mut t = Task::new(Message::user_text("x"), TaskMetadata::default());
        t.id = id.to_string();
        t
    }

    #[test]
    fn unique_prefix_matches_at_any_length() {
        let store = TaskStore::new();
        store.insert(task_with_id("aabbccdd00112233aabbccdd00112233"));
        store.insert(task_with_id("ffeeddcc00112233aabbccdd00112233"));

        assert_eq!(
            store.get_by_prefix("a").unwrap().id,
            "aabbccdd00112233aabbccdd00112233"
        );
        assert_eq!(
            store.get_by_prefix("aabbccdd").unwrap().id,
            "aabbccdd00112233aabbccdd00112233"
        );
    }

    #[test]
    fn shared_prefix_is_a_collision_listing_full_ids() {
        let store = TaskStore::new();
        store.insert(task_with_id("aabb0000000000000000000000000001"));
        store.insert(task_with_id("aabb0000000000000000000000000002"));

        match store.get_by_prefix("aabb") {
            Err(TaskStoreError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].len() == 32 && candidates[1].len() == 32);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
        // Eight characters disambiguate per the identifier contract.
        assert!(store.get_by_prefix("aabb0000000000000000000000000001").is_ok());
    }

    #[test]
    fn unknown_prefix_is_not_found() {
        let store = TaskStore::new();
        assert!(matches!(
            store.get_by_prefix("dead"),
            Err(TaskStoreError::Unknown(_))
        ));
    }

    #[test]
    fn cancel_respects_terminal_states() {
        let store = TaskStore::new();
        let t = task_with_id("aabbccdd00112233aabbccdd00112233");
        store.insert(t);
        store.transition("aabbccdd00112233aabbccdd00112233", TaskState::Working)
            .unwrap();
        store.complete("aabbccdd00112233aabbccdd00112233").unwrap();

        assert!(matches!(
            store.cancel("aabbccdd"),
            Err(TaskStoreError::Transition(_))
        ));
    }

    #[test]
    fn list_filters_by_state() {
        let store = TaskStore::new();
        store.insert(task_with_id("aa000000000000000000000000000000"));
        store.insert(task_with_id("bb000000000000000000000000000000"));
        store
            .transition("aa000000000000000000000000000000", TaskState::Working)
            .unwrap();

        assert_eq!(store.list(None).len(), 2);
        assert_eq!(store.list(Some(TaskState::Working)).len(), 1);
        assert_eq!(store.list(Some(TaskState::Submitted)).len(), 1);
    }
}
