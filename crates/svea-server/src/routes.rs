// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use svea_protocol::{
    AgentCard, Message, Task, TaskMetadata, TaskState,
};
use svea_pty::{AgentState, InjectRequest, Priority};
use svea_registry::ReplyTarget;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/agent.json", get(agent_card))
        .route("/tasks/send", post(send_task))
        .route("/tasks/send-priority", post(send_task_priority))
        .route("/tasks/create", post(create_task))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/cancel", post(cancel_task))
        .route("/status", get(status))
        .route("/reply-stack/get", get(reply_get))
        .route("/reply-stack/pop", get(reply_pop))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ── Request / response bodies ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SendTaskRequest {
    pub message: Message,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub context_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityParam {
    pub priority: u8,
}

#[derive(Debug, Deserialize)]
pub struct SenderParam {
    pub sender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub state: Option<TaskState>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub agent_id: String,
    pub state: AgentState,
}

#[derive(Debug, Serialize)]
pub struct ReplyTargetResponse {
    pub sender_id: String,
    #[serde(flatten)]
    pub target: ReplyTarget,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn agent_card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        agent_id: state.agent_id.clone(),
        state: state.supervisor.state(),
    })
}

async fn send_task(
    State(state): State<AppState>,
    Json(req): Json<SendTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    deliver(state, req, Priority::NORMAL).await
}

async fn send_task_priority(
    State(state): State<AppState>,
    Query(params): Query<PriorityParam>,
    Json(req): Json<SendTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let priority = Priority::new(params.priority).ok_or(ApiError::BadPriority(params.priority))?;
    deliver(state, req, priority).await
}

/// The delivery pipeline: identify the sender, track the reply target,
/// mint the task, hand the payload to the supervisor, return immediately.
async fn deliver(
    state: AppState,
    req: SendTaskRequest,
    priority: Priority,
) -> Result<Json<Task>, ApiError> {
    let text = req.message.text();
    if text.is_empty() {
        return Err(ApiError::Validation("message has no text part".into()));
    }
    let response_expected = req.metadata.response_expected;

    // Reply-target capture: only reply-expecting messages from minimally
    // valid senders are tracked; everything else is delivered untracked.
    if response_expected {
        if let Some(sender) = req.metadata.sender.as_ref().filter(|s| s.is_minimal()) {
            let task_id = sender
                .task_id
                .clone()
                .or_else(|| req.metadata.sender_task_id.clone());
            state.replies.set(
                &sender.id,
                ReplyTarget {
                    url: sender.url.clone(),
                    uds_path: sender.uds_path.clone(),
                    task_id,
                    inserted_at: Utc::now(),
                },
            );
            debug!(sender = %sender.id, "reply target recorded");
        }
    }

    let mut task = Task::new(req.message, req.metadata);
    task.context_id = req.context_id;
    state.tasks.insert(task.clone());

    let mut inject = InjectRequest::message(text, priority, response_expected);
    inject.task_id = Some(task.id.clone());
    if let Err(e) = state.supervisor.inject(inject).await {
        tracing::error!(task = %task.id, error = %e, "injection failed");
        let _ = state.tasks.fail(&task.id);
        return Err(ApiError::SupervisorGone);
    }

    let task = state.tasks.transition(&task.id, TaskState::Working)?;
    info!(task = %task.id, priority = priority.get(), "task accepted");

    // Mark the list view while the wrapped program chews on it.
    let preview: String = task.message.text().chars().take(48).collect();
    let _ = state
        .registry
        .update(&state.agent_id, |e| e.current_task = Some(preview));

    Ok(Json(task))
}

/// Create a task record without delivering it to the PTY. Senders call
/// this on their own server to allocate the task that will receive an
/// incoming reply.
async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<SendTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let mut task = Task::new(req.message, req.metadata);
    task.context_id = req.context_id;
    state.tasks.insert(task.clone());
    debug!(task = %task.id, "task created without delivery");
    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Task>> {
    Json(state.tasks.list(params.state))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.get_by_prefix(&id)?))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = state.tasks.cancel(&id)?;
    info!(task = %task.id, "task canceled");
    Ok(Json(task))
}

async fn reply_get(
    State(state): State<AppState>,
    Query(params): Query<SenderParam>,
) -> Result<Json<ReplyTargetResponse>, ApiError> {
    let found = match &params.sender {
        Some(sender) => state
            .replies
            .get(sender)
            .map(|t| (sender.clone(), t)),
        None => state.replies.peek_last(),
    };
    found
        .map(|(sender_id, target)| Json(ReplyTargetResponse { sender_id, target }))
        .ok_or_else(|| ApiError::TargetNotFound("no pending reply targets".into()))
}

async fn reply_pop(
    State(state): State<AppState>,
    Query(params): Query<SenderParam>,
) -> Result<Json<ReplyTargetResponse>, ApiError> {
    let sender_id = match &params.sender {
        Some(sender) => sender.clone(),
        None => state
            .replies
            .peek_last()
            .map(|(id, _)| id)
            .ok_or_else(|| ApiError::TargetNotFound("no pending reply targets".into()))?,
    };
    state
        .replies
        .pop(&sender_id)
        .map(|target| Json(ReplyTargetResponse { sender_id, target }))
        .ok_or_else(|| ApiError::TargetNotFound("no pending reply targets".into()))
}
