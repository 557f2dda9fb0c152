// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::json;
use tracing::{debug, info, warn};

use svea_protocol::{
    ErrorBody, Message, Priority, SenderDescriptor, Task, TaskMetadata,
};
use svea_registry::{AgentEntry, Registry, ReplyStore, ReplyTarget};

use crate::identity::resolve_self;
use crate::transport::{request_tcp, request_uds, HttpReply, Transport};
use crate::ClientError;

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub priority: Priority,
    pub response_expected: bool,
    pub in_reply_to: Option<String>,
    /// Explicit caller identity; resolved via env/ancestry when absent.
    pub from: Option<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            response_expected: false,
            in_reply_to: None,
            from: None,
        }
    }
}

#[derive(Debug)]
pub struct SendOutcome {
    pub task: Task,
    pub transport: Transport,
    /// The task minted on the sender's own server to receive the reply.
    pub sender_task_id: Option<String>,
}

#[derive(Debug)]
pub struct ReplyOutcome {
    pub task: Task,
    /// Who the reply went to.
    pub sender_id: String,
}

pub struct Client {
    registry: Registry,
    /// Outbound TCP is blocked; UDS failures become terminal.
    sandbox: bool,
}

impl Client {
    pub fn new(registry: Registry, sandbox: bool) -> Self {
        Self { registry, sandbox }
    }

    /// Send a message to a registry-resolvable local agent.
    pub async fn send_to_local(
        &self,
        target_spec: &str,
        text: &str,
        opts: SendOptions,
    ) -> Result<SendOutcome, ClientError> {
        let target = self.registry.resolve(target_spec)?;
        let me = resolve_self(&self.registry, opts.from.as_deref())?;

        // Mint a sender-side task so the receiver can target its reply.
        let sender_task_id = if opts.response_expected {
            self.mint_reply_task(&me, target_spec).await
        } else {
            None
        };

        let metadata = TaskMetadata {
            sender: Some(SenderDescriptor {
                id: me.agent_id.clone(),
                kind: me.kind.clone(),
                url: me.url.clone(),
                uds_path: me.uds_path.clone(),
                task_id: sender_task_id.clone(),
            }),
            response_expected: opts.response_expected,
            sender_task_id: sender_task_id.clone(),
            in_reply_to: opts.in_reply_to.clone(),
        };
        let body = json!({
            "message": Message::user_text(text),
            "metadata": metadata,
        });

        let route = if opts.priority == Priority::NORMAL {
            "/tasks/send".to_string()
        } else {
            format!("/tasks/send-priority?priority={}", opts.priority.get())
        };

        let (reply, transport) = self.post_with_fallback(&target, &route, &body).await?;
        let task = parse_task(&target.agent_id, reply)?;

        // Observability stamps on both ends; never gates delivery.
        let _ = self
            .registry
            .update(&me.agent_id, |e| e.stamp_transport(transport.as_str()));
        let _ = self
            .registry
            .update(&target.agent_id, |e| e.stamp_transport(transport.as_str()));

        info!(target = %target.agent_id, task = %task.id, transport = transport.as_str(), "sent");
        Ok(SendOutcome {
            task,
            transport,
            sender_task_id,
        })
    }

    /// Send to an agent that is not in the local registry.
    pub async fn send_to_external(&self, url: &str, text: &str) -> Result<Task, ClientError> {
        let body = json!({ "message": Message::user_text(text) });
        let reply = request_tcp(url, hyper::Method::POST, "/tasks/send", Some(&body))
            .await
            .map_err(|e| ClientError::Transport {
                target: url.to_string(),
                detail: e.to_string(),
            })?;
        let task = parse_task(url, reply)?;
        if let Err(e) = self.registry.record_external(url, url) {
            warn!(url, error = %e, "could not record external peer");
        }
        Ok(task)
    }

    /// Answer the most recent asker (or a specific one), then forget it.
    pub async fn reply(
        &self,
        text: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<ReplyOutcome, ClientError> {
        let me = resolve_self(&self.registry, from)?;
        let store = ReplyStore::open(self.registry.reply_path(&me.agent_id));

        let (sender_id, record) = match to {
            Some(sender) => store
                .get(sender)
                .map(|r| (sender.to_string(), r))
                .ok_or(ClientError::NoPendingReplies)?,
            None => store.peek_last().ok_or(ClientError::NoPendingReplies)?,
        };

        let metadata = TaskMetadata {
            sender: Some(SenderDescriptor {
                id: me.agent_id.clone(),
                kind: me.kind.clone(),
                url: me.url.clone(),
                uds_path: me.uds_path.clone(),
                task_id: None,
            }),
            response_expected: false,
            sender_task_id: None,
            in_reply_to: record.task_id.clone(),
        };
        let body = json!({
            "message": Message::user_text(text),
            "metadata": metadata,
        });

        // The asker may have unregistered since; its recorded endpoint is
        // still the best address we have.
        let pseudo = AgentEntry {
            uds_path: record.uds_path.clone(),
            url: record.url.clone(),
            ..AgentEntry::new(sender_id.clone(), String::new(), 0)
        };
        let (reply, _transport) = self
            .post_with_fallback(&pseudo, "/tasks/send", &body)
            .await?;
        let task = parse_task(&sender_id, reply)?;

        // Only a delivered reply consumes the record.
        store.pop(&sender_id);
        info!(to = %sender_id, task = %task.id, "replied");
        Ok(ReplyOutcome { task, sender_id })
    }

    /// All pending reply targets for the calling agent, oldest first.
    pub fn pending_replies(
        &self,
        from: Option<&str>,
    ) -> Result<Vec<(String, ReplyTarget)>, ClientError> {
        let me = resolve_self(&self.registry, from)?;
        let store = ReplyStore::open(self.registry.reply_path(&me.agent_id));
        Ok(store.list())
    }

    /// POST to the target, preferring its Unix socket, with one retry on
    /// the alternative transport.
    async fn post_with_fallback(
        &self,
        target: &AgentEntry,
        route: &str,
        body: &serde_json::Value,
    ) -> Result<(HttpReply, Transport), ClientError> {
        let socket = target
            .uds_path
            .as_deref()
            .map(std::path::Path::new)
            .filter(|p| p.exists());

        if let Some(socket) = socket {
            match request_uds(socket, hyper::Method::POST, route, Some(body)).await {
                Ok(reply) => return Ok((reply, Transport::Uds)),
                Err(e) if self.sandbox => {
                    warn!(target = %target.agent_id, error = %e, "uds failed in sandbox mode");
                    return Err(ClientError::SandboxExhausted);
                }
                Err(e) => {
                    debug!(target = %target.agent_id, error = %e, "uds failed, falling back to tcp");
                }
            }
        } else if self.sandbox {
            return Err(ClientError::SandboxExhausted);
        }

        match request_tcp(&target.url, hyper::Method::POST, route, Some(body)).await {
            Ok(reply) => Ok((reply, Transport::Tcp)),
            Err(e) => Err(ClientError::Transport {
                target: target.agent_id.clone(),
                detail: e.to_string(),
            }),
        }
    }

    /// `POST /tasks/create` on the sender's *own* server: allocate the
    /// task that will accept the incoming reply. Best-effort; a failure
    /// degrades reply linkage, not delivery.
    async fn mint_reply_task(&self, me: &AgentEntry, target_spec: &str) -> Option<String> {
        let body = json!({
            "message": {
                "role": "agent",
                "parts": [{"type": "text", "text": format!("awaiting reply from {target_spec}")}],
            },
        });
        match self.post_with_fallback(me, "/tasks/create", &body).await {
            Ok((reply, _)) if reply.is_success() => reply
                .body
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from),
            Ok((reply, _)) => {
                warn!(status = reply.status, "sender-side task creation refused");
                None
            }
            Err(e) => {
                warn!(error = %e, "sender-side task creation unreachable");
                None
            }
        }
    }
}

/// Success → Task; error status → the structured `ErrorBody` the server
/// sent, surfaced as [`ClientError::Api`].
fn parse_task(target: &str, reply: HttpReply) -> Result<Task, ClientError> {
    if reply.is_success() {
        return serde_json::from_value(reply.body).map_err(|e| ClientError::BadResponse {
            target: target.to_string(),
            detail: e.to_string(),
        });
    }
    match serde_json::from_value::<ErrorBody>(reply.body) {
        Ok(err) => Err(ClientError::Api {
            target: target.to_string(),
            code: err.code,
            message: err.message,
        }),
        Err(e) => Err(ClientError::BadResponse {
            target: target.to_string(),
            detail: format!("status {}: {e}", reply.status),
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
