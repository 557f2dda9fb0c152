// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The helper-tool command surface: `send`, `reply`, `list`, `safety`.
//!
//! These run as short-lived processes, typically spawned by the wrapped
//! program itself, and speak to running agents through the registry and
//! the client.

use std::time::Duration;

use anyhow::Context;

use crate::cli::{Cli, SafetyCommands};
use svea_client::{resolve_self, Client, ClientError, SendOptions};
use svea_protocol::Priority;
use svea_registry::Registry;
use svea_safety::{AcquireOutcome, LockOwner, SafetyStore, WriteDecision};

fn open_registry(cli: &Cli) -> anyhow::Result<(Registry, bool)> {
    let config = svea_config::load(cli.config.as_deref())?;
    let root = config.a2a_root();
    let registry = Registry::open(root.join("registry")).context("opening registry")?;
    Ok((registry, config.sandbox))
}

pub async fn send(
    cli: &Cli,
    target: &str,
    message: &str,
    from: Option<&str>,
    priority: u8,
    response: bool,
    reply_to: Option<String>,
) -> anyhow::Result<()> {
    let priority = Priority::new(priority)
        .with_context(|| format!("priority must be 1-5, got {priority}"))?;
    let (registry, sandbox) = open_registry(cli)?;
    let client = Client::new(registry, sandbox);

    let outcome = client
        .send_to_local(
            target,
            message,
            SendOptions {
                priority,
                response_expected: response,
                in_reply_to: reply_to,
                from: from.map(String::from),
            },
        )
        .await?;

    println!(
        "sent to {} as task {} ({})",
        target,
        &outcome.task.id[..8],
        outcome.transport.as_str()
    );
    if let Some(id) = outcome.sender_task_id {
        println!("reply will arrive on task {}", &id[..8]);
    }
    Ok(())
}

pub async fn reply(
    cli: &Cli,
    message: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<()> {
    let (registry, sandbox) = open_registry(cli)?;
    let client = Client::new(registry, sandbox);

    match client.reply(message, from, to).await {
        Ok(outcome) => {
            println!(
                "replied to {} (their task {})",
                outcome.sender_id,
                &outcome.task.id[..8]
            );
            Ok(())
        }
        Err(ClientError::NoPendingReplies) => {
            println!("No pending messages to reply to");
            Err(ClientError::NoPendingReplies.into())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn safety(cli: &Cli, cmd: &SafetyCommands) -> anyhow::Result<()> {
    let config = svea_config::load(cli.config.as_deref())?;
    let root = config.a2a_root();
    let registry = Registry::open(root.join("registry"))?;
    let store = SafetyStore::open(root.join("safety.db"))?;

    // The lock owner is the *agent*, not this helper process: liveness and
    // stale reclamation key on the supervisor's PID.
    let owner = |from: Option<&str>| -> anyhow::Result<LockOwner> {
        let me = resolve_self(&registry, from)?;
        let mut owner = LockOwner::new(me.agent_id, me.kind, me.pid);
        owner.coordinator = std::env::var("SVEA_COORDINATOR").is_ok_and(|v| v == "1");
        Ok(owner)
    };

    match cmd {
        SafetyCommands::Lock {
            path,
            intent,
            ttl_secs,
            wait_secs,
            from,
        } => {
            let owner = owner(from.as_deref())?;
            let path = path.display().to_string();
            let ttl = Duration::from_secs(*ttl_secs);
            let outcome = match wait_secs {
                Some(secs) => store.acquire_wait(
                    &path,
                    &owner,
                    intent,
                    ttl,
                    Duration::from_millis(500),
                    Duration::from_secs(*secs),
                ),
                None => store.acquire(&path, &owner, intent, ttl),
            };
            match outcome {
                AcquireOutcome::Acquired { reclaimed } => {
                    if let Some(prev) = reclaimed {
                        println!("locked {path} (reclaimed stale lock from {})", prev.agent_id);
                    } else {
                        println!("locked {path}");
                    }
                    Ok(())
                }
                AcquireOutcome::Denied { holder, .. } => {
                    match holder {
                        Some(h) => anyhow::bail!(
                            "{path} is locked by {} until {} ({})",
                            h.agent_id,
                            h.expires_at.to_rfc3339(),
                            if h.intent.is_empty() { "no intent given" } else { h.intent.as_str() },
                        ),
                        None => anyhow::bail!("{path} could not be locked"),
                    }
                }
            }
        }

        SafetyCommands::Unlock { path, from } => {
            let owner = owner(from.as_deref())?;
            store.release(&path.display().to_string(), &owner.agent_id);
            println!("released {}", path.display());
            Ok(())
        }

        SafetyCommands::Check { path, from } => {
            let owner = owner(from.as_deref())?;
            match store.validate_write(&path.display().to_string(), &owner) {
                WriteDecision::Allowed => {
                    println!("write allowed");
                    Ok(())
                }
                WriteDecision::Denied { holder, reason } => match holder {
                    Some(h) => anyhow::bail!("write denied: locked by {}", h.agent_id),
                    None => anyhow::bail!("write denied: {reason:?}"),
                },
            }
        }

        SafetyCommands::Record {
            path,
            kind,
            intent,
            task,
            from,
        } => {
            let owner = owner(from.as_deref())?;
            let kind = svea_safety::ChangeKind::parse(kind)
                .with_context(|| format!("change kind must be create|modify|delete, got '{kind}'"))?;
            store.record_modification(
                &path.display().to_string(),
                &owner.agent_id,
                task.as_deref(),
                kind,
                intent,
            )?;
            Ok(())
        }

        SafetyCommands::History { path, hours } => {
            let since = chrono::Utc::now() - chrono::Duration::hours(*hours as i64);
            let mods = store.recent_modifications(&path.display().to_string(), since)?;
            if mods.is_empty() {
                println!("no recorded changes in the last {hours}h");
                return Ok(());
            }
            for m in mods {
                println!(
                    "{}  {:<8} {:<24} {}",
                    m.created_at.to_rfc3339(),
                    m.kind.as_str(),
                    m.agent_id,
                    if m.intent.is_empty() { "-" } else { m.intent.as_str() },
                );
            }
            Ok(())
        }
    }
}

pub fn list(cli: &Cli) -> anyhow::Result<()> {
    let (registry, _) = open_registry(cli)?;
    let live = registry.list_live()?;
    if live.is_empty() {
        println!("no agents running");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<12} {:<8} {:<5} {}",
        "AGENT", "KIND", "NAME", "VIA", "PID", "WORKING ON"
    );
    for entry in live {
        println!(
            "{:<24} {:<10} {:<12} {:<8} {:<5} {}",
            entry.agent_id,
            entry.kind,
            entry.display_name.as_deref().unwrap_or("-"),
            entry.fresh_transport().unwrap_or("-"),
            entry.pid,
            entry.current_task.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
