// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent bootstrap — assembles all subsystems and runs them.
//!
//! # Startup sequence
//!
//! 1. Load config, look up the requested profile.
//! 2. Bind a free TCP port inside the profile's reserved band; the port
//!    becomes part of the agent identifier.
//! 3. Spawn the PTY supervisor around the wrapped program.
//! 4. Serve the router on the TCP listener and the per-agent Unix socket.
//! 5. Enroll in the host-shared registry.
//! 6. On the supervisor's first `ready`, inject the profile's initial
//!    instructions (approval-gated when configured and interactive).
//! 7. Run until SIGTERM or child exit; SIGINT is forwarded into the PTY,
//!    never consumed.
//! 8. Teardown: unregister, release owned locks, remove the socket and
//!    reply files, restore the terminal.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use svea_config::{ApprovalMode, Profile};
use svea_protocol::{AgentCapabilities, AgentCard, SYSTEM};
use svea_pty::{AgentState, InjectRequest, Supervisor, SupervisorOptions};
use svea_registry::{AgentEntry, AgentStatus, Registry, ReplyStore};
use svea_safety::SafetyStore;
use svea_server::{router, serve_uds, AppState, TaskStore};

use crate::cli::Cli;

pub async fn run(
    cli: &Cli,
    kind: &str,
    display_name: Option<String>,
    role: Option<String>,
) -> anyhow::Result<()> {
    let config = svea_config::load(cli.config.as_deref())?;
    let profile = config
        .profile(kind)
        .with_context(|| format!("unknown profile '{kind}' (see `svea show-config`)"))?;

    // ── Port assignment inside the profile band ───────────────────────────────
    let (tcp_listener, port) = bind_in_band(&profile).await?;
    let agent_id = format!("{SYSTEM}-{kind}-{port}");
    info!(%agent_id, port, "agent identity assigned");

    // ── Shared on-disk state ──────────────────────────────────────────────────
    let root = config.a2a_root();
    let registry = Registry::open(root.join("registry")).context("opening registry")?;
    let replies = Arc::new(ReplyStore::open(registry.reply_path(&agent_id)));
    let tasks = Arc::new(TaskStore::new());
    let safety = SafetyStore::open(root.join("safety.db")).context("opening safety store")?;
    let uds_path = socket_path(&root, &agent_id);
    let spool_dir = root.join("messages").join(&agent_id);

    // ── Approval for the startup handshake ────────────────────────────────────
    let interactive = std::io::stdin().is_terminal();
    let inject_instructions = match (config.approval, interactive) {
        (ApprovalMode::Ask, true) => confirm_instructions(&agent_id)?,
        // Non-interactive startup implies auto.
        _ => true,
    };

    // ── PTY supervisor ────────────────────────────────────────────────────────
    let (supervisor, events) = Supervisor::spawn(SupervisorOptions {
        profile: profile.clone(),
        agent_id: agent_id.clone(),
        spool_dir,
        mirror_output: true,
        forward_stdin: interactive,
    })
    .context("pseudo-terminal unavailable; svea cannot run on this platform")?;
    let svea_pty::SupervisorEvents {
        mut completions,
        mut exit,
        raw_guard,
    } = events;

    // ── Server: one router, two listeners ─────────────────────────────────────
    let card = AgentCard {
        name: display_name.clone().unwrap_or_else(|| agent_id.clone()),
        description: role
            .clone()
            .unwrap_or_else(|| format!("{kind} wrapped by svea")),
        url: format!("http://127.0.0.1:{port}"),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: AgentCapabilities {
            uds: true,
            emergency_interrupt: true,
        },
        skills: Vec::new(),
    };
    let state = AppState {
        agent_id: agent_id.clone(),
        card,
        tasks: tasks.clone(),
        registry: registry.clone(),
        replies: replies.clone(),
        supervisor: supervisor.clone(),
    };
    let app = router(state);

    let tcp_app = app.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp_listener, tcp_app).await {
            error!(error = %e, "tcp listener failed");
        }
    });
    let uds_app = app;
    let uds_path_task = uds_path.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_uds(uds_app, &uds_path_task).await {
            // The TCP side keeps serving; same-host callers fall back.
            warn!(error = %e, "uds listener failed");
        }
    });

    // ── Registry enrollment ───────────────────────────────────────────────────
    let mut entry = AgentEntry::new(&agent_id, kind, port);
    entry.uds_path = Some(uds_path.display().to_string());
    entry.display_name = display_name;
    entry.role = role;
    registry.register(&entry)?;

    // ── Startup handshake ─────────────────────────────────────────────────────
    if inject_instructions {
        if let Some(instructions) = profile.instructions.clone() {
            let handle = supervisor.clone();
            let agent_id_hs = agent_id.clone();
            tokio::spawn(async move {
                let mut state_rx = handle.watch_state();
                loop {
                    if *state_rx.borrow() == AgentState::Ready {
                        break;
                    }
                    if state_rx.changed().await.is_err() {
                        return;
                    }
                }
                let text = instructions.replace("{agent_id}", &agent_id_hs);
                if handle.inject(InjectRequest::raw(text)).await.is_ok() {
                    info!("initial instructions injected");
                }
            });
        }
    }

    // ── Completion tracking ───────────────────────────────────────────────────
    {
        let tasks = tasks.clone();
        let registry = registry.clone();
        let agent_id = agent_id.clone();
        tokio::spawn(async move {
            while let Some(task_id) = completions.recv().await {
                match tasks.complete(&task_id) {
                    Ok(_) => info!(task = %task_id, "task completed"),
                    Err(e) => warn!(task = %task_id, error = %e, "completion not applied"),
                }
                let _ = registry.update(&agent_id, |e| e.current_task = None);
            }
        });
    }

    // ── Main loop: signals and child exit ─────────────────────────────────────
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                // Ctrl-C belongs to the wrapped program, not to us.
                let _ = supervisor.interrupt().await;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                supervisor.kill();
                break;
            }
            code = &mut exit => {
                info!(code = code.unwrap_or(-1), "wrapped program exited, shutting down");
                break;
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    let _ = registry.update(&agent_id, |e| e.touch(AgentStatus::Terminating));
    // Give the output pump a moment to drain the final bytes.
    tokio::time::sleep(Duration::from_millis(200)).await;

    registry.unregister(&agent_id)?;
    safety.release_all(&agent_id);
    replies.remove_file();
    let _ = std::fs::remove_file(&uds_path);
    drop(raw_guard);
    info!(%agent_id, "agent torn down");
    Ok(())
}

/// Bind the first free port inside the profile's reserved band.
async fn bind_in_band(profile: &Profile) -> anyhow::Result<(tokio::net::TcpListener, u16)> {
    let (lo, hi) = profile.port_range;
    for port in lo..=hi {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(_) => continue,
        }
    }
    anyhow::bail!("no free port in band {lo}-{hi}; too many agents of this kind?")
}

/// Per-agent socket path: runtime dir when the session has one, shared
/// state root otherwise.
fn socket_path(root: &std::path::Path, agent_id: &str) -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime)
            .join(SYSTEM)
            .join(format!("{agent_id}.sock"));
    }
    root.join("uds").join(format!("{agent_id}.sock"))
}

/// One-line y/N gate shown before the wrapped program takes over the
/// terminal.
fn confirm_instructions(agent_id: &str) -> anyhow::Result<bool> {
    use std::io::Write;
    print!("Inject initial instructions into {agent_id} on first prompt? [Y/n] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(!line.trim().eq_ignore_ascii_case("n"))
}
