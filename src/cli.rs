// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "svea",
    about = "Wrap any interactive CLI tool as a network-reachable A2A agent",
    version
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr even without SVEA_LOG_FILE set.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a wrapped program as an agent.
    ///
    /// Spawns the profile's executable on a pseudo-terminal, mirrors its
    /// output to this terminal, and serves the A2A protocol on a port
    /// from the profile's band plus a per-agent Unix socket. Runs until
    /// the wrapped program exits or the process receives SIGTERM.
    Run {
        /// Profile kind to launch (e.g. "claude"). Run `svea show-config`
        /// to see the known kinds.
        #[arg(long, short = 'p')]
        profile: String,
        /// Display name other agents can address this one by.
        #[arg(long)]
        name: Option<String>,
        /// Free-form role description shown in `svea list`.
        #[arg(long)]
        role: Option<String>,
    },

    /// Send a message to another agent.
    ///
    /// The target may be a display name, a full agent identifier, a
    /// `<kind>-<port>` shorthand, or a bare kind when exactly one agent
    /// of that kind is running.
    Send {
        target: String,
        message: String,
        /// Send as this agent instead of auto-detecting.
        #[arg(long)]
        from: Option<String>,
        /// Priority 1-5. 5 interrupts the target's current activity.
        #[arg(long, default_value_t = 3)]
        priority: u8,
        /// Ask the target to reply (tracked in its reply-target store).
        #[arg(long, conflicts_with = "no_response")]
        response: bool,
        /// Explicitly fire-and-forget (the default).
        #[arg(long)]
        no_response: bool,
        /// Link this message to one of the target's task ids (prefix ok).
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Answer the agent that asked most recently (or a specific one).
    Reply {
        message: String,
        /// Reply as this agent instead of auto-detecting.
        #[arg(long)]
        from: Option<String>,
        /// Reply to this sender instead of the most recent one.
        #[arg(long)]
        to: Option<String>,
    },

    /// List running agents on this host.
    List,

    /// Cross-agent advisory file locks.
    Safety {
        #[command(subcommand)]
        command: SafetyCommands,
    },

    /// Print the merged configuration and exit.
    ShowConfig,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// `svea safety` subcommands. Locks are advisory: they only bind agents
/// that ask before writing.
#[derive(Subcommand, Debug)]
pub enum SafetyCommands {
    /// Take (or wait for) the lock on a file.
    Lock {
        path: PathBuf,
        /// What the lock is for, recorded with the lock and shown to
        /// agents that are denied.
        #[arg(long, default_value = "")]
        intent: String,
        /// Lock lifetime in seconds.
        #[arg(long, default_value_t = 600)]
        ttl_secs: u64,
        /// Keep polling this long instead of failing immediately.
        #[arg(long)]
        wait_secs: Option<u64>,
        /// Act as this agent instead of auto-detecting.
        #[arg(long)]
        from: Option<String>,
    },

    /// Release a lock. A no-op when not held.
    Unlock {
        path: PathBuf,
        #[arg(long)]
        from: Option<String>,
    },

    /// Would a write to this file be allowed right now?
    Check {
        path: PathBuf,
        #[arg(long)]
        from: Option<String>,
    },

    /// Append a change to a file's modification log.
    Record {
        path: PathBuf,
        /// One of: create, modify, delete.
        #[arg(long, default_value = "modify")]
        kind: String,
        #[arg(long, default_value = "")]
        intent: String,
        /// Task this change belongs to, if any.
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        from: Option<String>,
    },

    /// Show who changed a file recently.
    History {
        path: PathBuf,
        /// Look back this many hours.
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
