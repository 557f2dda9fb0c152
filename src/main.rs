// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bootstrap;
mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use svea_client::ClientError;
use svea_registry::RegistryError;

// Exit codes of the command surface. Clap itself exits 2 on usage errors.
const EXIT_GENERIC: i32 = 1;
const EXIT_TARGET_NOT_FOUND: i32 = 3;
const EXIT_AMBIGUOUS: i32 = 4;
#[allow(dead_code)]
const EXIT_AUTH: i32 = 5;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // While running an agent, stdout/stderr belong to the wrapped
    // program's mirror. Tracing goes to SVEA_LOG_FILE when set, to stderr
    // only with --verbose, and is silent otherwise.
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Run {
            profile,
            name,
            role,
        } => bootstrap::run(&cli, profile, name.clone(), role.clone()).await,
        Commands::Send {
            target,
            message,
            from,
            priority,
            response,
            no_response: _,
            reply_to,
        } => {
            commands::send(
                &cli,
                target,
                message,
                from.as_deref(),
                *priority,
                *response,
                reply_to.clone(),
            )
            .await
        }
        Commands::Reply { message, from, to } => {
            commands::reply(&cli, message, from.as_deref(), to.as_deref()).await
        }
        Commands::List => commands::list(&cli),
        Commands::Safety { command } => commands::safety(&cli, command),
        Commands::ShowConfig => svea_config::load(cli.config.as_deref()).map(|config| {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        }),
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("svea: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Ok(path) = std::env::var("SVEA_LOG_FILE") {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .init();
            return;
        }
    }
    if verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Map domain errors to the documented exit codes.
fn exit_code(e: &anyhow::Error) -> i32 {
    if let Some(client) = e.downcast_ref::<ClientError>() {
        return match client {
            ClientError::Registry(RegistryError::NotFound { .. })
            | ClientError::NoPendingReplies => EXIT_TARGET_NOT_FOUND,
            ClientError::Registry(RegistryError::Ambiguous { .. }) => EXIT_AMBIGUOUS,
            ClientError::Api { code, .. } => match code {
                svea_protocol::ErrorCode::TargetNotFound => EXIT_TARGET_NOT_FOUND,
                svea_protocol::ErrorCode::AmbiguousTarget => EXIT_AMBIGUOUS,
                _ => EXIT_GENERIC,
            },
            _ => EXIT_GENERIC,
        };
    }
    if let Some(reg) = e.downcast_ref::<RegistryError>() {
        return match reg {
            RegistryError::NotFound { .. } => EXIT_TARGET_NOT_FOUND,
            RegistryError::Ambiguous { .. } => EXIT_AMBIGUOUS,
            RegistryError::Io(_) => EXIT_GENERIC,
        };
    }
    EXIT_GENERIC
}
