//! durably CLI and REST API entry point.
//!
//! Binary name: `durably`
//!
//! Parses CLI arguments, initializes tracing, the database and the approval
//! workflow, then dispatches to the command handler or starts the server.

mod cli;
mod http;
mod state;
mod worker;

use std::sync::Arc;

use clap::Parser;
use clap_complete::generate;
use durably_core::workflow::ChannelWakeScheduler;
use durably_observe::tracing_setup::{init_tracing, level_directive, shutdown_tracing};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.otel, level_directive(cli.verbose, cli.quiet)) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "durably", &mut std::io::stdout());
        return Ok(());
    }

    if let Commands::Serve { port, host } = &cli.command {
        return serve(host, *port).await;
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Start { input } => {
            cli::execution::start(&state, input.as_deref(), cli.json).await?;
        }
        Commands::Approve {
            token,
            payload,
            command,
        } => {
            cli::execution::approve(&state, &token, payload.as_deref(), command, cli.json).await?;
        }
        Commands::Reject { token, reason } => {
            cli::execution::reject(&state, &token, reason, cli.json).await?;
        }
        Commands::Wake { execution_id } => {
            cli::execution::wake(&state, execution_id.as_deref(), cli.json).await?;
        }
        Commands::Status {
            execution_id,
            status,
            limit,
        } => {
            cli::execution::status(
                &state,
                execution_id.as_deref(),
                status.as_deref(),
                limit,
                cli.json,
            )
            .await?;
        }
        Commands::Checkpoints { execution_id } => {
            cli::execution::checkpoints(&state, &execution_id, cli.json).await?;
        }
        Commands::PurgeMarkers => {
            cli::execution::purge_markers(&state, cli.json).await?;
        }
        Commands::Serve { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Run the HTTP API with the in-process wake-up worker until shutdown.
async fn serve(host: &str, port: u16) -> anyhow::Result<()> {
    let (scheduler, requests) = ChannelWakeScheduler::new();
    let state = AppState::init_with_scheduler(Arc::new(scheduler)).await?;

    let cancel = CancellationToken::new();
    let worker = worker::spawn_wake_worker(state.clone(), requests, cancel.clone());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} durably API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    tracing::info!(data_dir = %state.data_dir.display(), %addr, "server starting");
    let router = http::router::build_router(state);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "wake-up worker did not stop cleanly");
    }
    served?;

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
