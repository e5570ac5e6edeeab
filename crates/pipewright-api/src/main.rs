//! Pipewright CLI and REST API entry point.
//!
//! Binary name: `pwr`
//!
//! Parses CLI arguments, opens the store and engine, then dispatches to the
//! command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use anyhow::anyhow;
use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,pipewright=debug",
        _ => "trace",
    };
    let otel = matches!(cli.command, Commands::Serve { otel: true, .. });
    pipewright_observe::tracing_setup::init_tracing_with_filter(filter, otel)
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    // Neither completions nor remote interrupts need a local store
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "pwr", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Interrupt {
            interrupt_type,
            plan_execution_id,
            node,
            server,
            user,
        } => {
            return cli::interrupt::send_interrupt(
                server,
                interrupt_type,
                *plan_execution_id,
                *node,
                user,
                cli.json,
            )
            .await;
        }
        _ => {}
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Run { plan, timeout_secs } => {
            cli::run::run_plan(&state, &plan, timeout_secs, cli.json, cli.quiet).await
        }

        Commands::Serve { port, host, .. } => serve(state.clone(), &host, port, cli.quiet).await,

        Commands::Completions { .. } | Commands::Interrupt { .. } => Ok(()),
    };

    state.engine.shutdown();
    pipewright_observe::tracing_setup::shutdown_tracing();
    result
}

async fn serve(state: AppState, host: &str, port: u16, quiet: bool) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    if !quiet {
        println!(
            "  {} Pipewright API listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }
    tracing::info!(
        %addr,
        data_dir = %state.data_dir.display(),
        declared_resources = state.config.resource_constraints.len(),
        remote_worker = state.config.delegate.base_url.is_some(),
        "server started"
    );

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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

    tracing::info!("shutdown signal received");
}
