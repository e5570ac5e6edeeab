//! CLI command definitions and dispatch for the `pwr` binary.

pub mod interrupt;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Run and steer pipeline plan executions.
#[derive(Parser)]
#[command(name = "pwr", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Export spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Run a compiled plan (JSON) to completion in-process.
    Run {
        /// Path to the plan file.
        plan: PathBuf,

        /// Give up waiting after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Register an interrupt against a running server.
    Interrupt {
        /// abort, pause, resume, retry, mark-success, mark-failed or ignore.
        interrupt_type: String,

        /// Plan execution to interrupt.
        plan_execution_id: Uuid,

        /// Target one node execution instead of the whole plan.
        #[arg(long)]
        node: Option<Uuid>,

        /// Base URL of the `pwr serve` instance.
        #[arg(long, env = "PIPEWRIGHT_SERVER", default_value = "http://127.0.0.1:3000")]
        server: String,

        /// Name recorded as the issuer.
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_parse_interrupt_with_node() {
        let node = Uuid::now_v7();
        let pe = Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "pwr",
            "interrupt",
            "mark-success",
            &pe.to_string(),
            "--node",
            &node.to_string(),
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Interrupt {
                interrupt_type,
                plan_execution_id,
                node: Some(target),
                ..
            } => {
                assert_eq!(interrupt_type, "mark-success");
                assert_eq!(plan_execution_id, pe);
                assert_eq!(target, node);
            }
            _ => panic!("expected interrupt command"),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["pwr", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { port, host, otel } => {
                assert_eq!(port, 3000);
                assert_eq!(host, "127.0.0.1");
                assert!(!otel);
            }
            _ => panic!("expected serve command"),
        }
    }
}
