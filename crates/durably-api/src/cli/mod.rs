//! CLI command definitions and dispatch for the `durably` binary.
//!
//! Uses clap derive macros for argument parsing. Commands act on the
//! approval workflow's executions in the local database.

pub mod execution;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and inspect durable approval workflows.
#[derive(Parser)]
#[command(name = "durably", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "DURABLY_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new approval-workflow execution.
    Start {
        /// JSON input handed to the workflow.
        #[arg(long)]
        input: Option<String>,
    },

    /// Report a successful callback.
    Approve {
        /// Callback token.
        token: String,

        /// JSON payload to report (default `{"approved":true}`).
        #[arg(long, conflicts_with = "command")]
        payload: Option<String>,

        /// Report a command completion (`{"success":true}`).
        #[arg(long)]
        command: bool,
    },

    /// Report a failed callback.
    Reject {
        /// Callback token.
        token: String,

        /// Reason recorded with the failure.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Re-invoke one execution, or every execution with a due wait.
    Wake {
        /// Execution ID (omit to sweep all due executions).
        execution_id: Option<String>,
    },

    /// Show one execution, or list recent executions.
    #[command(alias = "ls")]
    Status {
        /// Execution ID to display.
        execution_id: Option<String>,

        /// Filter by status (running, succeeded, failed).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of executions to list.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show an execution's checkpoint log and open waits.
    Checkpoints {
        /// Execution ID.
        execution_id: String,
    },

    /// Delete expired idempotency markers.
    #[command(name = "purge-markers")]
    PurgeMarkers,

    /// Start the REST API server and the wake-up worker.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
