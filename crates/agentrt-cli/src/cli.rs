//! Command-line surface, grounded in `cli-sub-agent/src/cli.rs`'s shape:
//! a top-level `Cli{command, format}` with a global `--format text|json`
//! flag and a `Commands` subcommand enum.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "agentrt", version, about = "Local-first agent runtime: submit, run, and inspect Plans")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format for CLI responses.
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a Plan from a JSON request file (or stdin if omitted).
    Submit {
        /// Path to a JSON `{title, steps[], metadata}` document; reads stdin when omitted.
        file: Option<String>,
    },

    /// Fetch a persisted Plan and its transcript events by id.
    Fetch { plan_id: String },

    /// Run a persisted Plan's DAG to completion.
    Run {
        plan_id: String,

        /// Comma-separated consent scopes to grant for this run (`*` for all).
        #[arg(long, value_delimiter = ',')]
        consent_scopes: Vec<String>,
    },

    /// Invoke a single capability synchronously, outside of any Plan.
    Act {
        capability: String,

        /// JSON input for the capability; reads stdin when omitted.
        input: Option<String>,

        /// Comma-separated consent scopes to grant (`*` for all).
        #[arg(long, value_delimiter = ',')]
        consent_scopes: Vec<String>,
    },

    /// Print a Plan's transcript summary (steps, states, error/output previews).
    Transcript { plan_id: String },
}
