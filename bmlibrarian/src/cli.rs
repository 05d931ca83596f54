//! CLI command definitions and subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Durable task queue and multi-agent orchestrator for biomedical
/// literature research.
#[derive(Parser)]
#[command(name = "bmlibrarian-cli", about = "Biomedical literature research core", version)]
pub struct Cli {
    /// Path to a YAML config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the worker pool and block until interrupted.
    Worker {
        /// Number of worker threads; overrides the config file.
        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Enqueue a single task and print its id.
    Submit {
        /// Registered agent name, e.g. `query_agent`.
        target_agent: String,
        /// Method on that agent, e.g. `convert_question`.
        method: String,
        /// JSON payload passed to the method.
        data: String,
        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
    },

    /// Look up a task by id.
    Status {
        task_id: String,
    },

    /// Summarize queue depth by status.
    Stats {
        /// Restrict the count to tasks targeting this agent.
        #[arg(long)]
        agent: Option<String>,
    },

    /// Delete terminal tasks older than the given age.
    Cleanup {
        #[arg(long, default_value_t = 168)]
        older_than_hours: u64,
    },

    /// Run the standard research flow once and print the resulting report.
    Research {
        question: String,
        #[arg(long, default_value_t = 5)]
        min_relevant: usize,
    },

    /// Run the paper-checker flow against a block of text.
    CheckPaper {
        /// Path to a file containing the paper's abstract; reads stdin if omitted.
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for crate::domain::Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Self::Low,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::High => Self::High,
            PriorityArg::Urgent => Self::Urgent,
        }
    }
}
