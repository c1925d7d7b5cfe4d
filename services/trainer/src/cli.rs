//! Command-line surface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sprechpfad", version, about = "Learning-path speaking trainer")]
pub struct Cli {
    /// Learner context; overrides SPRECHPFAD_LEARNER.
    #[arg(long, global = true)]
    pub learner: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Learning-path runs: start, advance, inspect.
    Path {
        #[command(subcommand)]
        cmd: PathCmd,
    },
    /// Vocabulary management.
    Vocab {
        #[command(subcommand)]
        cmd: VocabCmd,
    },
    /// Session report: table, summary, progress, CSV export.
    Report {
        /// Number of most recent sessions to include.
        #[arg(long, default_value_t = 20)]
        last: i64,
        /// Filter by step kind (read_respond | vocab_drill | review).
        #[arg(long)]
        kind: Option<String>,
        /// Write the rows to a CSV file.
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Show per-kind averages instead of the table.
        #[arg(long)]
        summary: bool,
        /// Show per-kind medians and quality rates instead of the table.
        #[arg(long)]
        progress: bool,
    },
    /// List the configured templates.
    Templates,
}

#[derive(Subcommand, Debug)]
pub enum PathCmd {
    /// Start a new run from a template and execute its first step.
    Start {
        /// Template id, e.g. "daily-news".
        #[arg(long)]
        template: String,
        /// Pre-recorded WAV clips consumed in order by the exercises.
        #[arg(long)]
        clip: Vec<PathBuf>,
    },
    /// Advance the active run and execute the next step.
    Next {
        #[arg(long)]
        clip: Vec<PathBuf>,
    },
    /// Re-enter the current step of the active run (after an abort).
    Resume {
        #[arg(long)]
        clip: Vec<PathBuf>,
    },
    /// Show the active run and its position.
    Status,
}

#[derive(Subcommand, Debug)]
pub enum VocabCmd {
    /// Save a vocabulary item.
    Add {
        term: String,
        #[arg(long)]
        definition: Option<String>,
        #[arg(long)]
        example1: Option<String>,
        #[arg(long)]
        example2: Option<String>,
    },
    /// Alphabetical list of all vocabulary items.
    List,
}
