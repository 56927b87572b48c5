//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{quality, reconcile, summarize, usage};

/// Blocker audit engine for the app-usage study.
///
/// Reconciles participants' reported app usage against their effective
/// budgets and audits whether the on-device blocker fired when it should.
#[derive(Debug, Parser)]
#[command(name = "bw", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import telemetry points from JSONL on stdin.
    Import,

    /// Audit every source's blocker behavior for one day.
    Reconcile(reconcile::ReconcileArgs),

    /// Walk one source/app/day minute by minute.
    Usage(usage::UsageArgs),

    /// Tabulate recorded audit outcomes across dimensions.
    Summarize(summarize::SummarizeArgs),

    /// Load treatment phases from a researcher TSV file.
    Phases {
        /// Path to the TSV file.
        file: PathBuf,
    },

    /// Show store counts and recently active sources.
    Status,

    /// Fetch a participant's performance report from their study server.
    Quality(quality::QualityArgs),
}
