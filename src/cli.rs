use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orgsync")]
#[command(version)]
#[command(about = "Keep a hosted organization in sync with its declarative description", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Preview the commands a sync would apply
    Plan(PlanArgs),

    /// Apply the desired state
    Apply(ApplyArgs),

    /// Reconcile on a fixed cadence
    Serve(ServeArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Root of the organization description tree
    #[arg(long, default_value = ".")]
    pub org_dir: PathBuf,

    /// Remote snapshot file
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Print the planned commands as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Root of the organization description tree
    #[arg(long, default_value = ".")]
    pub org_dir: PathBuf,

    /// Remote snapshot file; updated in place after a successful pass
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser)]
pub struct ServeArgs {
    /// Root of the organization description tree
    #[arg(long, default_value = ".")]
    pub org_dir: PathBuf,

    /// Remote snapshot file; updated after each pass
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Seconds between reconciliation passes
    #[arg(long, default_value_t = 300)]
    pub interval: u64,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,
}
