use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata -- versioned, prototype-based in-memory object store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Repository configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Walk through prototypes, sets, versions, and collection
    Demo,
    /// Print the field layout of a resource type schema
    Layout(LayoutArgs),
    /// Hammer one repository with concurrent writers and readers
    Stress(StressArgs),
    /// Print the effective repository configuration
    Config,
}

#[derive(Args)]
pub struct LayoutArgs {
    /// Resource type schema file (TOML)
    pub schema: PathBuf,
}

#[derive(Args)]
pub struct StressArgs {
    /// Number of resources shared by all threads
    #[arg(long, default_value_t = 64)]
    pub resources: usize,
    /// Number of writer threads
    #[arg(long, default_value_t = 4)]
    pub writers: usize,
    /// Number of reader threads
    #[arg(long, default_value_t = 4)]
    pub readers: usize,
    /// Commits attempted by each writer
    #[arg(long, default_value_t = 10_000)]
    pub commits: usize,
    /// Retry conflicting commits through `update` instead of counting them
    #[arg(long)]
    pub rebase: bool,
}
