//! CLI implementation using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::output::Format;

/// Augur - coverage-guided LLM test augmentation for Python repositories.
#[derive(Parser)]
#[command(name = "augur")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the repository (holds augur.toml)
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run tests without reading or writing the result cache
    #[arg(long)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default augur.toml
    Init(InitArgs),

    /// Run the full suite and summarize coverage
    #[command(alias = "base")]
    Baseline,

    /// List test modules
    #[command(alias = "ls")]
    Modules(ModulesArgs),

    /// Resolve the source chunks each module uniquely covers
    Target(SelectArgs),

    /// Generate tests for modules and write a results file per module
    #[command(alias = "aug")]
    Augment(AugmentArgs),

    /// Remove tests from modules to open coverage gaps
    Neuter(NeuterArgs),

    /// Append tests from results files to the checkout
    Apply(ApplyArgs),

    /// Manage the test-run cache
    Cache(CacheCommand),
}

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing augur.toml
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ModulesArgs {
    /// Only list modules whose id contains this text
    #[arg(short, long)]
    pub filter: Option<String>,
}

#[derive(Args)]
pub struct SelectArgs {
    /// Module names or ids (`path` or `path::Class`); empty selects all
    pub modules: Vec<String>,
}

#[derive(Args)]
pub struct AugmentArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Augmentation rounds per module (overrides augment.n_times)
    #[arg(short = 'n', long)]
    pub rounds: Option<usize>,

    /// Directory for results files
    #[arg(short, long, default_value = ".augur/results")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct NeuterArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Tests to keep per module (overrides neuter.keep)
    #[arg(long, conflicts_with = "delete")]
    pub keep: Option<usize>,

    /// Tests to delete per module (overrides neuter.delete)
    #[arg(long)]
    pub delete: Option<usize>,

    /// Upper bound on tests deleted across all modules
    #[arg(long)]
    pub max_delete: Option<usize>,

    /// Skip per-test coverage attribution
    #[arg(long)]
    pub aggregate_only: bool,

    /// Commit the neutered files
    #[arg(long)]
    pub commit: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Results files written by `augur augment`
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand)]
pub enum CacheSubcommand {
    /// Delete every cached test run
    Clear,
    /// Show the cache location and entry count
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Markdown,
    Text,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => Format::Json,
            OutputFormat::Markdown => Format::Markdown,
            OutputFormat::Text => Format::Text,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
