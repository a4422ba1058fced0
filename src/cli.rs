use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "treesync",
    about = "Keep a directory tree indexed for semantic search",
    version
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Characters per chunk
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Extra glob of root-relative paths to skip (repeatable)
    #[arg(long = "ignore", value_name = "GLOB", global = true)]
    pub ignore: Vec<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index a directory tree, then keep it in sync until interrupted
    Watch(RootArgs),
    /// Rebuild the index of a directory tree from scratch
    Resync(RootArgs),
    /// Find the files closest to one or more queries
    Search(SearchArgs),
    /// Show data directory, model and index counts
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Directory tree to index
    pub root: PathBuf,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Query texts; results for each are merged
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Indexed directory tree to search
    #[arg(long)]
    pub root: PathBuf,

    /// Nearest entries per query and directory
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Symlink every result into this directory
    #[arg(long, value_name = "DIR")]
    pub link: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "treesync",
            &mut std::io::stdout(),
        );
    }
}
