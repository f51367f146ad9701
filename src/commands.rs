//! Command-line interface for the `copilot` binary, built with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use context_copilot::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Search { query, k } => println!("{query} (k={k:?})"),
//!     _ => {}
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to a config file; defaults to `<config_dir>/config.yaml`.
    #[arg(short = 'c', long = "config", global = true, env = "COPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config and template into the config directory.
    Init,

    /// Embed every matching file under a directory into the corpus.
    #[clap(name = "index", alias = "x")]
    Index {
        /// Project directory to walk.
        dir: PathBuf,

        /// Replace the corpus instead of appending to it.
        #[arg(long)]
        rebuild: bool,
    },

    /// Show the stored chunks most similar to a query.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        /// Number of results; defaults to `top_k` from the config.
        #[arg(short = 'k')]
        k: Option<usize>,
    },

    /// Ask a question using retrieved context and conversation memory.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Skip retrieval and answer from memory only.
        #[arg(long = "no-context")]
        no_context: bool,

        #[arg(name = "template", short = 't')]
        template: Option<String>,

        #[arg(name = "session", short = 's')]
        session: Option<String>,
    },

    /// Print the most recent turns of a conversation.
    #[clap(name = "history", alias = "h")]
    History {
        /// Number of turns; defaults to 30.
        #[arg(short = 'n')]
        n: Option<usize>,

        #[arg(name = "session", short = 's')]
        session: Option<String>,
    },
}
