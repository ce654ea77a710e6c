//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Crawl, catalog and archive stock-footage streams.
#[derive(Parser, Debug)]
#[command(name = "clipvault")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the archive database
    #[arg(long, default_value = "clipvault.db", global = true)]
    pub db: PathBuf,

    /// Path to the JSON config file (defaults apply when absent)
    #[arg(long, default_value = "clipvault.json", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl configured sites and resolve stream URLs
    Crawl {
        /// Start URL overriding the profile default
        #[arg(long)]
        start_url: Option<String>,

        /// Profile names to crawl (overrides config)
        #[arg(short, long)]
        profile: Vec<String>,

        /// Run the browser with a visible window (for solving challenges)
        #[arg(long)]
        headed: bool,

        /// Re-fetch pages recorded done on earlier runs
        #[arg(long)]
        no_resume: bool,

        /// Also download streams as they are discovered
        #[arg(long)]
        download: bool,
    },

    /// Download every asset with a stream URL and no local file
    Download {
        /// Maximum concurrent download jobs (1-16)
        #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
        concurrency: Option<u8>,

        /// Maximum retry attempts for transient failures (0-10)
        #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
        max_retries: Option<u8>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Sweep a captured catalog API template for assets
    Harvest {
        /// Path to the JSON query template
        template: PathBuf,
    },

    /// Search archived assets
    Search {
        /// Free-text query
        query: Vec<String>,

        /// Require every word to match instead of any
        #[arg(long)]
        all: bool,

        /// Only favorited assets
        #[arg(long)]
        favorites: bool,

        /// Only downloaded assets
        #[arg(long)]
        downloaded: bool,

        /// Maximum rows printed
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Print archive counters
    Stats,

    /// Rebuild the free-text index from the asset table
    RebuildIndex,

    /// Delete every asset, visit and work item
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}
