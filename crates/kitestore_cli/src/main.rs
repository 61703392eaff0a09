//! KiteStore CLI
//!
//! Command-line tools for KiteStore segment stores.
//!
//! # Commands
//!
//! - `inspect` - Display segment and chunk statistics
//! - `verify` - Check every chunk checksum and the segment layout
//! - `dump` - Print the chunks of one or all segments
//! - `head` - Print the oldest segment through the store
//! - `query` - Look up (and optionally delete) one chunk
//! - `remove-segment` - Delete one sealed segment

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// KiteStore command-line store tools.
#[derive(Parser)]
#[command(name = "kitestore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display segment and chunk statistics
    Inspect {
        /// Show one line per segment
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every chunk checksum and the segment layout
    Verify,

    /// Print stored chunks without opening the store
    Dump {
        /// Start id of the segment to dump (all segments if omitted)
        #[arg(short, long)]
        segment: Option<i64>,

        /// Maximum number of chunks to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the oldest segment
    Head {
        /// Include soft-deleted chunks
        #[arg(short, long)]
        all: bool,
    },

    /// Look up one chunk by id
    Query {
        /// Chunk id
        id: i64,

        /// Write the raw payload to stdout
        #[arg(short, long)]
        raw: bool,

        /// Soft-delete the chunk after printing it
        #[arg(short, long)]
        delete: bool,
    },

    /// Delete one sealed segment file
    RemoveSegment {
        /// Start id of the segment
        start_id: i64,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, segments, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            segment,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, segment, limit, &format)?;
        }
        Commands::Head { all } => {
            let path = cli.path.ok_or("Store path required for head")?;
            commands::head::run(&path, all)?;
        }
        Commands::Query { id, raw, delete } => {
            let path = cli.path.ok_or("Store path required for query")?;
            commands::query::run(&path, id, raw, delete)?;
        }
        Commands::RemoveSegment { start_id, dry_run } => {
            let path = cli.path.ok_or("Store path required for remove-segment")?;
            commands::remove_segment::run(&path, start_id, dry_run)?;
        }
        Commands::Version => {
            println!("KiteStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("KiteStore Core v{}", kitestore_core::VERSION);
        }
    }

    Ok(())
}
