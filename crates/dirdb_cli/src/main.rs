//! dirdb CLI
//!
//! Command-line tools for dirdb directory backends.
//!
//! # Commands
//!
//! - `import` - Replace a backend's content with entries from a JSON-lines file
//! - `verify` - Check the consistency of DN and attribute index trees
//! - `rebuild` - Rebuild degraded or named indexes from `id2entry`
//! - `inspect` - Display tree statistics and index flags
//! - `search` - Look entries up through the attribute indexes

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// dirdb command-line directory backend tools.
#[derive(Parser)]
#[command(name = "dirdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage journal
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Path to the backend definition (JSON)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the backend content with entries from a JSON-lines file
    Import {
        /// File with one JSON entry per line
        input: PathBuf,

        /// Worker threads for sorting and key generation
        #[arg(short, long)]
        threads: Option<usize>,

        /// Size of one sort buffer in bytes
        #[arg(long)]
        buffer_size: Option<usize>,

        /// Directory for external-sort temp files
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },

    /// Verify DN and attribute index consistency
    Verify {
        /// Index to check, e.g. `dn2id` or `cn.equality` (all if omitted)
        #[arg(short, long)]
        index: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rebuild indexes from the stored entries
    Rebuild {
        /// Rebuild every index, `dn2id` and children counts included
        #[arg(short, long, conflicts_with_all = ["degraded", "index"])]
        all: bool,

        /// Rebuild the indexes that are not trusted
        #[arg(short, long, conflicts_with = "index")]
        degraded: bool,

        /// Index or attribute to rebuild
        #[arg(short, long)]
        index: Vec<String>,

        /// Worker threads for sorting and key generation
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Display tree statistics and index flags
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Find entries matching `attr=value`, `attr=*` or `attr=*part*`
    Search {
        /// Assertion to evaluate
        filter: String,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if matches!(cli.command, Commands::Version) {
        println!("dirdb CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("dirdb Core v{}", dirdb_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Storage path required")?;
    let config_path = cli.config.ok_or("Backend definition required")?;
    let config = commands::load_config(&config_path)?;

    match cli.command {
        Commands::Import {
            input,
            threads,
            buffer_size,
            temp_dir,
        } => {
            let mut import = config.import.clone();
            if let Some(threads) = threads {
                import = import.threads(threads);
            }
            if let Some(size) = buffer_size {
                import = import.buffer_size(size);
            }
            if let Some(dir) = temp_dir {
                import = import.temp_dir(dir);
            }
            commands::import::run(&path, config.backend, import, &input)?;
        }
        Commands::Verify { index, format } => {
            commands::verify::run(&path, config.backend, &index, &format)?;
        }
        Commands::Rebuild {
            all,
            degraded,
            index,
            threads,
        } => {
            let mode = commands::rebuild::mode(all, degraded, index)?;
            let mut import = config.import.clone();
            if let Some(threads) = threads {
                import = import.threads(threads);
            }
            commands::rebuild::run(&path, config.backend, import, &mode)?;
        }
        Commands::Inspect { format } => {
            commands::inspect::run(&path, config.backend, &format)?;
        }
        Commands::Search {
            filter,
            limit,
            format,
        } => {
            commands::search::run(&path, config.backend, &filter, limit, &format)?;
        }
        Commands::Version => {}
    }

    Ok(())
}
