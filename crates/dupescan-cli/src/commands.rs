use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dupescan")]
#[command(about = "Filesystem inventory and duplicate finder", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index the configured roots into a fresh scan store, hash potential
    /// duplicates and materialize duplicate groups
    Scan {
        /// Configuration file (INI) with [output], [scan] and [paths] sections
        #[arg(long, default_value = "config.ini")]
        config: String,
    },
    /// Rebuild the duplicate tables over an existing store, resumably
    RebuildDupes {
        /// Path to an existing scan store
        #[arg(long)]
        db: PathBuf,
        /// Clear prior duplicate marks and groups before rebuilding
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        reset: bool,
        /// Resume: only process groups with digest greater than this value
        #[arg(long)]
        resume_after_digest: Option<String>,
        /// Duplicate groups per transaction
        #[arg(long, default_value_t = 500)]
        batch: usize,
        /// Log progress every N groups (0 disables)
        #[arg(long, default_value_t = 2000)]
        progress_every: usize,
    },
    /// Delete store rows (and optionally disk files) under a path scope
    Delete {
        /// Path to an existing scan store
        #[arg(long)]
        db: PathBuf,
        /// Absolute path scope (exact match or prefix); required for safety
        #[arg(long)]
        path: String,
        /// Filter: only files with size = 0
        #[arg(long)]
        size_zero: bool,
        /// Filter: comma-separated extensions (e.g. ".tmp,.log,.bak")
        #[arg(long)]
        ext: Option<String>,
        /// Max number of files to delete (0 = no limit)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Also delete matching files from disk (filter mode only)
        #[arg(long)]
        delete_disk: bool,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Write the matched rows to this file before deleting
        #[arg(long)]
        list_out: Option<PathBuf>,
        /// Format for --list-out
        #[arg(long, value_enum, default_value = "csv")]
        list_format: ListFormat,
    },
    /// Render reports from an existing store (read-only)
    Report {
        /// Path to an existing scan store
        #[arg(long)]
        db: PathBuf,
        #[arg(long, value_enum, default_value = "console")]
        format: ReportFormat,
        /// Output path; defaults to <store-stem>_report.<ext> for file formats
        #[arg(long)]
        output: Option<PathBuf>,
        /// Number of largest files to include
        #[arg(long, default_value_t = 100)]
        top_n: usize,
        /// Minimum member size (bytes) for reported duplicate groups
        #[arg(long, default_value_t = 1024)]
        min_duplicate_size: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Console,
    Html,
    Spreadsheet,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Csv,
    Tsv,
}
