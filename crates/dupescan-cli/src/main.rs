mod commands;
mod logging;
mod progress;
mod render;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::AtomicBool;

use clap::{CommandFactory, Parser};
use colored::*;
use dotenv::dotenv;
use humansize::{format_size, BINARY};
use tracing::{error, info, warn};

use commands::{Cli, Commands, ListFormat, ReportFormat};
use dupescan_core::retry::RetryPolicy;
use dupescan_core::storage::{Database, Profile};
use dupescan_core::{deleter, dupes, reporter, IndexEngine};
use progress::CliReporter;

fn main() {
    dotenv().ok();
    logging::init_logger();

    let args = Cli::parse();
    let code = match args.command {
        Some(Commands::Scan { config }) => run_scan(&config),
        Some(Commands::RebuildDupes {
            db,
            reset,
            resume_after_digest,
            batch,
            progress_every,
        }) => run_rebuild(&db, reset, resume_after_digest, batch, progress_every),
        Some(Commands::Delete {
            db,
            path,
            size_zero,
            ext,
            limit,
            delete_disk,
            dry_run,
            list_out,
            list_format,
        }) => run_delete(
            &db,
            &path,
            size_zero,
            ext.as_deref(),
            limit,
            delete_disk,
            dry_run,
            list_out.as_deref(),
            list_format,
        ),
        Some(Commands::Report {
            db,
            format,
            output,
            top_n,
            min_duplicate_size,
        }) => run_report(&db, format, output, top_n, min_duplicate_size),
        None => {
            let _ = Cli::command().print_long_help();
            0
        }
    };
    process::exit(code);
}

fn run_scan(config_path: &str) -> i32 {
    let config = match dupescan_core::config::load_configuration(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return 1;
        }
    };

    let engine = IndexEngine::new(config);
    let reporter = CliReporter::new();
    match engine.run(&reporter) {
        Ok(result) => {
            println!();
            info!("store written to {}", result.db_path.display());
            println!(
                "{} files in {}, {} duplicate groups, {} wasted",
                result.total_files.to_string().green(),
                format!("{:.2}s", result.total_duration.as_secs_f64()).green(),
                result.duplicate_groups.to_string().red(),
                format_size(result.wasted_bytes.max(0) as u64, BINARY).red(),
            );
            0
        }
        Err(e) => {
            error!("scan failed: {e}");
            1
        }
    }
}

fn run_rebuild(
    db_path: &Path,
    reset: bool,
    resume_after: Option<String>,
    batch: usize,
    progress_every: usize,
) -> i32 {
    if batch == 0 {
        error!("--batch must be greater than 0");
        return 1;
    }
    let db = match Database::open(db_path, Profile::Hash) {
        Ok(db) => db,
        Err(e) => {
            error!("cannot open store {}: {e}", db_path.display());
            return 1;
        }
    };

    let opts = dupes::MaterializeOptions {
        reset,
        resume_after: resume_after.clone(),
        batch_size: batch,
        progress_every,
        note: format!(
            "rebuild db={} reset={} resume_after={:?}",
            db_path.display(),
            reset,
            resume_after
        ),
    };
    let cancel = AtomicBool::new(false);
    match dupes::materialize(&db, &opts, &cancel, &RetryPolicy::default()) {
        Ok(summary) => {
            println!(
                "run {}: {} groups, {} files, {}",
                summary.run_id,
                summary.groups.to_string().green(),
                summary.files,
                format_size(summary.bytes.max(0) as u64, BINARY),
            );
            0
        }
        Err(e) => {
            error!("rebuild failed: {e}");
            1
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_delete(
    db_path: &Path,
    scope: &str,
    size_zero: bool,
    ext: Option<&str>,
    limit: usize,
    delete_disk: bool,
    dry_run: bool,
    list_out: Option<&Path>,
    list_format: ListFormat,
) -> i32 {
    let scope_abs = match std::path::absolute(scope) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(e) => {
            error!("cannot resolve absolute path for {scope}: {e}");
            return 1;
        }
    };
    if let Err(e) = deleter::validate_scope(&scope_abs) {
        error!("{e}");
        return 1;
    }

    let db = match Database::open(db_path, Profile::Delete) {
        Ok(db) => db,
        Err(e) => {
            error!("cannot open store {}: {e}", db_path.display());
            return 1;
        }
    };

    let opts = deleter::DeleteOptions {
        scope: scope_abs,
        filter: deleter::DeleteFilter {
            size_zero,
            extensions: ext.map(deleter::normalize_ext_list).unwrap_or_default(),
        },
        limit,
        delete_disk,
        dry_run,
    };

    if let Some(list_path) = list_out {
        if opts.filter.is_active() {
            match deleter::list_matches(&db, &opts) {
                Ok(matches) => {
                    if let Err(e) = write_match_list(list_path, list_format, &matches) {
                        error!("cannot write {}: {e}", list_path.display());
                        return 1;
                    }
                    info!(count = matches.len(), "match list written to {}", list_path.display());
                }
                Err(e) => {
                    error!("cannot list matches: {e}");
                    return 1;
                }
            }
        } else {
            warn!("--list-out requires filter flags (--size-zero / --ext), skipping");
        }
    }

    match deleter::run(&db, &opts) {
        Ok(outcome) => {
            let verb = if dry_run { "would delete" } else { "deleted" };
            println!(
                "{verb}: {} file rows, {} folder rows, {} disk files ({} errors)",
                outcome.db_deleted, outcome.folders_deleted, outcome.disk_deleted, outcome.errors,
            );
            0
        }
        Err(e) => {
            error!("deletion failed: {e}");
            1
        }
    }
}

fn write_match_list(
    path: &Path,
    format: ListFormat,
    matches: &[(i64, String)],
) -> Result<(), Box<dyn std::error::Error>> {
    let delimiter = match format {
        ListFormat::Csv => b',',
        ListFormat::Tsv => b'\t',
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;
    writer.write_record(["id", "path"])?;
    for (id, file_path) in matches {
        writer.write_record([id.to_string(), file_path.clone()])?;
    }
    writer.flush()?;
    Ok(())
}

fn run_report(
    db_path: &Path,
    format: ReportFormat,
    output: Option<PathBuf>,
    top_n: usize,
    min_duplicate_size: u64,
) -> i32 {
    let db = match Database::open(db_path, Profile::Report) {
        Ok(db) => db,
        Err(e) => {
            error!("cannot open store {}: {e}", db_path.display());
            return 1;
        }
    };

    let report = match reporter::build_report(&db, top_n, min_duplicate_size) {
        Ok(report) => report,
        Err(e) => {
            error!("report query failed: {e}");
            return 1;
        }
    };

    let result = match format {
        ReportFormat::Console => render::render_console(&report).map(|_| Vec::new()),
        ReportFormat::Json => {
            render::render_json(&report, &output_path(db_path, output, "json"))
        }
        ReportFormat::Spreadsheet => {
            render::render_spreadsheet(&report, &output_path(db_path, output, "csv"))
        }
        ReportFormat::Html => {
            render::render_html(&report, &output_path(db_path, output, "html"))
        }
    };

    match result {
        Ok(written) => {
            for path in written {
                info!("report written to {}", path.display());
            }
            0
        }
        Err(e) => {
            error!("report generation failed: {e}");
            1
        }
    }
}

/// Default file-format output path: `<store-stem>_report.<ext>` next to the
/// working directory.
fn output_path(db_path: &Path, output: Option<PathBuf>, ext: &str) -> PathBuf {
    output.unwrap_or_else(|| {
        let stem = db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_string());
        PathBuf::from(format!("{stem}_report.{ext}"))
    })
}
