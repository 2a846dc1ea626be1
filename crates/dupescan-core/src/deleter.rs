use std::fs;
use std::io;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::Error;
use crate::storage::Database;

/// Rows deleted per transaction.
const COMMIT_BATCH: usize = 1_000;
/// Coarse ceiling on one deletion job.
const JOB_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Default)]
pub struct DeleteFilter {
    pub size_zero: bool,
    pub extensions: Vec<String>,
}

impl DeleteFilter {
    pub fn is_active(&self) -> bool {
        self.size_zero || !self.extensions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    /// Absolute path scope (exact match or prefix). Required.
    pub scope: String,
    pub filter: DeleteFilter,
    /// Max files to touch in filter mode; 0 = unlimited.
    pub limit: usize,
    /// Also remove matching files from disk. Only honored in filter mode.
    pub delete_disk: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub folders_deleted: u64,
    pub db_deleted: u64,
    pub disk_deleted: u64,
    pub errors: u64,
}

/// Normalize a comma-separated extension list: trimmed, lowercased, leading
/// dot enforced, duplicates removed.
pub fn normalize_ext_list(csv: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for part in csv.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut ext = part.to_lowercase();
        if !ext.starts_with('.') {
            ext.insert(0, '.');
        }
        if seen.insert(ext.clone()) {
            out.push(ext);
        }
    }
    out
}

/// Refuse obviously destructive scopes before touching anything.
pub fn validate_scope(scope: &str) -> Result<(), Error> {
    if scope.is_empty() {
        return Err(Error::Other("deletion scope cannot be empty".to_string()));
    }
    if scope == "/" || scope == "\\" {
        return Err(Error::Other(
            "refusing to delete the filesystem root".to_string(),
        ));
    }
    Ok(())
}

/// The files a filter-mode deletion would touch, for `--dry-run` detail and
/// `--list-out` exports.
pub fn list_matches(db: &Database, opts: &DeleteOptions) -> Result<Vec<(i64, String)>, Error> {
    Ok(db.select_scope_files(
        &opts.scope,
        opts.filter.size_zero,
        &opts.filter.extensions,
        opts.limit,
    )?)
}

/// Scope-restricted purge of store rows, optionally deleting the matching
/// disk files first (filter mode only). Dry runs report counts without
/// mutating anything.
pub fn run(db: &Database, opts: &DeleteOptions) -> Result<DeleteOutcome, Error> {
    validate_scope(&opts.scope)?;

    if opts.filter.is_active() {
        delete_filtered(db, opts)
    } else {
        delete_scope(db, opts)
    }
}

fn delete_filtered(db: &Database, opts: &DeleteOptions) -> Result<DeleteOutcome, Error> {
    let matches = list_matches(db, opts)?;
    let mut outcome = DeleteOutcome::default();
    let deadline = Instant::now() + JOB_TIMEOUT;

    if opts.dry_run {
        outcome.db_deleted = matches.len() as u64;
        info!(
            would_delete = matches.len(),
            "dry run: matching file rows within scope"
        );
        return Ok(outcome);
    }

    for batch in matches.chunks(COMMIT_BATCH) {
        if Instant::now() >= deadline {
            return Err(Error::Other("deletion job timed out".to_string()));
        }
        let mut ids = Vec::with_capacity(batch.len());
        for (id, path) in batch {
            if opts.delete_disk {
                match fs::remove_file(path) {
                    Ok(_) => outcome.disk_deleted += 1,
                    // A record whose file is already gone still gets its
                    // row cleaned up.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        outcome.errors += 1;
                        warn!(path = %path, error = %e, "failed to delete file from disk");
                        continue;
                    }
                }
            }
            ids.push(*id);
        }
        outcome.db_deleted += db.delete_files_by_id(&ids)? as u64;
    }

    info!(
        db_deleted = outcome.db_deleted,
        disk_deleted = outcome.disk_deleted,
        errors = outcome.errors,
        "filter deletion completed"
    );
    Ok(outcome)
}

fn delete_scope(db: &Database, opts: &DeleteOptions) -> Result<DeleteOutcome, Error> {
    if opts.delete_disk {
        warn!("--delete-disk is only honored with filters (--size-zero / --ext); deleting DB rows only");
    }
    if opts.dry_run {
        let (folders, files) = db.count_scope_rows(&opts.scope)?;
        info!(folders, files, "dry run: rows at or under scope");
        return Ok(DeleteOutcome {
            folders_deleted: folders as u64,
            db_deleted: files as u64,
            ..DeleteOutcome::default()
        });
    }
    let (folders, files) = db.delete_scope_rows(&opts.scope)?;
    info!(folders, files, "scope deletion completed");
    Ok(DeleteOutcome {
        folders_deleted: folders,
        db_deleted: files,
        ..DeleteOutcome::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ext_list() {
        assert_eq!(
            normalize_ext_list(" .TMP, log ,.tmp,,bak "),
            vec![".tmp", ".log", ".bak"]
        );
        assert!(normalize_ext_list("").is_empty());
    }

    #[test]
    fn test_validate_scope_refuses_empty_and_root() {
        assert!(validate_scope("").is_err());
        assert!(validate_scope("/").is_err());
        assert!(validate_scope("\\").is_err());
        assert!(validate_scope("/data/scans").is_ok());
    }
}
