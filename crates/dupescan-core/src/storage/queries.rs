use rusqlite::{params, params_from_iter, Result};
use tracing::{debug, warn};

use super::models::*;
use super::sqlite::Database;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Builds the `<scope>/%` prefix pattern for subtree matches.
fn scope_like(scope: &str) -> String {
    let mut like = scope.to_string();
    if !like.ends_with('/') {
        like.push('/');
    }
    like.push('%');
    like
}

/// Mutable progress counters threaded through materialization batches.
#[derive(Debug, Default, Clone)]
pub struct RunCounters {
    pub groups: i64,
    pub files: i64,
    pub bytes: i64,
    pub last_digest: Option<String>,
}

impl Database {
    // ── Phase 1: folder / file upserts ───────────────────────────

    /// Upsert a folder row and return its id. On path conflict only
    /// `parent_id` and `mtime` are refreshed; the id is stable.
    pub fn upsert_folder(&self, req: &FolderInsert) -> Result<i64> {
        self.connection()
            .prepare_cached(
                "INSERT INTO folders (parent_id, path, name, mtime, tag) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(path) DO UPDATE SET \
                     parent_id = excluded.parent_id, \
                     mtime = excluded.mtime",
            )?
            .execute(params![
                req.parent_id,
                req.path,
                req.name,
                req.mtime.to_rfc3339(),
                req.tag,
            ])?;
        // last_insert_rowid is stale when the conflict path ran, so resolve
        // the id through the unique path index either way.
        self.connection()
            .prepare_cached("SELECT id FROM folders WHERE path = ?1")?
            .query_row(params![req.path], |row| row.get(0))
    }

    /// Upsert a batch of file rows in one transaction. Per-row failures are
    /// logged and skipped; only a commit failure fails the batch. Returns
    /// the number of rows written. Conflicting paths keep their `digest`
    /// and `is_duplicate`.
    pub fn upsert_files(&self, rows: &[FileRow]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO files \
                 (folder_id, path, dir_path, name, extension, size, mtime, tag, top_folder) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(path) DO UPDATE SET \
                     folder_id = excluded.folder_id, \
                     size = excluded.size, \
                     mtime = excluded.mtime",
            )?;
            for row in rows {
                let res = stmt.execute(params![
                    row.folder_id,
                    row.path,
                    row.dir_path,
                    row.name,
                    row.extension,
                    row.size,
                    row.mtime.to_rfc3339(),
                    row.tag,
                    row.top_folder,
                ]);
                match res {
                    Ok(_) => count += 1,
                    Err(e) => warn!(path = %row.path, error = %e, "failed to insert file row"),
                }
            }
        }
        tx.commit()?;
        Ok(count)
    }

    // ── Phase 2: hashing candidates and digests ──────────────────

    /// All files eligible for hashing: non-empty, digest absent, and at
    /// least one other un-hashed file of the same size. One self-join over
    /// the partial `size WHERE digest IS NULL` index.
    pub fn candidate_files(&self) -> Result<Vec<HashJob>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, path FROM files \
             WHERE size > 0 AND digest IS NULL \
               AND size IN ( \
                 SELECT size FROM files \
                 WHERE size > 0 AND digest IS NULL \
                 GROUP BY size HAVING COUNT(*) > 1) \
             ORDER BY size DESC",
        )?;
        let jobs = stmt
            .query_map([], |row| {
                Ok(HashJob {
                    id: row.get(0)?,
                    path: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Write a batch of computed digests in one transaction.
    pub fn apply_digests(&self, results: &[(i64, String)]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE files SET digest = ?1 WHERE id = ?2")?;
            for (id, digest) in results {
                match stmt.execute(params![digest, id]) {
                    Ok(_) => count += 1,
                    Err(e) => warn!(id, error = %e, "failed to update digest"),
                }
            }
        }
        tx.commit()?;
        debug!(count, "digest batch committed");
        Ok(count)
    }

    // ── Duplicate materialization ────────────────────────────────

    /// Clear all duplicate marks and materialized groups, atomically.
    pub fn reset_duplicates(&self) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute("UPDATE files SET is_duplicate = 0 WHERE is_duplicate = 1", [])?;
        tx.execute("DELETE FROM duplicate_groups", [])?;
        tx.commit()
    }

    pub fn count_duplicate_groups(&self, resume_after: Option<&str>) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM ( \
               SELECT 1 FROM files \
               WHERE digest IS NOT NULL AND digest != '' AND digest > ?1 \
               GROUP BY digest HAVING COUNT(*) > 1)",
            params![resume_after.unwrap_or("")],
            |row| row.get(0),
        )
    }

    /// Digest groups with ≥ 2 members, ordered by digest so a rebuild can
    /// resume from a checkpoint boundary.
    pub fn duplicate_group_rows(&self, resume_after: Option<&str>) -> Result<Vec<DupGroupRow>> {
        let mut stmt = self.connection().prepare(
            "SELECT digest, COUNT(*), SUM(size), MIN(mtime) FROM files \
             WHERE digest IS NOT NULL AND digest != '' AND digest > ?1 \
             GROUP BY digest HAVING COUNT(*) > 1 \
             ORDER BY digest",
        )?;
        let rows = stmt
            .query_map(params![resume_after.unwrap_or("")], |row| {
                Ok(DupGroupRow {
                    digest: row.get(0)?,
                    file_count: row.get(1)?,
                    total_size: row.get(2)?,
                    first_seen: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Mark every file whose digest is in `digests` as a duplicate, in one
    /// transaction.
    pub fn mark_duplicates(&self, digests: &[String]) -> Result<usize> {
        if digests.is_empty() {
            return Ok(0);
        }
        let tx = self.connection().unchecked_transaction()?;
        let sql = format!(
            "UPDATE files SET is_duplicate = 1 WHERE digest IN ({})",
            placeholders(digests.len())
        );
        let count = tx.execute(&sql, params_from_iter(digests.iter()))?;
        tx.commit()?;
        Ok(count)
    }

    /// Upsert one batch of group summaries and checkpoint the run row, in
    /// one transaction. On digest conflict `file_count`, `total_size` and
    /// `last_updated` are overwritten; `first_seen` is preserved. Returns
    /// the counters as of the end of this batch; `base` is the state from
    /// the previous batch so a retried commit recomputes cleanly.
    pub fn commit_group_batch(
        &self,
        run_id: i64,
        batch: &[DupGroupRow],
        base: &RunCounters,
    ) -> Result<RunCounters> {
        let mut counters = base.clone();
        let tx = self.connection().unchecked_transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO duplicate_groups \
                 (digest, file_count, total_size, first_seen, last_updated) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(digest) DO UPDATE SET \
                     file_count = excluded.file_count, \
                     total_size = excluded.total_size, \
                     last_updated = excluded.last_updated",
            )?;
            for group in batch {
                stmt.execute(params![
                    group.digest,
                    group.file_count,
                    group.total_size,
                    group.first_seen,
                    now,
                ])?;
                counters.groups += 1;
                counters.files += group.file_count;
                counters.bytes += group.total_size;
                counters.last_digest = Some(group.digest.clone());
            }
        }
        tx.execute(
            "UPDATE duplicate_runs SET processed_groups = ?1, processed_files = ?2, \
             processed_size = ?3, last_digest = ?4 WHERE id = ?5",
            params![
                counters.groups,
                counters.files,
                counters.bytes,
                counters.last_digest,
                run_id
            ],
        )?;
        tx.commit()?;
        Ok(counters)
    }

    pub fn start_duplicate_run(&self, total_groups: i64, note: &str) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO duplicate_runs (started_at, status, total_groups, note) \
             VALUES (?1, 'running', ?2, ?3)",
            params![chrono::Utc::now().to_rfc3339(), total_groups, note],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn finish_duplicate_run(
        &self,
        run_id: i64,
        status: &str,
        last_digest: Option<&str>,
    ) -> Result<()> {
        self.connection().execute(
            "UPDATE duplicate_runs SET finished_at = ?1, status = ?2, last_digest = ?3 \
             WHERE id = ?4",
            params![chrono::Utc::now().to_rfc3339(), status, last_digest, run_id],
        )?;
        Ok(())
    }

    pub fn get_duplicate_run(&self, run_id: i64) -> Result<DuplicateRun> {
        self.connection().query_row(
            "SELECT id, started_at, finished_at, status, total_groups, processed_groups, \
                    processed_files, processed_size, last_digest, note \
             FROM duplicate_runs WHERE id = ?1",
            params![run_id],
            |row| {
                Ok(DuplicateRun {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    status: row.get(3)?,
                    total_groups: row.get(4)?,
                    processed_groups: row.get(5)?,
                    processed_files: row.get(6)?,
                    processed_size: row.get(7)?,
                    last_digest: row.get(8)?,
                    note: row.get(9)?,
                })
            },
        )
    }

    // ── Reporter queries (read-only) ─────────────────────────────

    pub fn top_files(&self, limit: usize) -> Result<Vec<TopFile>> {
        let mut stmt = self.connection().prepare(
            "SELECT size, path, name, mtime, digest, tag FROM files \
             ORDER BY size DESC, path LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(TopFile {
                    size: row.get(0)?,
                    path: row.get(1)?,
                    name: row.get(2)?,
                    mtime: row.get(3)?,
                    digest: row.get(4)?,
                    tag: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Duplicate groups whose per-member size is at least `min_size`,
    /// largest waste first. Returns `(digest, file_count, total_size)`.
    pub fn duplicate_group_list(&self, min_size: i64) -> Result<Vec<(String, i64, i64)>> {
        let mut stmt = self.connection().prepare(
            "SELECT digest, file_count, total_size FROM duplicate_groups \
             WHERE total_size / file_count >= ?1 \
             ORDER BY total_size DESC, digest",
        )?;
        let rows = stmt
            .query_map(params![min_size], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn group_members(&self, digest: &str) -> Result<Vec<DuplicateMember>> {
        let mut stmt = self.connection().prepare(
            "SELECT path, name, size, mtime, tag FROM files \
             WHERE digest = ?1 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![digest], |row| {
                Ok(DuplicateMember {
                    path: row.get(0)?,
                    name: row.get(1)?,
                    size: row.get(2)?,
                    mtime: row.get(3)?,
                    tag: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let (total_files, total_bytes): (i64, i64) = self.connection().query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let hashed_files: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM files WHERE digest IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let duplicate_files: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM files WHERE is_duplicate = 1",
            [],
            |row| row.get(0),
        )?;
        let (duplicate_groups, wasted_bytes): (i64, i64) = self.connection().query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_size - total_size / file_count), 0) \
             FROM duplicate_groups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreSummary {
            total_files,
            total_bytes,
            hashed_files,
            duplicate_files,
            duplicate_groups,
            wasted_bytes,
        })
    }

    // ── Deleter queries ──────────────────────────────────────────

    /// Files within a path scope matching the optional filters, id order.
    /// `limit = 0` means unlimited.
    pub fn select_scope_files(
        &self,
        scope: &str,
        size_zero: bool,
        extensions: &[String],
        limit: usize,
    ) -> Result<Vec<(i64, String)>> {
        let like = scope_like(scope);
        let mut sql = String::from(
            "SELECT id, path FROM files \
             WHERE (path = ?1 OR path LIKE ?2 OR dir_path = ?1 OR dir_path LIKE ?2)",
        );
        let mut args: Vec<String> = vec![scope.to_string(), like];
        if size_zero {
            sql.push_str(" AND size = 0");
        }
        if !extensions.is_empty() {
            sql.push_str(&format!(
                " AND LOWER(extension) IN ({})",
                placeholders(extensions.len())
            ));
            args.extend(extensions.iter().cloned());
        }
        sql.push_str(" ORDER BY id");
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = self.connection().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete file rows by id in one transaction; returns rows removed.
    pub fn delete_files_by_id(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM files WHERE id = ?1")?;
            for id in ids {
                count += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// Plain scope deletion: all file and folder rows at or under `scope`,
    /// atomically. Returns `(folders_deleted, files_deleted)`.
    pub fn delete_scope_rows(&self, scope: &str) -> Result<(u64, u64)> {
        let like = scope_like(scope);
        let tx = self.connection().unchecked_transaction()?;
        let files = tx.execute(
            "DELETE FROM files \
             WHERE path = ?1 OR path LIKE ?2 OR dir_path = ?1 OR dir_path LIKE ?2",
            params![scope, like],
        )?;
        let folders = tx.execute(
            "DELETE FROM folders WHERE path = ?1 OR path LIKE ?2",
            params![scope, like],
        )?;
        tx.commit()?;
        Ok((folders as u64, files as u64))
    }

    /// Row counts a plain scope deletion would touch (for dry runs).
    pub fn count_scope_rows(&self, scope: &str) -> Result<(i64, i64)> {
        let like = scope_like(scope);
        let folders: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM folders WHERE path = ?1 OR path LIKE ?2",
            params![scope, like],
            |row| row.get(0),
        )?;
        let files: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM files \
             WHERE path = ?1 OR path LIKE ?2 OR dir_path = ?1 OR dir_path LIKE ?2",
            params![scope, like],
            |row| row.get(0),
        )?;
        Ok((folders, files))
    }
}
