use serde::Serialize;

use crate::error::Error;
use crate::storage::models::{DuplicateMember, StoreSummary, TopFile};
use crate::storage::Database;

/// One materialized duplicate set with its member files.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroupReport {
    pub digest: String,
    pub file_count: i64,
    pub total_size: i64,
    pub files: Vec<DuplicateMember>,
}

/// Everything a renderer needs for one report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub summary: StoreSummary,
    pub top_files: Vec<TopFile>,
    pub duplicate_groups: Vec<DuplicateGroupReport>,
}

/// Assemble the read-only report data: store summary, the `top_n` largest
/// files, and duplicate groups whose member size is at least
/// `min_duplicate_size` bytes.
pub fn build_report(
    db: &Database,
    top_n: usize,
    min_duplicate_size: u64,
) -> Result<Report, Error> {
    let summary = db.summary()?;
    let top_files = db.top_files(top_n)?;

    let mut duplicate_groups = Vec::new();
    for (digest, file_count, total_size) in db.duplicate_group_list(min_duplicate_size as i64)? {
        let files = db.group_members(&digest)?;
        duplicate_groups.push(DuplicateGroupReport {
            digest,
            file_count,
            total_size,
            files,
        });
    }

    Ok(Report {
        summary,
        top_files,
        duplicate_groups,
    })
}
