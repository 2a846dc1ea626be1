use chrono::{DateTime, Utc};
use serde::Serialize;

/// Folder-insertion request sent from a traversal task to the writer.
/// `parent_id` is `None` for configured roots.
#[derive(Debug, Clone)]
pub struct FolderInsert {
    pub parent_id: Option<i64>,
    pub path: String,
    pub name: String,
    pub mtime: DateTime<Utc>,
    pub tag: String,
}

/// One discovered regular file, as buffered by the write serializer.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub folder_id: i64,
    pub path: String,
    pub dir_path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    pub tag: String,
    pub top_folder: String,
}

/// A hashing-phase work item.
#[derive(Debug, Clone)]
pub struct HashJob {
    pub id: i64,
    pub path: String,
}

/// One digest group as selected for materialization (≥ 2 members).
#[derive(Debug, Clone)]
pub struct DupGroupRow {
    pub digest: String,
    pub file_count: i64,
    pub total_size: i64,
    pub first_seen: String,
}

/// Progress checkpoint row for one materialization run.
#[derive(Debug, Clone)]
pub struct DuplicateRun {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub total_groups: i64,
    pub processed_groups: i64,
    pub processed_files: i64,
    pub processed_size: i64,
    pub last_digest: Option<String>,
    pub note: Option<String>,
}

/// Reporter row: one of the N largest files.
#[derive(Debug, Clone, Serialize)]
pub struct TopFile {
    pub size: i64,
    pub path: String,
    pub name: String,
    pub mtime: String,
    pub digest: Option<String>,
    pub tag: Option<String>,
}

/// Reporter row: a member of a duplicate group.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMember {
    pub path: String,
    pub name: String,
    pub size: i64,
    pub mtime: String,
    pub tag: Option<String>,
}

/// Store-wide counts for the reporter summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSummary {
    pub total_files: i64,
    pub total_bytes: i64,
    pub hashed_files: i64,
    pub duplicate_files: i64,
    pub duplicate_groups: i64,
    pub wasted_bytes: i64,
}
