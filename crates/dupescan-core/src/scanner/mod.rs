use crossbeam_channel::{bounded, Sender};
use std::collections::HashSet;
use std::fs::{self, DirEntry};
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

use crate::config::top_folder;
use crate::error::Error;
use crate::platform;
use crate::progress::ProgressReporter;
use crate::storage::models::{FileRow, FolderInsert};
use crate::writer::WriterMsg;

/// Capacity of the traversal → writer channel. Back-pressure point: when
/// the writer falls behind, traversal blocks on send.
pub const CHANNEL_CAPACITY: usize = 1024;

const PROGRESS_EVERY: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct TraversalParams {
    pub exclude: HashSet<String>,
    pub batch_size: usize,
    pub top_folder_depth: usize,
}

/// One level of the iterative DFS. Holding the enumerated entries plus a
/// cursor keeps stack memory bounded regardless of tree depth.
struct Frame {
    folder_id: i64,
    entries: Vec<DirEntry>,
    cursor: usize,
}

/// Walk one configured root, announcing folders synchronously (the reply
/// carries the assigned folder id, which must exist before any descendant
/// is announced) and file rows in batches. Returns the number of regular
/// files found.
pub fn scan_root(
    root: &str,
    tag: &str,
    tx: &Sender<WriterMsg>,
    params: &TraversalParams,
    cancel: &AtomicBool,
    files_found: &AtomicU64,
    reporter: &dyn ProgressReporter,
) -> Result<u64, Error> {
    let abs = match fs::canonicalize(root) {
        Ok(p) => p,
        Err(e) => {
            warn!(root, error = %e, "cannot canonicalize root, skipping");
            return Ok(0);
        }
    };
    let root_meta = match fs::symlink_metadata(&abs) {
        Ok(m) if m.is_dir() => m,
        Ok(_) => {
            warn!(root = %abs.display(), "root is not a directory, skipping");
            return Ok(0);
        }
        Err(e) => {
            warn!(root = %abs.display(), error = %e, "cannot stat root, skipping");
            return Ok(0);
        }
    };

    let root_stat = platform::stat_entry(&root_meta);
    let root_id = request_folder_id(
        tx,
        FolderInsert {
            parent_id: None,
            path: abs.to_string_lossy().into_owned(),
            name: terminal_name(&abs),
            mtime: root_stat.mtime,
            tag: tag.to_string(),
        },
    )?;
    if root_id <= 0 {
        return Err(Error::Other(format!(
            "failed to insert root folder: {}",
            abs.display()
        )));
    }

    let root_entries = match read_entries(&abs) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %abs.display(), error = %e, "cannot read root directory");
            return Err(Error::Io(e));
        }
    };

    let mut total_files: u64 = 0;
    let mut batch: Vec<FileRow> = Vec::with_capacity(params.batch_size);
    let mut stack = vec![Frame {
        folder_id: root_id,
        entries: root_entries,
        cursor: 0,
    }];

    while let Some(top) = stack.last_mut() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if top.cursor >= top.entries.len() {
            stack.pop();
            continue;
        }

        let entry = &top.entries[top.cursor];
        top.cursor += 1;
        let entry_path = entry.path();
        let entry_name = entry.file_name().to_string_lossy().into_owned();
        let looks_like_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let parent_id = top.folder_id;

        if looks_like_dir && params.exclude.contains(&entry_name) {
            continue;
        }

        let meta = match fs::symlink_metadata(&entry_path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %entry_path.display(), error = %e, "lstat failed, skipping entry");
                continue;
            }
        };
        let stat = platform::stat_entry(&meta);

        if meta.is_dir() {
            let child_id = request_folder_id(
                tx,
                FolderInsert {
                    parent_id: Some(parent_id),
                    path: entry_path.to_string_lossy().into_owned(),
                    name: entry_name,
                    mtime: stat.mtime,
                    tag: tag.to_string(),
                },
            )?;
            if child_id > 0 {
                match read_entries(&entry_path) {
                    Ok(entries) => stack.push(Frame {
                        folder_id: child_id,
                        entries,
                        cursor: 0,
                    }),
                    Err(e) => {
                        warn!(path = %entry_path.display(), error = %e, "cannot read directory");
                    }
                }
            }
        } else if meta.file_type().is_file() {
            total_files += 1;
            let path_str = entry_path.to_string_lossy().into_owned();
            let dir_path = entry_path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            batch.push(FileRow {
                folder_id: parent_id,
                dir_path,
                extension: extension_of(&entry_name),
                name: entry_name,
                size: stat.size as i64,
                mtime: stat.mtime,
                tag: tag.to_string(),
                top_folder: top_folder(&path_str, params.top_folder_depth),
                path: path_str,
            });
            if batch.len() >= params.batch_size {
                send_files(tx, &mut batch)?;
            }
            let n = files_found.fetch_add(1, Ordering::Relaxed) + 1;
            if n % PROGRESS_EVERY == 0 {
                reporter.on_scan_progress(n);
            }
        }
        // Symlinks, devices and sockets are ignored.
    }

    if !batch.is_empty() {
        send_files(tx, &mut batch)?;
    }
    Ok(total_files)
}

fn request_folder_id(tx: &Sender<WriterMsg>, req: FolderInsert) -> Result<i64, Error> {
    let (reply_tx, reply_rx) = bounded(1);
    tx.send(WriterMsg::InsertFolder {
        req,
        reply: reply_tx,
    })
    .map_err(|_| Error::Other("write serializer disconnected".to_string()))?;
    reply_rx
        .recv()
        .map_err(|_| Error::Other("write serializer disconnected".to_string()))
}

fn send_files(tx: &Sender<WriterMsg>, batch: &mut Vec<FileRow>) -> Result<(), Error> {
    let rows = mem::take(batch);
    tx.send(WriterMsg::InsertFiles(rows))
        .map_err(|_| Error::Other("write serializer disconnected".to_string()))
}

/// Enumerate a directory, skipping (with a warning) entries that fail to
/// materialize.
fn read_entries(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        match entry {
            Ok(e) => entries.push(e),
            Err(e) => warn!(dir = %dir.display(), error = %e, "unreadable directory entry"),
        }
    }
    Ok(entries)
}

fn terminal_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Lowercased extension with leading dot, or `None` for extension-less
/// names (including dotfiles).
fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of_lowercases() {
        assert_eq!(extension_of("photo.JPG"), Some(".jpg".to_string()));
    }

    #[test]
    fn test_extension_of_none_for_dotfiles_and_bare_names() {
        assert_eq!(extension_of(".gitignore"), None);
        assert_eq!(extension_of("Makefile"), None);
    }

    #[test]
    fn test_terminal_name() {
        assert_eq!(terminal_name(Path::new("/a/b/c")), "c");
    }
}
