use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};
use crossbeam_channel::bounded;

use dupescan_core::adaptive::AdaptiveSizing;
use dupescan_core::retry::RetryPolicy;
use dupescan_core::storage::models::{FileRow, FolderInsert};
use dupescan_core::storage::{Database, Profile};
use dupescan_core::writer::{self, WriterMsg};

fn folder_req(path: &str, parent_id: Option<i64>) -> FolderInsert {
    FolderInsert {
        parent_id,
        path: path.to_string(),
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        mtime: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        tag: "t".to_string(),
    }
}

fn file_row(folder_id: i64, path: &str, size: i64) -> FileRow {
    FileRow {
        folder_id,
        path: path.to_string(),
        dir_path: path.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default(),
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        extension: None,
        size,
        mtime: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        tag: "t".to_string(),
        top_folder: String::new(),
    }
}

/// Drives the write serializer over a real store file: synchronous folder
/// replies, batched file rows, flush on shutdown.
#[test]
fn test_writer_serializes_folders_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("writer.db");
    let db = Database::create(&db_path).unwrap();

    let (tx, rx) = bounded(16);
    let sizing = Arc::new(AdaptiveSizing::new(10_000, 2, u64::MAX));
    let handle = thread::spawn(move || writer::run(db, rx, sizing, RetryPolicy::default()));

    let root_id = {
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(WriterMsg::InsertFolder {
            req: folder_req("/root", None),
            reply: reply_tx,
        })
        .unwrap();
        reply_rx.recv().unwrap()
    };
    assert!(root_id > 0);

    // Re-announcing the same folder must return the same id.
    let root_again = {
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(WriterMsg::InsertFolder {
            req: folder_req("/root", None),
            reply: reply_tx,
        })
        .unwrap();
        reply_rx.recv().unwrap()
    };
    assert_eq!(root_id, root_again);

    let child_id = {
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(WriterMsg::InsertFolder {
            req: folder_req("/root/sub", Some(root_id)),
            reply: reply_tx,
        })
        .unwrap();
        reply_rx.recv().unwrap()
    };
    assert!(child_id > root_id);

    tx.send(WriterMsg::InsertFiles(vec![
        file_row(root_id, "/root/a.txt", 10),
        file_row(child_id, "/root/sub/b.txt", 20),
    ]))
    .unwrap();
    tx.send(WriterMsg::Shutdown).unwrap();
    drop(tx);

    let rows_written = handle.join().unwrap();
    assert_eq!(rows_written, 2);

    let db = Database::open(&db_path, Profile::Hash).unwrap();
    let files: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
        .unwrap();
    let folders: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM folders", [], |r| r.get(0))
        .unwrap();
    assert_eq!(files, 2);
    assert_eq!(folders, 2);
}

/// Closing the channel without an explicit Shutdown must still flush the
/// buffered rows.
#[test]
fn test_writer_flushes_on_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("writer.db");
    let db = Database::create(&db_path).unwrap();

    let (tx, rx) = bounded(16);
    let sizing = Arc::new(AdaptiveSizing::new(10_000, 2, u64::MAX));
    let handle = thread::spawn(move || writer::run(db, rx, sizing, RetryPolicy::default()));

    let root_id = {
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(WriterMsg::InsertFolder {
            req: folder_req("/root", None),
            reply: reply_tx,
        })
        .unwrap();
        reply_rx.recv().unwrap()
    };
    tx.send(WriterMsg::InsertFiles(vec![file_row(root_id, "/root/x", 1)]))
        .unwrap();
    drop(tx);

    assert_eq!(handle.join().unwrap(), 1);
}
