use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::time::SystemTime;

/// Per-entry metadata in OS-neutral form. Extraction never fails: missing
/// fields degrade to mtime-filled timestamps and an "unknown" owner label.
#[derive(Debug, Clone)]
pub struct EntryStat {
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub owner: String,
}

pub fn stat_entry(meta: &Metadata) -> EntryStat {
    let mtime = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

    let (atime, ctime, owner) = platform_fields(meta, mtime);

    EntryStat {
        size: meta.len(),
        mtime,
        atime,
        ctime,
        owner,
    }
}

#[cfg(unix)]
fn platform_fields(
    meta: &Metadata,
    mtime: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>, String) {
    use std::os::unix::fs::MetadataExt;

    let atime = DateTime::<Utc>::from_timestamp(meta.atime(), meta.atime_nsec() as u32)
        .unwrap_or(mtime);
    let ctime = DateTime::<Utc>::from_timestamp(meta.ctime(), meta.ctime_nsec() as u32)
        .unwrap_or(mtime);
    // Numeric uid; resolving names would need /etc/passwd access that is not
    // always present (containers, foreign mounts).
    (atime, ctime, meta.uid().to_string())
}

#[cfg(not(unix))]
fn platform_fields(
    _meta: &Metadata,
    mtime: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>, String) {
    (mtime, mtime, "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_entry_reports_size_and_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();
        let meta = std::fs::symlink_metadata(&path).unwrap();
        let stat = stat_entry(&meta);
        assert_eq!(stat.size, 5);
        assert!(!stat.owner.is_empty());
        assert!(stat.mtime.timestamp() > 0);
    }
}
