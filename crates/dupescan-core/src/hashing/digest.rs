use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Read-chunk size scaled to file size: small files pay small buffers,
/// large files amortize syscalls.
pub(crate) fn chunk_size(file_len: u64) -> usize {
    if file_len < MIB {
        (32 * KIB) as usize
    } else if file_len < 100 * MIB {
        (128 * KIB) as usize
    } else {
        (256 * KIB) as usize
    }
}

/// Stream a file through MD5, checking for cancellation and the per-attempt
/// deadline between chunks. Returns `None` for empty files (they are never
/// assigned a digest), otherwise the lowercase-hex 128-bit digest.
pub fn hash_file(
    path: &Path,
    cancel: &AtomicBool,
    deadline: Instant,
) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; chunk_size(len)];
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "hashing cancelled"));
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "hash attempt deadline exceeded",
            ));
        }
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_chunk_size_tiers() {
        assert_eq!(chunk_size(1), 32 * 1024);
        assert_eq!(chunk_size(MIB - 1), 32 * 1024);
        assert_eq!(chunk_size(MIB), 128 * 1024);
        assert_eq!(chunk_size(100 * MIB), 256 * 1024);
    }

    #[test]
    fn test_empty_file_has_no_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        let cancel = AtomicBool::new(false);
        let digest = hash_file(&path, &cancel, far_deadline()).unwrap();
        assert_eq!(digest, None);
    }

    #[test]
    fn test_identical_content_same_digest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let c = dir.path().join("c.bin");
        std::fs::write(&a, vec![0xAB; 4096]).unwrap();
        std::fs::write(&b, vec![0xAB; 4096]).unwrap();
        std::fs::write(&c, vec![0xCD; 4096]).unwrap();
        let cancel = AtomicBool::new(false);
        let da = hash_file(&a, &cancel, far_deadline()).unwrap().unwrap();
        let db = hash_file(&b, &cancel, far_deadline()).unwrap().unwrap();
        let dc = hash_file(&c, &cancel, far_deadline()).unwrap().unwrap();
        assert_eq!(da, db);
        assert_ne!(da, dc);
        assert_eq!(da.len(), 32);
        assert!(da.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }

    #[test]
    fn test_cancelled_hash_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, vec![1u8; 1024]).unwrap();
        let cancel = AtomicBool::new(true);
        let err = hash_file(&path, &cancel, far_deadline()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn test_missing_file_is_error() {
        let cancel = AtomicBool::new(false);
        assert!(hash_file(Path::new("/no/such/file"), &cancel, far_deadline()).is_err());
    }
}
