use config::{Config, File as ConfigFile, FileFormat};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;

const DEFAULT_BATCH_SIZE: usize = 5_000;
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_EXCLUDE_DIRS: &str = ".git,.streams,@Recently-Snapshot,@Recycle";
const DEFAULT_TOP_FOLDER_DEPTH: usize = 4;

/// One configured traversal root: an absolute path plus the tag every
/// folder and file under it inherits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSpec {
    pub path: String,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub max_workers: usize,
    pub exclude_dirs: HashSet<String>,
    pub top_folder_depth: usize,
    pub roots: Vec<RootSpec>,
}

/// Load `config.ini`-style configuration:
///
/// ```ini
/// [output]
/// output_dir = ./output_scans
/// [scan]
/// BATCH_SIZE = 5000
/// MAX_WORKERS = 4
/// EXCLUDE_DIRS = .git,@Recycle
/// [paths]
/// photos = /mnt/photos:family
/// docs = /mnt/docs
/// ```
///
/// Every entry under `[paths]` defines a root; a missing `:<tag>` suffix
/// defaults the tag to the final path segment. A missing or empty `[paths]`
/// section is a fatal configuration error.
pub fn load_configuration(path: &str) -> Result<ScanConfig, Error> {
    let settings = Config::builder()
        .add_source(ConfigFile::new(path, FileFormat::Ini))
        .build()?;

    let output_dir = PathBuf::from(
        get_str(&settings, "output", "output_dir").unwrap_or_else(|| "./output_scans".to_string()),
    );
    fs::create_dir_all(&output_dir)?;

    let batch_size = get_int(&settings, "scan", "BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE as i64);
    let max_workers =
        get_int(&settings, "scan", "MAX_WORKERS").unwrap_or(DEFAULT_MAX_WORKERS as i64);
    let exclude_csv = get_str(&settings, "scan", "EXCLUDE_DIRS")
        .unwrap_or_else(|| DEFAULT_EXCLUDE_DIRS.to_string());
    let top_folder_depth = get_int(&settings, "scan", "TOP_FOLDER_DEPTH")
        .unwrap_or(DEFAULT_TOP_FOLDER_DEPTH as i64);

    let exclude_dirs: HashSet<String> = exclude_csv
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let roots = parse_roots(&settings)?;

    Ok(ScanConfig {
        output_dir,
        batch_size: batch_size.max(1) as usize,
        max_workers: max_workers.max(1) as usize,
        exclude_dirs,
        top_folder_depth: top_folder_depth.max(1) as usize,
        roots,
    })
}

fn parse_roots(settings: &Config) -> Result<Vec<RootSpec>, Error> {
    let table = settings
        .get_table("paths")
        .map_err(|_| Error::Config(config::ConfigError::Message(
            "missing [paths] section in configuration".to_string(),
        )))?;

    // INI tables deserialize in arbitrary order; sort by key so runs are
    // reproducible.
    let mut entries: Vec<(String, String)> = table
        .into_iter()
        .filter_map(|(k, v)| v.into_string().ok().map(|s| (k, s)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut roots = Vec::new();
    for (_, value) in entries {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let spec = match value.split_once(':') {
            Some((p, t)) => RootSpec {
                path: p.trim().to_string(),
                tag: t.trim().to_string(),
            },
            None => RootSpec {
                path: value.to_string(),
                tag: default_tag(value),
            },
        };
        roots.push(spec);
    }

    if roots.is_empty() {
        return Err(Error::Config(config::ConfigError::Message(
            "[paths] section defines no roots".to_string(),
        )));
    }
    Ok(roots)
}

fn default_tag(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

// The `config` crate's key handling has varied in case sensitivity across
// versions; look keys up as written, then lowercased.
fn get_str(settings: &Config, section: &str, key: &str) -> Option<String> {
    settings
        .get_string(&format!("{section}.{key}"))
        .or_else(|_| settings.get_string(&format!("{section}.{}", key.to_lowercase())))
        .ok()
}

fn get_int(settings: &Config, section: &str, key: &str) -> Option<i64> {
    settings
        .get_int(&format!("{section}.{key}"))
        .or_else(|_| settings.get_int(&format!("{section}.{}", key.to_lowercase())))
        .ok()
}

/// The path segment at `depth` (0-based from the root), used to bucket file
/// rows for reporting. Falls back to the last segment on shallow paths.
pub fn top_folder(path: &str, depth: usize) -> String {
    let normalized = path.replace('\\', "/");
    let parts: Vec<&str> = normalized
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() > depth {
        return parts[depth].to_string();
    }
    parts.last().map(|s| s.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_top_folder_deep_path() {
        assert_eq!(top_folder("/a/b/c/d/e/f", 4), "e");
    }

    #[test]
    fn test_top_folder_shallow_path_falls_back_to_last() {
        assert_eq!(top_folder("/a/b", 4), "b");
    }

    #[test]
    fn test_top_folder_empty() {
        assert_eq!(top_folder("/", 4), "");
    }

    #[test]
    fn test_default_tag_is_last_segment() {
        assert_eq!(default_tag("/mnt/data/photos"), "photos");
    }

    #[test]
    fn test_load_configuration_defaults_and_roots() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("config.ini");
        let out_dir = dir.path().join("scans");
        let mut f = fs::File::create(&cfg_path).unwrap();
        writeln!(f, "[output]").unwrap();
        writeln!(f, "output_dir = {}", out_dir.display()).unwrap();
        writeln!(f, "[scan]").unwrap();
        writeln!(f, "BATCH_SIZE = 1000").unwrap();
        writeln!(f, "MAX_WORKERS = 2").unwrap();
        writeln!(f, "EXCLUDE_DIRS = .git, node_modules").unwrap();
        writeln!(f, "[paths]").unwrap();
        writeln!(f, "a = /mnt/data:archive").unwrap();
        writeln!(f, "b = /mnt/photos").unwrap();
        drop(f);

        let cfg = load_configuration(cfg_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.max_workers, 2);
        assert!(cfg.exclude_dirs.contains(".git"));
        assert!(cfg.exclude_dirs.contains("node_modules"));
        assert_eq!(cfg.roots.len(), 2);
        assert_eq!(
            cfg.roots[0],
            RootSpec {
                path: "/mnt/data".to_string(),
                tag: "archive".to_string()
            }
        );
        assert_eq!(cfg.roots[1].tag, "photos");
        assert!(out_dir.is_dir());
    }

    #[test]
    fn test_load_configuration_missing_paths_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("config.ini");
        fs::write(&cfg_path, "[scan]\nBATCH_SIZE = 10\n").unwrap();
        let err = load_configuration(cfg_path.to_str().unwrap());
        assert!(err.is_err());
    }
}
