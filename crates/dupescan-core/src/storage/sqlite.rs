use rusqlite::{Connection, OpenFlags, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Connection tuning profile, one per pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Phase 1: write-heavy, single writer connection.
    Scan,
    /// Phase 2 and materialization: read-heavy with one writer.
    Hash,
    /// Deletion: mixed read/write, foreign keys enforced.
    Delete,
    /// Reporting: read-only, large cache and mmap window.
    Report,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a fresh store, removing any pre-existing file of the same
    /// name. Each indexing run produces its own store.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas(Profile::Scan)?;
        db.init_schema()?;
        Ok(db)
    }

    /// Open an existing store. Fails if the file does not exist.
    pub fn open(path: &Path, profile: Profile) -> Result<Self> {
        let flags = if profile == Profile::Report {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(path, flags)?;
        let db = Database { conn };
        db.configure_pragmas(profile)?;
        if profile != Profile::Report {
            db.upgrade_schema()?;
        }
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas(Profile::Scan)?;
        db.init_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self, profile: Profile) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -64000;
             PRAGMA mmap_size = 268435456;
             PRAGMA busy_timeout = 5000;",
        )?;
        match profile {
            Profile::Delete => {
                self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            }
            Profile::Report => {
                self.conn.execute_batch(
                    "PRAGMA query_only = 1;
                     PRAGMA cache_size = -128000;
                     PRAGMA mmap_size = 536870912;",
                )?;
            }
            Profile::Scan | Profile::Hash => {}
        }
        debug!(?profile, "SQLite pragmas configured (WAL, 64MB+ cache, mmap)");
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized");
        Ok(())
    }

    /// Non-destructive upgrade for stores produced before the aggregate
    /// folder columns existed: add missing columns, then (re)apply the
    /// schema so missing indexes are created.
    fn upgrade_schema(&self) -> Result<()> {
        let mut existing: Vec<String> = Vec::new();
        {
            let mut stmt = self.conn.prepare("PRAGMA table_info(folders)")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                existing.push(row.get::<_, String>(1)?);
            }
        }
        if existing.is_empty() {
            // No folders table at all: brand-new or foreign file.
            return self.init_schema();
        }
        for column in [
            "own_size",
            "own_file_count",
            "subtree_size",
            "subtree_file_count",
        ] {
            if !existing.iter().any(|c| c == column) {
                self.conn.execute_batch(&format!(
                    "ALTER TABLE folders ADD COLUMN {column} BIGINT NOT NULL DEFAULT 0;"
                ))?;
                debug!(column, "added aggregate folder column");
            }
        }
        self.init_schema()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
