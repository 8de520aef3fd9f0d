//! Temporary engine directories seeded with database files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Data and backup directories under a temporary root, removed on drop.
pub struct EngineRoot {
    _temp: TempDir,
    data_dir: PathBuf,
    backup_dir: PathBuf,
}

impl EngineRoot {
    /// Create empty `data/` and `backup/` directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directories cannot be created.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new().context("failed to create temporary root")?;
        let data_dir = temp.path().join("data");
        let backup_dir = temp.path().join("backup");
        fs::create_dir_all(&data_dir).context("failed to create data directory")?;
        fs::create_dir_all(&backup_dir).context("failed to create backup directory")?;
        Ok(Self {
            _temp: temp,
            data_dir,
            backup_dir,
        })
    }

    /// Directory holding `<name>.db` files.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory relative backup devices resolve against.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Path of the data file for `database`.
    #[must_use]
    pub fn database_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.db"))
    }

    /// Path of the transaction log for `database`.
    #[must_use]
    pub fn log_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.log"))
    }

    /// Path of a backup artifact stored in the backup directory.
    #[must_use]
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(name)
    }

    /// Write `contents` as the data file of `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn seed_database(&self, database: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.database_path(database);
        fs::write(&path, contents)
            .with_context(|| format!("failed to seed database {}", path.display()))?;
        Ok(path)
    }

    /// Write `contents` as the transaction log of `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn seed_log(&self, database: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.log_path(database);
        fs::write(&path, contents)
            .with_context(|| format!("failed to seed log {}", path.display()))?;
        Ok(path)
    }

    /// Current contents of the data file of `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_database(&self, database: &str) -> Result<Vec<u8>> {
        let path = self.database_path(database);
        fs::read(&path).with_context(|| format!("failed to read database {}", path.display()))
    }
}

/// Deterministic pseudo-random payload of `len` bytes.
#[must_use]
pub fn sample_rows(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state.to_le_bytes()[0]
        })
        .collect()
}
