//! Verbatim archival of raw status responses.
//!
//! Each body is written to its own file named after the poll time in UTC,
//! e.g. `20261019083015.123456`, so a directory listing sorts by time.
//! Archived files can be fed back through `btsmarthub2-exporter parse`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    /// Opens an archive in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create datastore directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `body` for the poll made at `polled_at` and returns its path.
    pub fn store(&self, polled_at: DateTime<Utc>, body: &str) -> Result<PathBuf> {
        let path = self.dir.join(file_name(polled_at));
        fs::write(&path, body)
            .with_context(|| format!("Failed to archive response: {}", path.display()))?;
        Ok(path)
    }
}

fn file_name(polled_at: DateTime<Utc>) -> String {
    polled_at.format("%Y%m%d%H%M%S%.6f").to_string()
}
