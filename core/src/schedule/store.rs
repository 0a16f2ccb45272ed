//! Persistent schedule storage
//!
//! One JSON file, schema-versioned, written atomically via tmp+rename so a
//! crash mid-write never corrupts the schedule book.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schedule::ScheduleEntry;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulesFile {
    pub schema_version: u32,
    pub entries: Vec<ScheduleEntry>,
}

impl Default for SchedulesFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

pub struct ScheduleStore {
    root_dir: PathBuf,
    file_path: PathBuf,
}

impl ScheduleStore {
    pub fn new_in(root_dir: PathBuf) -> Self {
        let file_path = root_dir.join("schedules.json");
        Self {
            root_dir,
            file_path,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn load(&self) -> Result<SchedulesFile> {
        if !self.file_path.exists() {
            return Ok(SchedulesFile::default());
        }

        let content = fs::read_to_string(&self.file_path)
            .with_context(|| format!("Failed to read schedules file: {:?}", self.file_path))?;

        if content.trim().is_empty() {
            return Ok(SchedulesFile::default());
        }

        let parsed: SchedulesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse schedules file: {:?}", self.file_path))?;

        if parsed.schema_version > SCHEMA_VERSION {
            tracing::warn!(
                found = parsed.schema_version,
                supported = SCHEMA_VERSION,
                "schedules file is newer than this build; loading anyway"
            );
        }

        Ok(parsed)
    }

    pub fn save(&self, file: &SchedulesFile) -> Result<()> {
        fs::create_dir_all(&self.root_dir)
            .with_context(|| format!("Failed to create schedules dir: {:?}", self.root_dir))?;

        let content =
            serde_json::to_string_pretty(file).context("Failed to serialize schedules file")?;

        atomic_write(&self.file_path, content.as_bytes()).with_context(|| {
            format!(
                "Failed to atomically write schedules file: {:?}",
                self.file_path
            )
        })
    }
}

pub(crate) fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest
        .parent()
        .context("Destination path has no parent directory")?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create parent dir: {:?}", parent))?;

    let tmp = dest.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));

    fs::write(&tmp, bytes).with_context(|| format!("Failed to write temp file: {:?}", tmp))?;

    // Best-effort cleanup on failure.
    if let Err(rename_err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(rename_err).context("Failed to rename temp file into place");
    }

    Ok(())
}
