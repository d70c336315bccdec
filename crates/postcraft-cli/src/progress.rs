//! Batch progress file (`<output>/progress.json`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const PROGRESS_FILE: &str = "progress.json";

/// Which records are done, which failed, and where their output went.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Progress {
    /// Records whose three outputs were written.
    pub completed: BTreeSet<usize>,
    /// Records that could not be finished, with the step that failed.
    pub unresolved: BTreeMap<usize, String>,
    /// Output folder owned by each completed record.
    pub folders: BTreeMap<usize, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn path_in(output_dir: &Path) -> PathBuf {
        output_dir.join(PROGRESS_FILE)
    }

    /// Load progress, starting fresh if the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<Progress>(&s).map_err(anyhow::Error::from))
        {
            Ok(progress) => {
                debug!(
                    path = %path.display(),
                    completed = progress.completed.len(),
                    unresolved = progress.unresolved.len(),
                    "Loaded progress"
                );
                progress
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable progress file");
                Self::default()
            }
        }
    }

    /// Stamp and write the progress file.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(Utc::now());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize progress")?;

        // Temp file + rename: readers see the old file or the new one, never a partial write.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    pub fn mark_completed(&mut self, index: usize, folder: impl Into<String>) {
        self.unresolved.remove(&index);
        self.completed.insert(index);
        self.folders.insert(index, folder.into());
    }

    pub fn mark_unresolved(&mut self, index: usize, reason: impl Into<String>) {
        self.unresolved.insert(index, reason.into());
    }

    /// Record that owns `folder`, if any.
    pub fn folder_owner(&self, folder: &str) -> Option<usize> {
        self.folders
            .iter()
            .find(|(_, f)| f.as_str() == folder)
            .map(|(index, _)| *index)
    }
}
