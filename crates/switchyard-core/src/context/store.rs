//! Context snapshot persistence
//!
//! Snapshots are stored as one JSON file per name under a directory,
//! `<data dir>/switchyard/contexts` by default.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ContextSnapshot;
use crate::error::{Error, Result};

/// File-backed store of named context snapshots
#[derive(Debug, Clone)]
pub struct ContextStore {
    dir: PathBuf,
}

impl ContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the platform data directory
    pub fn open_default() -> Self {
        Self::new(default_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, name: &str, snapshot: &ContextSnapshot) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)?;
        debug!(snapshot = name, path = %path.display(), entries = snapshot.entries.len(), "Saved context snapshot");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<ContextSnapshot> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(Error::Validation(format!("No saved context named '{}'", name)));
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Names of all readable snapshots, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => names.push(stem.to_string()),
                    None => warn!("Skipping snapshot with non UTF-8 name {:?}", path),
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a snapshot; returns whether it existed
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(Error::Validation(format!("Invalid snapshot name '{}'", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

/// Default snapshot directory
pub fn default_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("switchyard"))
        .unwrap_or_else(|| PathBuf::from(".switchyard"))
        .join("contexts")
}
