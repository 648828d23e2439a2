//! JSON snapshot file for the record tree.
//!
//! Stored at `~/.config/chorewheel/records.json`. Writes go through a
//! temporary file followed by a rename, so a crashed save never leaves a
//! torn tree behind.

use std::path::PathBuf;

use crate::error::PersistenceError;
use crate::record::RecordTree;
use crate::storage::{data_dir, Persistence};

/// File-backed record-tree store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Open the store at the default data-directory location.
    pub fn open() -> Result<Self, PersistenceError> {
        let dir = data_dir().map_err(|e| PersistenceError::LoadFailed(e.to_string()))?;
        Ok(Self {
            path: dir.join("records.json"),
        })
    }

    /// Open the store at an explicit path (tests, embedders).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Persistence for SnapshotStore {
    fn load(&self) -> Result<RecordTree, PersistenceError> {
        if !self.path.exists() {
            return Ok(RecordTree::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| PersistenceError::LoadFailed(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| PersistenceError::LoadFailed(e.to_string()))
    }

    fn save(&self, tree: &RecordTree) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(tree)
            .map_err(|e| PersistenceError::SerializationFailed(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| PersistenceError::SaveFailed {
            attempts: 1,
            message: e.to_string(),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::SaveFailed {
            attempts: 1,
            message: e.to_string(),
        })
    }
}
