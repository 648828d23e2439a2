//! Persistence boundary for the record tree.
//!
//! The engine treats persistence as an external collaborator behind the
//! [`Persistence`] trait: the full record tree is loaded once at startup
//! and saved all-or-nothing; partial sub-trees are never written. The
//! bundled [`SnapshotStore`] keeps the tree as a JSON snapshot file under
//! the data directory.

mod retry;
mod snapshot;

pub use retry::{persist_with_retry, RetryPolicy};
pub use snapshot::SnapshotStore;

use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::PersistenceError;
use crate::record::RecordTree;

/// Returns `~/.config/chorewheel[-dev]/` based on CHOREWHEEL_ENV.
///
/// Set CHOREWHEEL_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("CHOREWHEEL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("chorewheel-dev")
    } else {
        base_dir.join("chorewheel")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// All-or-nothing record-tree persistence.
pub trait Persistence: Send {
    /// Load the full record tree. A missing backing file is an empty tree.
    fn load(&self) -> Result<RecordTree, PersistenceError>;

    /// Save the full record tree. Either the whole tree lands or the call
    /// fails; the caller retries on failure.
    fn save(&self, tree: &RecordTree) -> Result<(), PersistenceError>;
}

/// In-memory persistence for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tree: Mutex<RecordTree>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved tree.
    pub fn snapshot(&self) -> RecordTree {
        self.tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Persistence for MemoryStore {
    fn load(&self) -> Result<RecordTree, PersistenceError> {
        Ok(self.snapshot())
    }

    fn save(&self, tree: &RecordTree) -> Result<(), PersistenceError> {
        let mut guard = self
            .tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = tree.clone();
        Ok(())
    }
}
