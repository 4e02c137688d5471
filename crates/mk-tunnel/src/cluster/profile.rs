//! Cluster profile store

use std::path::PathBuf;

use mk_core::config::{load_profile, ClusterProfile};
use mk_core::error::InspectError;

/// Reads persisted cluster descriptions
pub trait ProfileStore: Send + Sync {
    fn load(&self, name: &str) -> Result<ClusterProfile, InspectError>;
}

/// Profiles stored as `<dir>/<name>/config.json`
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    dir: PathBuf,
}

impl FileProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ProfileStore for FileProfileStore {
    fn load(&self, name: &str) -> Result<ClusterProfile, InspectError> {
        load_profile(&self.dir, name).map_err(|e| InspectError::Profile {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}
