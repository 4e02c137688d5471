//! Persisted cluster profiles
//!
//! A profile is written when the cluster is created and describes it for
//! later commands. The tunnel only needs the cluster name and its service
//! CIDR, so everything else in the file is ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Service CIDR used when a profile does not name one
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";

/// Cluster description stored in `profiles/<name>/config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterProfile {
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub kubernetes_config: KubernetesConfig,
}

/// Kubernetes settings of a cluster profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KubernetesConfig {
    #[serde(rename = "ServiceCIDR", default = "default_service_cidr")]
    pub service_cidr: String,
}

fn default_service_cidr() -> String {
    DEFAULT_SERVICE_CIDR.to_string()
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            service_cidr: default_service_cidr(),
        }
    }
}

/// Path of the profile file for `name` under `profiles_dir`
pub fn profile_path(profiles_dir: &Path, name: &str) -> PathBuf {
    profiles_dir.join(name).join("config.json")
}

/// Load the cluster profile called `name`
pub fn load_profile(profiles_dir: &Path, name: &str) -> Result<ClusterProfile, ConfigError> {
    let path = profile_path(profiles_dir, name);
    if !path.exists() {
        return Err(ConfigError::NotFound(path));
    }

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    Ok(serde_json::from_str(&content)?)
}
