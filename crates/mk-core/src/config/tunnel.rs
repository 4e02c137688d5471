//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the `tunnel` command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Name of the machine and cluster profile to tunnel into
    pub profile: String,

    /// Time between reconciliation ticks
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,

    /// Consecutive failed inspections tolerated before the tunnel gives up
    pub max_inspect_failures: u32,

    /// Install a host route to the cluster service CIDR
    pub route: bool,

    /// Forward load-balancer service ports to the host over SSH
    pub forward: bool,

    /// User for the SSH forwarders
    pub ssh_user: String,

    /// Private key for the SSH forwarders (defaults to the machine's key)
    pub ssh_key_path: Option<PathBuf>,

    /// Host address forwarded ports listen on
    pub bind_address: String,

    /// Location of the tunnel registry shared by all tunnels on this host
    pub registry_path: PathBuf,

    /// Directory holding one `<name>/config.json` per cluster profile
    pub profiles_dir: PathBuf,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            profile: "mkube".to_string(),
            tick_interval: Duration::from_secs(1),
            max_inspect_failures: 60,
            route: true,
            forward: true,
            ssh_user: "docker".to_string(),
            ssh_key_path: None,
            bind_address: "127.0.0.1".to_string(),
            registry_path: super::default_registry_path(),
            profiles_dir: config_dir.join("profiles"),
        }
    }
}

impl TunnelConfig {
    /// SSH key used to reach the machine
    pub fn ssh_key_path(&self) -> PathBuf {
        self.ssh_key_path.clone().unwrap_or_else(|| {
            super::default_config_dir()
                .join("machines")
                .join(&self.profile)
                .join("id_rsa")
        })
    }
}
