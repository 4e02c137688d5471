//! Tunnel list command implementation

use std::sync::Arc;

use anyhow::{Context, Result};

use mk_core::config::TunnelConfig;
use mk_core::{SystemProbe, TunnelRegistry};

use crate::output::format_tunnels;

/// Execute `tunnel list`
pub fn list_command(config: &TunnelConfig) -> Result<()> {
    let probe = Arc::new(SystemProbe);
    let registry = TunnelRegistry::new(&config.registry_path, probe.clone());

    let tunnels = registry
        .list()
        .with_context(|| format!("Failed to read tunnel registry {:?}", registry.path()))?;

    println!("Registered Tunnels:");
    println!("{}", format_tunnels(&tunnels, probe.as_ref()));
    Ok(())
}
