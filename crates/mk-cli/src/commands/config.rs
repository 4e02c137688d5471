//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use mk_core::config::{self, TunnelConfig};

fn resolve(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Show the configuration file and the settings in effect
pub fn config_show(config_path: Option<&PathBuf>, effective: &TunnelConfig) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'mkube config init' to create one");
    }
    println!();

    let rendered =
        toml::to_string_pretty(effective).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve(config_path).display());
}

/// Write a configuration file with the default settings
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_default(&path)?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn write_default(path: &Path) -> Result<()> {
    config::save_config(path, &TunnelConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}
