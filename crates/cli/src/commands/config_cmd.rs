//! `crucible config`: configuration management commands.

use std::path::Path;

use anyhow::Context;
use crucible_config::AppConfig;

use crate::host::load_config;

/// Print the effective configuration, env overrides applied, secrets omitted.
pub fn show(config_path: &Path) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    let has_key = config.has_api_key();
    config.backend.api_key = None;

    println!("{}", toml::to_string_pretty(&config)?);
    eprintln!(
        "# source: {}  api key: {}",
        config_path.display(),
        if has_key { "set" } else { "missing" }
    );
    Ok(())
}

pub fn path(config_path: &Path) -> anyhow::Result<()> {
    println!("{}", config_path.display());
    Ok(())
}

/// Write the default config file, refusing to overwrite unless forced.
pub fn init(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_default(config_path)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

fn write_default(config_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(config_path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(())
}
