// ABOUTME: Writes a starter fleet configuration file.
// ABOUTME: Refuses to overwrite an existing config unless forced.

use anyhow::{bail, Result};
use fleet_core::Config;
use std::path::{Path, PathBuf};

pub fn run_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    write_starter_config(&path, force)?;

    println!("Config written to {}", path.display());
    println!("\nEdit [source] and [worker], then run: fleet run");
    Ok(())
}

fn write_starter_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::write_template(path)
}
