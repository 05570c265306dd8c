use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Overrides the platform data directory when set.
pub const DATA_DIR_ENV: &str = "PORTION_DATA_DIR";

pub struct Config {
    pub db_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
            return Self::from_data_dir(Path::new(&dir));
        }

        let proj_dirs =
            ProjectDirs::from("", "", "portion").context("Could not determine home directory")?;
        Self::from_data_dir(proj_dirs.data_dir())
    }

    pub fn from_data_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("portion.db");

        Ok(Config { db_path })
    }
}
