use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

/// Environment variable that overrides the platform data directory.
pub const DATA_DIR_ENV: &str = "WAYFARE_DATA_DIR";

pub struct Config {
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory: explicit override, then `WAYFARE_DATA_DIR`,
    /// then the platform default. The directory is created if missing.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir.or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "wayfare")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config { data_dir })
    }

    pub fn trips_path(&self) -> PathBuf {
        self.data_dir.join("trips.csv")
    }

    pub fn meals_path(&self) -> PathBuf {
        self.data_dir.join("meals.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins_and_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("wayfare");
        let config = Config::load(Some(dir.clone())).unwrap();
        assert!(dir.is_dir());
        assert_eq!(config.trips_path(), dir.join("trips.csv"));
        assert_eq!(config.meals_path(), dir.join("meals.csv"));
    }
}
