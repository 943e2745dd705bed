//! Service configuration for mlm-trainer
//!
//! Resolves the TOML file and the root folder, and lays out the storage
//! files beneath it:
//!
//! ```text
//! <root>/
//!   data/training.json   primary training data
//!   data/buffer.json     training buffer (ingested, not yet committed)
//!   models/model.json    last saved model
//!   staging/             staging files for data merges
//! ```

use mlm_common::config::{default_config_path, load_toml_config, TomlConfig};
use mlm_common::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Module name used for config and root folder resolution
pub const MODULE_NAME: &str = "mlm-trainer";

/// Storage file locations under the root folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub buffer: PathBuf,
    pub model: PathBuf,
    pub staging: PathBuf,
}

impl TrainerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data: root.join("data").join("training.json"),
            buffer: root.join("data").join("buffer.json"),
            model: root.join("models").join("model.json"),
            staging: root.join("staging"),
            root,
        }
    }

    /// Create every directory the layout needs
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.data.parent(),
            self.model.parent(),
            Some(self.staging.as_path()),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(dir)?;
        }
        debug!(root = %self.root.display(), "Storage directories ready");
        Ok(())
    }
}

/// Load the TOML config from `path`, or from the default location
///
/// No path and no default location yields the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    match path.map(Path::to_path_buf).or_else(|| default_config_path(MODULE_NAME)) {
        Some(path) => load_toml_config(&path),
        None => Ok(TomlConfig::default()),
    }
}

/// Staging directory: configured value, else `<root>/staging`
pub fn staging_dir(config: &TomlConfig, paths: &TrainerPaths) -> PathBuf {
    config
        .training
        .staging_dir
        .clone()
        .unwrap_or_else(|| paths.staging.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlm_common::config::TrainingSettings;

    #[test]
    fn test_layout_under_root() {
        let paths = TrainerPaths::new("/srv/mlm");
        assert_eq!(paths.data, PathBuf::from("/srv/mlm/data/training.json"));
        assert_eq!(paths.buffer, PathBuf::from("/srv/mlm/data/buffer.json"));
        assert_eq!(paths.model, PathBuf::from("/srv/mlm/models/model.json"));
    }

    #[test]
    fn test_ensure_dirs_creates_layout() {
        let temp = tempfile::tempdir().unwrap();
        let paths = TrainerPaths::new(temp.path().join("root"));

        paths.ensure_dirs().unwrap();

        assert!(paths.data.parent().unwrap().is_dir());
        assert!(paths.model.parent().unwrap().is_dir());
        assert!(paths.staging.is_dir());
    }

    #[test]
    fn test_configured_staging_dir_wins() {
        let paths = TrainerPaths::new("/srv/mlm");
        let mut config = TomlConfig::default();
        assert_eq!(staging_dir(&config, &paths), paths.staging);

        config.training.staging_dir = Some(PathBuf::from("/tmp/stage"));
        assert_eq!(staging_dir(&config, &paths), PathBuf::from("/tmp/stage"));
    }

    #[test]
    fn test_missing_explicit_config_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = load_config(Some(&temp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.training, TrainingSettings::default());
        assert!(config.root_folder.is_none());
    }
}
