//! JSON experiment configuration, written out with defaults on first use.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::{
    error::ConfigError,
    evaluate::Hyperparameters,
    grid_search::HyperGrid,
    models::Family,
    pairs::DataSettings,
    training::TrainingConfig,
};

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    let io_err = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };

    if path.exists() {
        let contents = fs::read_to_string(path).map_err(io_err)?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let value = initializer();
        let serialized = serde_json::to_string_pretty(&value).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, serialized).map_err(io_err)?;

        info!("wrote default config to {}", path.display());

        Ok(value)
    }
}

/// Hyperparameters used by `validate`/`evaluate` and the grid explored by `tune`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub params: Hyperparameters,
    pub grid: HyperGrid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FamilyConfigs {
    pub basic: FamilyConfig,
    pub sharing: FamilyConfig,
    pub sharing_aux: FamilyConfig,
}

impl Default for FamilyConfigs {
    fn default() -> Self {
        let probs = vec![0.0, 0.25, 0.5];

        Self {
            basic: FamilyConfig {
                params: Hyperparameters {
                    learning_rate: 1e-3,
                    values: vec![0.25, 100.0],
                },
                grid: HyperGrid {
                    learning_rates: vec![1e-3, 5e-3],
                    axes: vec![probs.clone(), vec![25.0, 50.0, 100.0]],
                },
            },
            sharing: FamilyConfig {
                params: Hyperparameters {
                    learning_rate: 1e-3,
                    values: vec![0.25, 0.25],
                },
                grid: HyperGrid {
                    learning_rates: vec![1e-3, 5e-3],
                    axes: vec![probs.clone(), probs.clone()],
                },
            },
            sharing_aux: FamilyConfig {
                params: Hyperparameters {
                    learning_rate: 1e-3,
                    values: vec![0.25, 0.25],
                },
                grid: HyperGrid {
                    learning_rates: vec![1e-3, 5e-3],
                    axes: vec![probs.clone(), probs],
                },
            },
        }
    }
}

impl FamilyConfigs {
    pub fn get(&self, family: Family) -> &FamilyConfig {
        match family {
            Family::Basic => &self.basic,
            Family::Sharing => &self.sharing,
            Family::SharingAux => &self.sharing_aux,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub seeds: Vec<u64>,
    /// Seed of the single `validate` run.
    pub validation_seed: u64,
    pub plots_dir: PathBuf,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub families: FamilyConfigs,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seeds: (0..10).collect(),
            validation_seed: 0,
            plots_dir: PathBuf::from("plots"),
            data: DataSettings::default(),
            training: TrainingConfig::default(),
            families: FamilyConfigs::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelFamily;

    #[test]
    fn missing_config_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        let created: ExperimentConfig = load_or_init(&path, ExperimentConfig::default).unwrap();
        assert!(path.exists());

        let loaded: ExperimentConfig = load_or_init(&path, || unreachable!()).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn invalid_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_or_init::<ExperimentConfig, _>(&path, ExperimentConfig::default).unwrap_err();

        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn default_grids_match_their_families() {
        let config = ExperimentConfig::default();

        for family in [Family::Basic, Family::Sharing, Family::SharingAux] {
            let entry = config.families.get(family);
            entry.grid.check(&family).unwrap();
            entry.params.check(&family).unwrap();
            assert_eq!(entry.params.values.len(), family.axes().len());
        }
    }
}
