use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::data::sqlite;

pub const DEFAULT_DATA_PROVIDER: &str = sqlite::PROVIDER_NAME;
pub const DEFAULT_DATA_PATH: &str = "data";

pub const DATA_PROVIDER_VAR: &str = "DIARY_DATA_PROVIDER";
pub const DATA_PATH_VAR: &str = "DIARY_DATA_PATH";
pub const KDF_ITERATIONS_VAR: &str = "DIARY_KDF_ITERATIONS";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_provider: String,
    pub data_path: PathBuf,
    pub kdf_iterations: Option<u32>,
}

impl AppConfig {
    pub fn from_env() -> Result<AppConfig> {
        AppConfig::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<AppConfig> {
        let kdf_iterations = match lookup(KDF_ITERATIONS_VAR) {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("While parsing {}={}", KDF_ITERATIONS_VAR, value))?,
            ),
            None => None,
        };
        Ok(AppConfig {
            data_provider: lookup(DATA_PROVIDER_VAR)
                .unwrap_or_else(|| DEFAULT_DATA_PROVIDER.to_owned()),
            data_path: lookup(DATA_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH)),
            kdf_iterations,
        })
    }

    /// Makes sure the data directory exists.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.data_path)
            .with_context(|| format!("While creating data directory {}", self.data_path.display()))
    }

    /// Parameters handed to the data provider.
    pub fn provider_params(&self) -> Value {
        let mut params = json!({ "base_path": self.data_path });
        if let Some(iterations) = self.kdf_iterations {
            params["iterations"] = json!(iterations);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use serde_json::json;
    use tempfile::TempDir;

    use super::AppConfig;
    use crate::data::ProviderRegistry;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.data_provider, "sqlite");
        assert_eq!(config.data_path, PathBuf::from("data"));
        assert_eq!(config.kdf_iterations, None);
        assert_eq!(config.provider_params(), json!({"base_path": "data"}));
    }

    #[test]
    fn overrides_and_provider_params() {
        let dir = TempDir::new().unwrap();
        let data_path = dir.path().join("diary");
        let config = config_from(&[
            ("DIARY_DATA_PATH", data_path.to_str().unwrap()),
            ("DIARY_KDF_ITERATIONS", "1000"),
        ])
        .unwrap();
        assert_eq!(config.kdf_iterations, Some(1000));

        let registry = ProviderRegistry::default();
        assert!(registry
            .validate_params(&config.data_provider, &config.provider_params())
            .is_err());
        config.prepare().unwrap();
        registry
            .validate_params(&config.data_provider, &config.provider_params())
            .unwrap();

        assert!(config_from(&[("DIARY_KDF_ITERATIONS", "many")]).is_err());
    }
}
