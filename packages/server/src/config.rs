use common::config::{ImageConfig, StorageAppConfig, SweeperConfig};
use config::{Config, ConfigError, Environment, File};
use lifecycle::{LifecycleError, OwnerCatalog, OwnerKindSpec};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Default: 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Default: 1.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageAppConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Owner kinds. Empty means the built-in content-site catalog.
    #[serde(default)]
    pub kinds: Vec<OwnerKindSpec>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/config")
    }

    /// Load `{path}.toml` (optional) with `ASSETS__*` environment overrides on top.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("database.url", "sqlite://assets.db?mode=rwc")?
            .add_source(File::with_name(path).required(false))
            // Override from environment (e.g., ASSETS__DATABASE__URL)
            .add_source(Environment::with_prefix("ASSETS").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn catalog(&self) -> Result<OwnerCatalog, LifecycleError> {
        if self.kinds.is_empty() {
            Ok(OwnerCatalog::content_site())
        } else {
            OwnerCatalog::new(self.kinds.clone())
        }
    }
}
