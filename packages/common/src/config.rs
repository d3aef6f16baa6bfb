use std::path::PathBuf;

use serde::Deserialize;

/// Which [`AssetStore`](crate::storage::AssetStore) backs the deployment.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Filesystem,
    S3,
}

/// Bucket settings for the `object-storage` backend.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct S3StoreConfig {
    pub bucket: String,
    /// AWS region name, or the signing region of a custom endpoint. Default: "us-east-1".
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// Custom endpoint URL for MinIO, R2 and the like.
    pub endpoint: Option<String>,
    /// Prepended to every key, e.g. "site-a/". Default: "".
    #[serde(default)]
    pub prefix: String,
    /// Use path-style addressing (required by MinIO). Default: false.
    #[serde(default)]
    pub path_style: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

fn default_s3_region() -> String {
    "us-east-1".into()
}

/// Asset store configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageAppConfig {
    /// Default: filesystem.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Filesystem root. Default: "./media".
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// URL prefix used by display layers. Default: "/media".
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Largest accepted upload, in bytes. Default: 64 MiB.
    #[serde(default = "default_max_asset_size")]
    pub max_asset_size: u64,
    #[serde(default)]
    pub s3: Option<S3StoreConfig>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./media")
}
fn default_public_url() -> String {
    "/media".into()
}
fn default_max_asset_size() -> u64 {
    64 * 1024 * 1024
}

impl Default for StorageAppConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            root: default_storage_root(),
            public_url: default_public_url(),
            max_asset_size: default_max_asset_size(),
            s3: None,
        }
    }
}

/// Image normalization policy.
#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    /// Images wider than this are downscaled. Default: 1920.
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// Lossy re-encode quality, 1-100. Default: 85.
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_max_width() -> u32 {
    1920
}
fn default_quality() -> u8 {
    85
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            quality: default_quality(),
        }
    }
}

/// Orphan sweeper schedule and limits.
#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    /// Whether the periodic sweep runs. Default: true.
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps. Default: 3600.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Unreferenced objects younger than this are left alone. Default: 900.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Sweeps that may fail to purge a deferred key before it is dropped. Default: 5.
    #[serde(default = "default_max_purge_retries")]
    pub max_purge_retries: u8,
}

fn default_sweeper_enabled() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_grace_period_secs() -> u64 {
    900
}
fn default_max_purge_retries() -> u8 {
    5
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
            max_purge_retries: default_max_purge_retries(),
        }
    }
}
