//! Configuration loading and types for dropstore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `storage` section selects and parameterizes
//! the backend; the `logging` section is consumed by
//! [`crate::logging::init`] in the embedding service.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upload storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Upload storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, or `s3`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Days after which stored uploads expire (0 = never).
    ///
    /// The S3 backend attaches the expiry to each object at upload
    /// time; the local and memory backends enforce it through
    /// `purge`.
    #[serde(default)]
    pub purge_days: u64,

    /// Local filesystem storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Memory storage configuration.
    #[serde(default)]
    pub memory: Option<MemoryStorageConfig>,

    /// S3 storage configuration.
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            purge_days: 0,
            local: LocalStorageConfig::default(),
            memory: None,
            s3: None,
        }
    }
}

impl StorageConfig {
    /// The configured retention window, or `None` when uploads never
    /// expire.
    pub fn purge_ttl(&self) -> Option<Duration> {
        if self.purge_days == 0 {
            return None;
        }
        Some(Duration::from_secs(self.purge_days * 24 * 60 * 60))
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored uploads.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Memory storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// S3 storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
    /// Upload parts sequentially instead of with concurrent workers.
    #[serde(default)]
    pub disable_multipart: bool,
}

// -- Defaults ----------------------------------------------------------------

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_local_backend() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.storage.purge_days, 0);
        assert!(config.storage.purge_ttl().is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn purge_days_convert_to_duration() {
        let yaml = "storage:\n  purge_days: 7\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.storage.purge_ttl(),
            Some(Duration::from_secs(7 * 24 * 60 * 60))
        );
    }

    #[test]
    fn s3_section_parses() {
        let yaml = r#"
storage:
  backend: s3
  purge_days: 3
  s3:
    bucket: uploads
    region: eu-west-1
    endpoint_url: "http://localhost:9000"
    use_path_style: true
    disable_multipart: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let s3 = config.storage.s3.expect("s3 section");
        assert_eq!(s3.bucket, "uploads");
        assert_eq!(s3.region, "eu-west-1");
        assert!(s3.use_path_style);
        assert!(s3.disable_multipart);
        assert!(s3.access_key_id.is_empty());
    }
}
