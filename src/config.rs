use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub uploads: UploadPolicy,
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEngine {
    Memory,
    Redb,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub metadata: MetadataEngine,
    /// Root directory of the file data backend
    pub file_storage_path: String,
}

/// Server-side rules applied when uploads are created and filled.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Seconds, used when a request carries no TTL
    pub default_ttl: u64,
    /// Seconds, 0 means uploads may never expire
    pub max_ttl: u64,
    /// Bytes
    pub max_file_size: u64,
    pub max_files_per_upload: usize,
    pub one_shot: bool,
    pub removable: bool,
    pub stream: bool,
    pub password: bool,
    pub no_anonymous_uploads: bool,
    /// Let anyone add files to uploads that have no owning user
    pub anonymous_contributions: bool,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub min_offset: Duration,
    pub random_delay: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata: MetadataEngine::Redb,
            file_storage_path: "./files".to_string(),
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            default_ttl: 30 * DAY_SECS,
            max_ttl: 30 * DAY_SECS,
            max_file_size: 10 * 1024 * 1024 * 1024, // 10GB
            max_files_per_upload: 1000,
            one_shot: true,
            removable: true,
            stream: true,
            password: true,
            no_anonymous_uploads: false,
            anonymous_contributions: false,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            min_offset: Duration::from_secs(2 * 60 * 60),
            random_delay: Duration::from_secs(60 * 60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let metadata = match std::env::var("METADATA_BACKEND")
            .unwrap_or_else(|_| "redb".to_string())
            .to_lowercase()
            .as_str()
        {
            "redb" => MetadataEngine::Redb,
            "memory" => MetadataEngine::Memory,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown METADATA_BACKEND {other}, expected redb or memory"
                )))
            }
        };

        let file_storage_path =
            std::env::var("FILE_STORAGE_PATH").unwrap_or_else(|_| "./files".to_string());

        let defaults = UploadPolicy::default();
        let uploads = UploadPolicy {
            default_ttl: env_parse("DEFAULT_TTL", defaults.default_ttl),
            max_ttl: env_parse("MAX_TTL", defaults.max_ttl),
            max_file_size: env_parse("MAX_FILE_SIZE", defaults.max_file_size),
            max_files_per_upload: env_parse("MAX_FILES_PER_UPLOAD", defaults.max_files_per_upload),
            one_shot: env_flag("ENABLE_ONE_SHOT", defaults.one_shot),
            removable: env_flag("ENABLE_REMOVABLE", defaults.removable),
            stream: env_flag("ENABLE_STREAM", defaults.stream),
            password: env_flag("ENABLE_PASSWORD", defaults.password),
            no_anonymous_uploads: env_flag("NO_ANONYMOUS_UPLOADS", defaults.no_anonymous_uploads),
            anonymous_contributions: env_flag(
                "ANONYMOUS_CONTRIBUTIONS",
                defaults.anonymous_contributions,
            ),
        };

        let sweeper = SweeperConfig {
            min_offset: Duration::from_secs(env_parse("SWEEP_MIN_OFFSET_SECS", 7200)),
            random_delay: Duration::from_secs(env_parse("SWEEP_RANDOM_DELAY_SECS", 3600)),
        };

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                metadata,
                file_storage_path,
            },
            uploads,
            sweeper,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.uploads;

        if policy.max_ttl > 0 && policy.default_ttl == 0 {
            return Err(ConfigError::ValidationError(
                "DEFAULT_TTL can't be infinite when MAX_TTL is bounded".to_string(),
            ));
        }

        if policy.max_ttl > 0 && policy.default_ttl > policy.max_ttl {
            return Err(ConfigError::ValidationError(format!(
                "DEFAULT_TTL ({}) is greater than MAX_TTL ({})",
                policy.default_ttl, policy.max_ttl
            )));
        }

        if policy.max_file_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_FILE_SIZE must be greater than zero".to_string(),
            ));
        }

        if policy.max_files_per_upload == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_FILES_PER_UPLOAD must be greater than zero".to_string(),
            ));
        }

        if self.sweeper.min_offset.is_zero() && self.sweeper.random_delay.is_zero() {
            tracing::warn!("Sweeper runs back to back, consider setting SWEEP_MIN_OFFSET_SECS");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(uploads: UploadPolicy) -> Config {
        Config {
            node: NodeConfig {
                bind_address: "127.0.0.1:0".to_string(),
                data_dir: "./data".to_string(),
            },
            storage: StorageConfig::default(),
            uploads,
            sweeper: SweeperConfig::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config_with(UploadPolicy::default()).validate().is_ok());
    }

    #[test]
    fn default_ttl_must_fit_max_ttl() {
        let policy = UploadPolicy {
            default_ttl: 100,
            max_ttl: 10,
            ..Default::default()
        };
        assert!(config_with(policy).validate().is_err());

        let infinite_default = UploadPolicy {
            default_ttl: 0,
            max_ttl: 10,
            ..Default::default()
        };
        assert!(config_with(infinite_default).validate().is_err());

        let unbounded = UploadPolicy {
            default_ttl: 0,
            max_ttl: 0,
            ..Default::default()
        };
        assert!(config_with(unbounded).validate().is_ok());
    }

    #[test]
    fn limits_must_be_positive() {
        let policy = UploadPolicy {
            max_files_per_upload: 0,
            ..Default::default()
        };
        assert!(config_with(policy).validate().is_err());
    }
}
