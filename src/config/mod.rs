// Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default location of the config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// Environment variable overriding `crypto.key`
pub const ENCRYPT_KEY_ENV: &str = "ENCRYPT_KEY";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Whether logs are also written to files
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Days before old log files are removed (default 7)
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// Filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Size in bytes at which a new log file is started (default 50MB)
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage root: downloads land here and it is served as static files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./static")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Transfer engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Bytes read from the source per loop iteration
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest wait for a single chunk, 0 disables the deadline
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Continue from an existing partial file on a fresh start
    #[serde(default = "default_resume_existing_files")]
    pub resume_existing_files: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    120
}

fn default_resume_existing_files() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("mirror-server/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            resume_existing_files: default_resume_existing_files(),
            user_agent: default_user_agent(),
        }
    }
}

/// External extraction tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_binary")]
    pub binary: String,
    /// Where metadata files handed to the tool are written
    #[serde(default = "default_extractor_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_extractor_binary() -> String {
    "yt-dlp".to_string()
}

fn default_extractor_temp_dir() -> PathBuf {
    std::env::temp_dir().join("mirror-server")
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: default_extractor_binary(),
            temp_dir: default_extractor_temp_dir(),
        }
    }
}

/// Passphrase for the encrypt/decrypt endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoConfig {
    #[serde(default)]
    pub key: Option<String>,
}

impl CryptoConfig {
    /// Effective passphrase: `ENCRYPT_KEY` wins over the file value
    pub fn effective_key(&self) -> Option<String> {
        Self::pick_key(std::env::var(ENCRYPT_KEY_ENV).ok(), self.key.clone())
    }

    fn pick_key(env: Option<String>, file: Option<String>) -> Option<String> {
        env.filter(|k| !k.is_empty())
            .or(file)
            .filter(|k| !k.is_empty())
    }
}

/// Host stats sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Interval between the two network counter samples
    #[serde(default = "default_network_sample_ms")]
    pub network_sample_ms: u64,
}

fn default_network_sample_ms() -> u64 {
    1000
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            network_sample_ms: default_network_sample_ms(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from a TOML file
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save the configuration as TOML, creating parent directories
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("config saved: {:?}", path);
        Ok(())
    }

    /// Load the configuration, falling back to (and writing) defaults
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("config loaded: {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("config not loaded, using defaults: {:#}", e);
                let default_config = Self::default();

                if path.exists() {
                    // keep a broken file for the operator to fix
                    return default_config;
                }
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("failed to write default config: {:#}", e);
                }
                default_config
            }
        }
    }

    /// Address the listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.root, PathBuf::from("./static"));
        assert_eq!(config.download.chunk_size, 64 * 1024);
        assert!(config.download.resume_existing_files);
        assert_eq!(config.extractor.binary, "yt-dlp");
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/app.toml");

        let mut config = AppConfig::default();
        config.server.port = 9090;
        config.download.read_timeout_secs = 0;
        config.save_to_file(&path).await.unwrap();

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.server.port, 9090);
        assert_eq!(loaded.download.read_timeout_secs, 0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 1234

            [download]
            chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.download.chunk_size, 4096);
        assert_eq!(config.download.connect_timeout_secs, 30);
        assert_eq!(config.log.retention_days, 7);
        assert!(config.crypto.key.is_none());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");

        let config = AppConfig::load_or_default(&path).await;
        assert_eq!(config.server.port, 8080);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_load_or_default_keeps_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "server = [").unwrap();

        let config = AppConfig::load_or_default(&path).await;
        assert_eq!(config.server.port, 8080);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "server = [");
    }

    #[test]
    fn test_key_precedence() {
        assert_eq!(
            CryptoConfig::pick_key(Some("env".into()), Some("file".into())).as_deref(),
            Some("env")
        );
        assert_eq!(
            CryptoConfig::pick_key(None, Some("file".into())).as_deref(),
            Some("file")
        );
        assert_eq!(CryptoConfig::pick_key(Some(String::new()), None), None);
        assert_eq!(CryptoConfig::pick_key(None, Some(String::new())), None);
    }
}
