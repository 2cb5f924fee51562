
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::documents::chunking::ChunkingConfig;

/// Environment variable holding the hosted model API key.
pub const API_KEY_ENV: &str = "BOTSMITH_API_KEY";

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub batch_size: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Hard ceiling for a single uploaded file, in bytes.
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid API base URL: {0} (must start with http:// or https://)")]
    InvalidApiBase(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid upload ceiling: {0} bytes (must be between 1KB and 100MB)")]
    InvalidUploadCeiling(u64),
    #[error("Invalid target chunk size: {0} (must be between 100 and 2048)")]
    InvalidTargetChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 200 and 4096)")]
    InvalidMaxChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 50 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Max chunk size ({0}) must be greater than target chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Target chunk size ({0}) must be greater than min chunk size ({1})")]
    TargetChunkSizeTooSmall(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let config_path = base_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                model: ModelConfig::default(),
                server: ServerConfig::default(),
                chunking: ChunkingConfig::default(),
                base_dir: base_dir.as_ref().to_path_buf(),
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = base_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default per-user data directory.
    #[inline]
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_base_dir()?)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create data directory: {}", self.base_dir.display())
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        dirs::data_dir()
            .map(|d| d.join("botsmith"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.model.api_base;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ConfigError::InvalidApiBase(base.clone()));
        }
        if self.model.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.chat_model.clone()));
        }
        if self.model.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.embedding_model.clone()));
        }
        if self.model.batch_size == 0 || self.model.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.model.batch_size));
        }
        if self.model.embedding_dimension < 64 || self.model.embedding_dimension > 4096 {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.model.embedding_dimension,
            ));
        }
        if self.server.max_upload_bytes < 1024
            || self.server.max_upload_bytes > 100 * 1024 * 1024
        {
            return Err(ConfigError::InvalidUploadCeiling(self.server.max_upload_bytes));
        }

        let chunking = &self.chunking;
        if chunking.target_chunk_size < 100 || chunking.target_chunk_size > 2048 {
            return Err(ConfigError::InvalidTargetChunkSize(chunking.target_chunk_size));
        }
        if chunking.max_chunk_size < 200 || chunking.max_chunk_size > 4096 {
            return Err(ConfigError::InvalidMaxChunkSize(chunking.max_chunk_size));
        }
        if chunking.min_chunk_size < 50 || chunking.min_chunk_size > 1024 {
            return Err(ConfigError::InvalidMinChunkSize(chunking.min_chunk_size));
        }
        if chunking.max_chunk_size <= chunking.target_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                chunking.max_chunk_size,
                chunking.target_chunk_size,
            ));
        }
        if chunking.target_chunk_size <= chunking.min_chunk_size {
            return Err(ConfigError::TargetChunkSizeTooSmall(
                chunking.target_chunk_size,
                chunking.min_chunk_size,
            ));
        }

        Ok(())
    }

    /// API key for the hosted model, if configured in the environment.
    #[inline]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }

    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("botsmith.db")
    }

    /// Directory holding raw uploaded documents for one bot.
    #[inline]
    pub fn bot_files_dir(&self, bot_id: &str) -> PathBuf {
        self.base_dir.join("files").join(bot_id)
    }

    /// Directory holding one bot's persisted index cache.
    #[inline]
    pub fn bot_index_dir(&self, bot_id: &str) -> PathBuf {
        self.base_dir.join("indexes").join(bot_id)
    }
}
