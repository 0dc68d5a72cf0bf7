//! Configuration: `RepolensConfig` layers a TOML file under an environment
//! override (`REPOLENS_*` prefix, via the `config` crate), holding exactly
//! the recognized options of the tool protocol's configuration environment
//! plus the nested shape the facade/pipeline/chunker/search layers consume.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::chunking::ChunkingConfig;
use crate::error::RepolensError;
use crate::error::Result;
use crate::storage::BackendKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    A,
    B,
    #[default]
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    #[default]
    Auto,
    Ast,
    Regex,
}

/// Top-level configuration. `db_type`/`db_dsn`/`db_path` select and locate
/// the storage backend; the rest configure the indexing and search layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepolensConfig {
    pub db_type: BackendKind,
    pub db_dsn: Option<String>,
    pub db_path: PathBuf,
    pub vector_dimensions: usize,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub index_backend: IndexBackend,
    pub indexing: IndexingConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for RepolensConfig {
    fn default() -> Self {
        Self {
            db_type: BackendKind::Embedded,
            db_dsn: None,
            db_path: default_db_path(),
            vector_dimensions: 768,
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
            index_backend: IndexBackend::default(),
            indexing: IndexingConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".repolens/index.db")
}

impl RepolensConfig {
    /// Layers `REPOLENS_*` environment variables over an optional TOML file
    /// at `path` (if present), falling back to [`Default`] for anything
    /// neither sets.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())
            .map_err(|e| RepolensError::ConfigParseError { cause: e.to_string() })?);
        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }
        builder = builder.add_source(config::Environment::with_prefix("REPOLENS").separator("__"));
        let built = builder
            .build()
            .map_err(|e| RepolensError::ConfigParseError { cause: e.to_string() })?;
        let config: Self = built
            .try_deserialize()
            .map_err(|e| RepolensError::ConfigParseError { cause: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vector_dimensions == 0 {
            return Err(RepolensError::ConfigError {
                field: "vector_dimensions".into(),
                cause: "must be positive".into(),
            });
        }
        if self.db_type == BackendKind::Server && self.db_dsn.is_none() {
            return Err(RepolensError::ConfigError {
                field: "db_dsn".into(),
                cause: "required when db_type = server".into(),
            });
        }
        self.indexing.validate()?;
        self.chunking.validate()?;
        self.search.validate()?;
        self.embedding.validate()?;
        Ok(())
    }
}

/// Batch size, lock timeout, and the per-file size ceiling above which the
/// indexer skips chunking a file rather than risk pathological memory use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub lock_timeout_secs: u64,
    pub max_file_size_bytes: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_workers: 4,
            lock_timeout_secs: 600,
            max_file_size_bytes: 2 * 1024 * 1024,
        }
    }
}

impl IndexingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RepolensError::ConfigError {
                field: "indexing.batch_size".into(),
                cause: "must be positive".into(),
            });
        }
        if self.max_workers == 0 {
            return Err(RepolensError::ConfigError {
                field: "indexing.max_workers".into(),
                cause: "must be positive".into(),
            });
        }
        if self.lock_timeout_secs == 0 {
            return Err(RepolensError::ConfigError {
                field: "indexing.lock_timeout_secs".into(),
                cause: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Oversampling factor for the semantic searcher and the rerank toggle for
/// rank fusion's optional cross-encoder pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub oversample_factor: usize,
    pub rerank_enabled: bool,
    pub rerank_top: usize,
    pub recent_files_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            oversample_factor: 2,
            rerank_enabled: false,
            rerank_top: 20,
            recent_files_weight: 0.0,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.oversample_factor) {
            return Err(RepolensError::ConfigError {
                field: "search.oversample_factor".into(),
                cause: "must be between 1 and 3".into(),
            });
        }
        if self.recent_files_weight < 0.0 {
            return Err(RepolensError::ConfigError {
                field: "search.recent_files_weight".into(),
                cause: "must not be negative".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: "text-embedding-3-small".into(),
            endpoint: "http://localhost:8080/v1".into(),
            api_key: None,
            dimensions: 768,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.provider != EmbeddingProvider::Off && self.dimensions == 0 {
            return Err(RepolensError::ConfigError {
                field: "embedding.dimensions".into(),
                cause: "must be positive when a provider is enabled".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        RepolensConfig::default().validate().unwrap();
    }

    #[test]
    fn server_backend_requires_dsn() {
        let mut config = RepolensConfig::default();
        config.db_type = BackendKind::Server;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversample_out_of_range_is_rejected() {
        let mut config = RepolensConfig::default();
        config.search.oversample_factor = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_takes_precedence_over_default() {
        std::env::set_var("REPOLENS_VECTOR_DIMENSIONS", "1024");
        let config = RepolensConfig::load(None).unwrap();
        std::env::remove_var("REPOLENS_VECTOR_DIMENSIONS");
        assert_eq!(config.vector_dimensions, 1024);
    }
}
