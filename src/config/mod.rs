//! Configuration management
//!
//! Loads the TOML configuration, applies `MEDRECALL_<SECTION>__<KEY>`
//! environment overrides and validates the result before any engine is
//! built from it.

use crate::error::{RecallError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

const ENV_PREFIX: &str = "MEDRECALL_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta", default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where the SQLite metadata store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: Config::default_data_dir().unwrap_or_else(|_| PathBuf::from(".medrecall")),
            database_file: "metadata.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

/// Embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    /// Embedding batches allowed in flight at once
    pub max_concurrent: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
            max_concurrent: 4,
        }
    }
}

/// HNSW vector index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    /// Connections per node
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Capacity hint for the graph
    pub max_elements: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            vector_dim: 384,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Hybrid search engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Each channel fetches `k * candidate_multiplier` results before fusion
    pub candidate_multiplier: usize,
    pub default_snippet_length: usize,
    pub half_life_days: f64,
    /// Reject filtered searches that carry no patient id
    pub require_patient_id: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 3,
            default_snippet_length: 150,
            half_life_days: 180.0,
            require_patient_id: true,
        }
    }
}

/// Relative weight of each signal in the multi-signal scorer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub recency: f64,
    pub type_preference: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            keyword: 0.3,
            recency: 0.2,
            type_preference: 0.1,
        }
    }
}

impl SignalWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.keyword + self.recency + self.type_preference
    }

    pub(crate) fn values(&self) -> [(&'static str, f64); 4] {
        [
            ("semantic", self.semantic),
            ("keyword", self.keyword),
            ("recency", self.recency),
            ("type_preference", self.type_preference),
        ]
    }
}

/// Override of the built-in type-preference row for one query intent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypePreferenceOverride {
    /// Score for artifact types not listed in `types`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(default)]
    pub types: HashMap<String, f64>,
}

/// Multi-signal scorer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Fixed average length used by the scorer's keyword signal
    pub assumed_avg_doc_length: f64,
    /// Rate of the `exp(-rate * age_days)` recency curve
    pub recency_decay_rate: f64,
    pub diversity_weight: f64,
    pub weights: SignalWeights,
    /// Keyed by intent name (`medication`, `lab_result`, ...)
    pub type_preferences: HashMap<String, TypePreferenceOverride>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            assumed_avg_doc_length: 100.0,
            recency_decay_rate: 0.01,
            diversity_weight: 0.3,
            weights: SignalWeights::default(),
            type_preferences: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `medrecall=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RecallError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RecallError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Parse without environment overrides or validation
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from the default path, falling back to defaults when no file exists
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            return Self::load(&path);
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecallError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RecallError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides.
    /// Variables use the format `MEDRECALL_SECTION__KEY=value`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `(name, value)` pairs as if they were environment variables
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__DATABASE_FILE" => self.storage.database_file = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_env(path, value)?,
            "EMBEDDING__MAX_CONCURRENT" => {
                self.embedding.max_concurrent = parse_env(path, value)?
            }
            "INDEXING__HNSW_EF_SEARCH" => self.indexing.hnsw_ef_search = parse_env(path, value)?,
            "SEARCH__CANDIDATE_MULTIPLIER" => {
                self.search.candidate_multiplier = parse_env(path, value)?
            }
            "SEARCH__DEFAULT_SNIPPET_LENGTH" => {
                self.search.default_snippet_length = parse_env(path, value)?
            }
            "SEARCH__HALF_LIFE_DAYS" => self.search.half_life_days = parse_env(path, value)?,
            "SEARCH__REQUIRE_PATIENT_ID" => {
                self.search.require_patient_id = parse_env(path, value)?
            }
            "SCORER__DIVERSITY_WEIGHT" => self.scorer.diversity_weight = parse_env(path, value)?,
            "SCORER__RECENCY_DECAY_RATE" => {
                self.scorer.recency_decay_rate = parse_env(path, value)?
            }
            "LOGGING__LEVEL" => self.logging.level = value.to_string(),
            "LOGGING__FORMAT" => {
                self.logging.format =
                    value
                        .parse()
                        .map_err(|message| RecallError::InvalidConfigValue {
                            path: path.to_string(),
                            message,
                        })?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RecallError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("medrecall").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| RecallError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("medrecall"))
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RecallError::InvalidConfigValue {
        path: path.to_string(),
        message: format!(
            "Cannot parse '{}' as {}",
            value,
            std::any::type_name::<T>()
        ),
    })
}
