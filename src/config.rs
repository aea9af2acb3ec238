//! TOML configuration.
//!
//! Every section except `[paths]` is optional and falls back to defaults,
//! so a minimal config only names the data directory. Derived locations
//! (uploads, outputs, knowledge files, vector index, database) all live
//! under `paths.data_dir` unless overridden.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use casegen_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use casegen_core::embedding::DEFAULT_HASH_DIMS;
use casegen_core::index::DEFAULT_SATURATION;
use casegen_core::table::RowDefaults;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DbConfig {
    /// Defaults to `<data_dir>/casegen.sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_rows_per_chunk")]
    pub rows_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            rows_per_chunk: default_rows_per_chunk(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_rows_per_chunk() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Upper bound on candidates fetched before the similarity floor applies.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_saturation")]
    pub similarity_saturation: f32,
    #[serde(default = "default_grounding_k")]
    pub grounding_k: usize,
    #[serde(default = "default_grounding_max_chars")]
    pub grounding_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_candidates: default_max_candidates(),
            min_similarity: default_min_similarity(),
            similarity_saturation: default_saturation(),
            grounding_k: default_grounding_k(),
            grounding_max_chars: default_grounding_max_chars(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_max_candidates() -> usize {
    50
}
fn default_min_similarity() -> f64 {
    65.0
}
fn default_saturation() -> f32 {
    DEFAULT_SATURATION
}
fn default_grounding_k() -> usize {
    3
}
fn default_grounding_max_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }

    /// Dimensionality the configured provider will produce.
    pub fn effective_dims(&self) -> usize {
        self.dims.unwrap_or(DEFAULT_HASH_DIMS)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (`…/v1`).
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key; unset means no auth header.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Run the cross-checking review call after each stage.
    #[serde(default = "default_true")]
    pub validate: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            validate: true,
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_llm_model() -> String {
    "deepseek-coder-v2".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    16384
}
fn default_llm_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_ttl_hours() -> i64 {
    24
}
fn default_sweep_interval() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_priority")]
    pub default_priority: String,
    #[serde(default = "default_status")]
    pub default_status: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            default_status: default_status(),
        }
    }
}

fn default_priority() -> String {
    RowDefaults::default().priority
}
fn default_status() -> String {
    RowDefaults::default().status
}

impl ExportConfig {
    pub fn row_defaults(&self) -> RowDefaults {
        RowDefaults {
            priority: self.default_priority.clone(),
            status: self.default_status.clone(),
        }
    }
}

impl Config {
    /// All-default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                data_dir: data_dir.into(),
            },
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            export: ExportConfig::default(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db
            .path
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("casegen.sqlite"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.paths.data_dir.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.paths.data_dir.join("outputs")
    }

    pub fn knowledge_files_dir(&self) -> PathBuf {
        self.paths.data_dir.join("knowledge_base").join("files")
    }

    pub fn vector_index_dir(&self) -> PathBuf {
        self.paths.data_dir.join("knowledge_base").join("vector_index")
    }

    /// Create every derived directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.uploads_dir(),
            self.outputs_dir(),
            self.knowledge_files_dir(),
            self.vector_index_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.chunking.rows_per_chunk == 0 {
            bail!("chunking.rows_per_chunk must be >= 1");
        }

        if self.retrieval.default_k < 1 {
            bail!("retrieval.default_k must be >= 1");
        }
        if !(0.0..=100.0).contains(&self.retrieval.min_similarity) {
            bail!("retrieval.min_similarity must be in [0, 100]");
        }
        if self.retrieval.similarity_saturation <= 0.0 {
            bail!("retrieval.similarity_saturation must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hash" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, local, or disabled.",
                other
            ),
        }
        if self.embedding.is_remote() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be > 0");
        }
        if self.session.ttl_hours <= 0 {
            bail!("session.ttl_hours must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[paths]\ndata_dir = \"/tmp/casegen\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.session.ttl_hours, 24);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/casegen/casegen.sqlite"));
        assert_eq!(
            config.vector_index_dir(),
            PathBuf::from("/tmp/casegen/knowledge_base/vector_index")
        );
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse("[paths]\ndata_dir = \"d\"\n[chunking]\nchunk_size = 50\nchunk_overlap = 50\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let err = parse("[paths]\ndata_dir = \"d\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[paths]\ndata_dir = \"d\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_min_similarity_range() {
        assert!(parse("[paths]\ndata_dir = \"d\"\n[retrieval]\nmin_similarity = 120.0\n").is_err());
    }

    #[test]
    fn test_with_data_dir_is_valid() {
        assert!(Config::with_data_dir("/tmp/x").validate().is_ok());
    }
}
