//! Environment-driven configuration.
//!
//! Credentials are optional at load time and demanded per operation, so
//! commands that never talk to an API (`info`, `delete`) run without them.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::chunking::{ChunkingConfig, ChunkingConfigError};

pub const OPINION_ENV_PREFIX: &str = "RAG_OPINION";
pub const ORDER_ENV_PREFIX: &str = "RAG_ORDER";

const DEFAULT_QDRANT_HOST: &str = "localhost";
const DEFAULT_QDRANT_PORT: u16 = 6334;
const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 50;
const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;
const DEFAULT_HINT_SCORE_THRESHOLD: f32 = 0.4;
const DEFAULT_HINT_MAX_HITS: usize = 3;
const DEFAULT_STALE_CLAIM_SECS: u64 = 600;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set the {0} environment variable")]
    MissingCredential(&'static str),
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
    #[error(transparent)]
    Chunking(#[from] ChunkingConfigError),
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    /// Full endpoint override; wins over host/port when set.
    pub url_override: Option<String>,
}

impl QdrantConfig {
    pub fn url(&self) -> String {
        match &self.url_override {
            Some(url) => url.clone(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Tuning for the MCP server and its result shaping.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub default_search_limit: usize,
    pub max_search_limit: usize,
    pub max_chunk_chars: usize,
    pub hint_score_threshold: f32,
    pub hint_max_hits: usize,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub log_level: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_search_limit: DEFAULT_SEARCH_LIMIT,
            max_search_limit: MAX_SEARCH_LIMIT,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            hint_score_threshold: DEFAULT_HINT_SCORE_THRESHOLD,
            hint_max_hits: DEFAULT_HINT_MAX_HITS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            log_level: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub court_listener_token: Option<String>,
    pub qdrant: QdrantConfig,
    pub server: ServerConfig,
    pub opinion_chunking: ChunkingConfig,
    pub order_chunking: ChunkingConfig,
    pub stale_claim: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let opinion_chunking =
            ChunkingConfig::opinion_defaults().with_env_overrides(OPINION_ENV_PREFIX)?;
        let order_chunking =
            ChunkingConfig::order_defaults().with_env_overrides(ORDER_ENV_PREFIX)?;

        let qdrant = QdrantConfig {
            host: non_empty_var("QDRANT_HOST").unwrap_or_else(|| DEFAULT_QDRANT_HOST.to_string()),
            port: parsed_var("QDRANT_PORT", DEFAULT_QDRANT_PORT)?,
            api_key: non_empty_var("QDRANT_API_KEY"),
            url_override: non_empty_var("QDRANT_DB_PATH"),
        };

        let server = ServerConfig {
            default_search_limit: parsed_var("MCP_DEFAULT_SEARCH_LIMIT", DEFAULT_SEARCH_LIMIT)?,
            max_search_limit: parsed_var("MCP_MAX_SEARCH_LIMIT", MAX_SEARCH_LIMIT)?,
            max_chunk_chars: parsed_var("MCP_MAX_CHUNK_CHARS", DEFAULT_MAX_CHUNK_CHARS)?,
            hint_score_threshold: parsed_var(
                "MCP_HINT_SCORE_THRESHOLD",
                DEFAULT_HINT_SCORE_THRESHOLD,
            )?,
            hint_max_hits: parsed_var("MCP_HINT_MAX_HITS", DEFAULT_HINT_MAX_HITS)?,
            request_timeout: Duration::from_secs(parsed_var(
                "MCP_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            shutdown_grace: Duration::from_secs(parsed_var(
                "MCP_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
            log_level: non_empty_var("MCP_LOG_LEVEL"),
        };

        Ok(Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            court_listener_token: non_empty_var("COURT_LISTENER_API_TOKEN"),
            qdrant,
            server,
            opinion_chunking,
            order_chunking,
            stale_claim: Duration::from_secs(parsed_var(
                "INGEST_STALE_CLAIM_SECS",
                DEFAULT_STALE_CLAIM_SECS,
            )?),
        })
    }

    pub fn require_openai_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("OPENAI_API_KEY"))
    }

    pub fn require_court_listener_token(&self) -> Result<&str, ConfigError> {
        self.court_listener_token
            .as_deref()
            .ok_or(ConfigError::MissingCredential("COURT_LISTENER_API_TOKEN"))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
