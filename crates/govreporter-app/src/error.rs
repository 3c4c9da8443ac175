//! Application-level error type shared across subcommands, with the exit
//! codes the CLI contract promises.

use thiserror::Error;

use crate::chunking::ChunkingConfigError;
use crate::config::ConfigError;
use crate::embed::EmbedError;
use crate::enrich::EnrichError;
use crate::fetchers::FetchError;
use crate::pipeline::PipelineError;
use crate::progress::ProgressError;
use crate::server::ServerError;
use crate::store::StoreError;

pub const EXIT_OK: i32 = 0;
pub const EXIT_USER_ERROR: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;
pub const EXIT_RUNTIME_FAILURE: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Chunking(#[from] ChunkingConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Enrich(#[from] EnrichError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Prompt(#[from] inquire::InquireError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn usage(message: impl Into<String>) -> Self {
        AppError::Usage(message.into())
    }

    /// Exit code per the CLI contract: 1 user error, 2 configuration
    /// error, 3 runtime failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Usage(_) => EXIT_USER_ERROR,
            AppError::Config(_) | AppError::Chunking(_) => EXIT_CONFIG_ERROR,
            // Credential-class embed/enrich errors are configuration too.
            AppError::Embed(EmbedError::MissingApiKey) => EXIT_CONFIG_ERROR,
            AppError::Enrich(EnrichError::MissingApiKey) => EXIT_CONFIG_ERROR,
            AppError::Store(StoreError::DimensionMismatch { .. }) => EXIT_CONFIG_ERROR,
            _ => EXIT_RUNTIME_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(AppError::usage("bad flag").exit_code(), EXIT_USER_ERROR);
        assert_eq!(
            AppError::Config(ConfigError::MissingCredential("OPENAI_API_KEY")).exit_code(),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            AppError::Embed(EmbedError::MissingApiKey).exit_code(),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            AppError::Store(StoreError::DimensionMismatch {
                collection: "court_opinions".to_string(),
                expected: 1536,
                actual: 768,
            })
            .exit_code(),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            AppError::Store(StoreError::Backend("down".to_string())).exit_code(),
            EXIT_RUNTIME_FAILURE
        );
    }
}
