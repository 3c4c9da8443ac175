//! Fetchers that pull raw documents from upstream government sources.

pub mod court_listener;
pub mod federal_register;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub use court_listener::CourtListenerFetcher;
pub use federal_register::FederalRegisterFetcher;

use crate::citations::CitationRecord;

/// Kind of document a fetcher produces; one vector-store collection each.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentKind {
    CourtOpinion,
    ExecutiveOrder,
}

impl DocumentKind {
    pub fn collection_name(self) -> &'static str {
        match self {
            DocumentKind::CourtOpinion => "court_opinions",
            DocumentKind::ExecutiveOrder => "executive_orders",
        }
    }

    pub fn resource_scheme(self) -> &'static str {
        match self {
            DocumentKind::CourtOpinion => "opinion",
            DocumentKind::ExecutiveOrder => "order",
        }
    }
}

/// Source-specific document metadata, typed per document kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceMetadata {
    Opinion {
        case_name: String,
        citation: String,
        cluster_id: Option<String>,
        authoring_justice: Option<String>,
        per_curiam: bool,
        joined_by: Option<String>,
        docket_number: Option<String>,
    },
    Order {
        order_number: String,
        president: String,
        signing_date: String,
        citation: String,
        agencies: Vec<String>,
        raw_text_url: Option<String>,
    },
}

/// A fetched document, immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Publication date, ISO-8601.
    pub date: String,
    pub kind: DocumentKind,
    pub source: String,
    pub url: String,
    pub text: String,
    pub metadata: SourceMetadata,
}

/// A document surfaced during discovery, before it is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDocument {
    pub id: String,
    /// Publication date, ISO-8601; discovery output is sorted on it.
    pub date: String,
}

#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("invalid base URL `{0}`")]
    InvalidBaseUrl(String),
    #[error("failed to join `{path}` onto base URL: {source}")]
    UrlJoin {
        path: String,
        #[source]
        source: Arc<url::ParseError>,
    },
    #[error("request error during `{stage}`: {source}")]
    Request {
        stage: &'static str,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("upstream returned HTTP {status} during `{stage}`")]
    HttpStatus { stage: &'static str, status: u16 },
    #[error("failed to read body during `{stage}`: {source}")]
    Body {
        stage: &'static str,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("failed to parse response during `{stage}`: {message}")]
    Parse {
        stage: &'static str,
        message: String,
    },
    #[error("document `{0}` not found upstream")]
    NotFound(String),
}

impl FetchError {
    pub fn request(stage: &'static str, err: reqwest::Error) -> Self {
        FetchError::Request {
            stage,
            source: Arc::new(err),
        }
    }

    pub fn body(stage: &'static str, err: reqwest::Error) -> Self {
        FetchError::Body {
            stage,
            source: Arc::new(err),
        }
    }

    pub fn parse(stage: &'static str, message: impl Into<String>) -> Self {
        FetchError::Parse {
            stage,
            message: message.into(),
        }
    }

    pub fn status(stage: &'static str, status: reqwest::StatusCode) -> Self {
        FetchError::HttpStatus {
            stage,
            status: status.as_u16(),
        }
    }

    /// Timeouts, connection errors, 429 and 5xx are worth retrying; other
    /// 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            FetchError::Body { .. } => true,
            FetchError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Capability set every upstream source implements.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    fn kind(&self) -> DocumentKind;

    /// Minimum spacing between requests to this source.
    fn rate_limit(&self) -> Duration;

    /// Discover document ids in the date range, ascending by publication
    /// date. Pagination is handled internally.
    async fn list_ids(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DiscoveredDocument>, FetchError>;

    /// Fetch one document with text and source metadata.
    async fn fetch(&self, id: &str) -> Result<Document, FetchError>;
}

/// Raw cluster fields the opinion fetcher joins against.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterData {
    #[serde(default)]
    pub case_name: String,
    #[serde(default)]
    pub date_filed: String,
    #[serde(default)]
    pub citations: Vec<CitationRecord>,
    #[serde(default)]
    pub docket: Option<String>,
    #[serde(default)]
    pub sub_opinions: Vec<String>,
}
