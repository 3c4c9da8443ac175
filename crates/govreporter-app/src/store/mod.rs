//! Vector-store payload model, filter expressions, and the adapter trait.

pub mod qdrant;

use async_trait::async_trait;
use chrono::NaiveDate;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use qdrant::QdrantStore;

use crate::chunking::{OpinionType, OrderChunkKind};
use crate::enrich::{OpinionEnrichment, OrderEnrichment};

/// Deterministic chunk id: `hex(md5(document_id ++ "_chunk_" ++ index))`.
/// Re-ingesting a document therefore produces identical ids and upserts
/// stay idempotent.
pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
    let mut hasher = Md5::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"_chunk_");
    hasher.update(chunk_index.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Stable point id for the vector store, derived from the chunk id.
pub fn point_uuid(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, chunk_id.as_bytes())
}

/// Numeric form of an ISO-8601 date (`YYYYMMDD`) used for range filters.
pub fn date_int(date: &str) -> i64 {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => {
            use chrono::Datelike;
            i64::from(parsed.year()) * 10_000 + i64::from(parsed.month()) * 100 + i64::from(parsed.day())
        }
        Err(_) => 0,
    }
}

/// Opinion-specific payload fields; enrichment fields are flattened so
/// filters address them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpinionDetail {
    pub case_name: String,
    pub citation: String,
    pub opinion_type: Option<OpinionType>,
    pub authoring_justice: Option<String>,
    pub section_label: Option<String>,
    #[serde(flatten)]
    pub enrichment: OpinionEnrichment,
}

/// Order-specific payload fields; enrichment fields are flattened so
/// filters address them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order_number: String,
    pub president: String,
    pub signing_date: String,
    pub signing_date_int: i64,
    pub chunk_type: OrderChunkKind,
    pub section_title: Option<String>,
    pub subsection_label: Option<String>,
    #[serde(flatten)]
    pub enrichment: OrderEnrichment,
}

/// Type-specific slice of a stored payload, discriminated by
/// `document_type` in the serialized map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "document_type", rename_all = "snake_case")]
pub enum PayloadDetail {
    CourtOpinion(OpinionDetail),
    ExecutiveOrder(OrderDetail),
}

/// Everything persisted alongside a vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub token_count: usize,
    pub text: String,
    pub title: String,
    pub publication_date: String,
    pub publication_date_int: i64,
    pub source: String,
    pub url: String,
    #[serde(flatten)]
    pub detail: PayloadDetail,
}

/// A payload paired with its precomputed vector, ready for upsert.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub payload: ChunkPayload,
    pub vector: Vec<f32>,
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub count: u64,
    pub dimension: u64,
    pub metric: String,
}

#[derive(Debug, Default)]
pub struct UpsertOutcome {
    pub written: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// One conjunct of a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    Eq {
        field: String,
        value: String,
    },
    AnyOf {
        field: String,
        values: Vec<String>,
    },
    /// Inclusive range over an ISO-8601 date field; the adapter translates
    /// it onto the payload's companion `<field>_int` value.
    DateRange {
        field: String,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

/// Conjunction of predicates over payload fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpr {
    pub predicates: Vec<FilterPredicate>,
}

impl FilterExpr {
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push(FilterPredicate::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        if !values.is_empty() {
            self.predicates.push(FilterPredicate::AnyOf {
                field: field.into(),
                values,
            });
        }
        self
    }

    pub fn date_range(
        mut self,
        field: impl Into<String>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Self {
        if from.is_some() || to.is_some() {
            self.predicates.push(FilterPredicate::DateRange {
                field: field.into(),
                from,
                to,
            });
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store error: {0}")]
    Backend(String),
    #[error(
        "collection `{collection}` has dimension {actual}, expected {expected}; refusing to reuse it"
    )]
    DimensionMismatch {
        collection: String,
        expected: u64,
        actual: u64,
    },
    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Progress callback for long batch upserts: `(done, total)`.
pub type UpsertProgress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Adapter over the vector database. All operations are safe to call from
/// multiple workers concurrently.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent (cosine distance); verify the
    /// dimension if present. A mismatch is fatal.
    async fn ensure_collection(&self, name: &str, dimension: u64) -> Result<(), StoreError>;

    async fn exists(&self, collection: &str, chunk_id: &str) -> Result<bool, StoreError>;

    /// Upsert payloads with precomputed vectors. Atomic per payload, not
    /// across the batch; already-present ids are counted as skipped.
    async fn batch_upsert(
        &self,
        collection: &str,
        chunks: Vec<EmbeddedChunk>,
        progress: Option<UpsertProgress<'_>>,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn semantic_search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<FilterExpr>,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn get_by_id(
        &self,
        collection: &str,
        chunk_id: &str,
    ) -> Result<Option<ChunkPayload>, StoreError>;

    /// A few stored payloads for inspection, in no particular order.
    async fn sample(&self, collection: &str, limit: usize)
        -> Result<Vec<ChunkPayload>, StoreError>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;
}
