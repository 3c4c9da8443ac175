//! Shared fakes for integration tests: an in-memory vector store, a
//! deterministic embedder, and scripted fetchers/enrichers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use govreporter_app::embed::{EmbedError, Embedder, EmbeddingBatch};
use govreporter_app::enrich::{Enricher, EnrichmentRecord};
use govreporter_app::fetchers::{
    DiscoveredDocument, Document, DocumentFetcher, DocumentKind, FetchError,
};
use govreporter_app::store::{
    ChunkPayload, CollectionInfo, EmbeddedChunk, FilterExpr, FilterPredicate, ScoredChunk,
    StoreError, UpsertOutcome, UpsertProgress, VectorStore,
};

pub const FAKE_DIM: usize = 16;

/// Deterministic embedder: a text always maps to the same unit vector.
#[derive(Debug, Default)]
pub struct HashEmbedder {
    pub fail_texts: Mutex<HashSet<String>>,
}

impl HashEmbedder {
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; FAKE_DIM];
        for (i, byte) in text.bytes().enumerate() {
            vector[(i + byte as usize) % FAKE_DIM] += f32::from(byte) / 255.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        FAKE_DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbedError> {
        let failing = self.fail_texts.lock().expect("lock");
        let mut vectors = Vec::with_capacity(texts.len());
        let mut failed = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            if failing.contains(text) {
                vectors.push(vec![0.0; FAKE_DIM]);
                failed.push(index);
            } else {
                vectors.push(Self::embed_text(text));
            }
        }
        Ok(EmbeddingBatch { vectors, failed })
    }
}

/// Enricher returning a fixed record (default: empty per document kind).
#[derive(Debug, Default)]
pub struct FakeEnricher {
    pub record: Option<EnrichmentRecord>,
}

#[async_trait]
impl Enricher for FakeEnricher {
    async fn enrich(&self, document: &Document, _syllabus: Option<&str>) -> EnrichmentRecord {
        self.record
            .clone()
            .unwrap_or_else(|| EnrichmentRecord::empty_for(document.kind))
    }
}

/// Scripted fetcher over a fixed document set.
pub struct FakeFetcher {
    pub kind: DocumentKind,
    pub documents: Mutex<HashMap<String, Document>>,
    pub fail_ids: Mutex<HashSet<String>>,
    pub fetch_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(kind: DocumentKind, documents: Vec<Document>) -> Self {
        Self {
            kind,
            documents: Mutex::new(
                documents
                    .into_iter()
                    .map(|doc| (doc.id.clone(), doc))
                    .collect(),
            ),
            fail_ids: Mutex::new(HashSet::new()),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(&self, id: &str) {
        self.fail_ids.lock().expect("lock").insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.fail_ids.lock().expect("lock").remove(id);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
    fn kind(&self) -> DocumentKind {
        self.kind
    }

    fn rate_limit(&self) -> Duration {
        Duration::from_millis(0)
    }

    async fn list_ids(
        &self,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
    ) -> Result<Vec<DiscoveredDocument>, FetchError> {
        let documents = self.documents.lock().expect("lock");
        let mut discovered: Vec<DiscoveredDocument> = documents
            .values()
            .map(|doc| DiscoveredDocument {
                id: doc.id.clone(),
                date: doc.date.clone(),
            })
            .collect();
        discovered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(discovered)
    }

    async fn fetch(&self, id: &str) -> Result<Document, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_ids.lock().expect("lock").contains(id) {
            return Err(FetchError::HttpStatus {
                stage: "fetch",
                status: 500,
            });
        }
        self.documents
            .lock()
            .expect("lock")
            .get(id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }
}

type CollectionMap = HashMap<String, HashMap<String, (ChunkPayload, Vec<f32>)>>;

/// In-memory vector store with real cosine scoring and filter evaluation.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    pub collections: Mutex<CollectionMap>,
    pub dimensions: Mutex<HashMap<String, u64>>,
}

impl MemoryVectorStore {
    pub fn chunk_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("lock")
            .get(collection)
            .map(|points| points.len())
            .unwrap_or(0)
    }

    pub fn chunk_ids(&self, collection: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .collections
            .lock()
            .expect("lock")
            .get(collection)
            .map(|points| points.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn matches_filter(payload: &ChunkPayload, filter: &FilterExpr) -> bool {
    let value = serde_json::to_value(payload).expect("payload serializes");
    filter.predicates.iter().all(|predicate| match predicate {
        FilterPredicate::Eq { field, value: expected } => value
            .get(field)
            .and_then(|v| v.as_str())
            .is_some_and(|actual| actual == expected),
        FilterPredicate::AnyOf { field, values } => value
            .get(field)
            .and_then(|v| v.as_array())
            .is_some_and(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .any(|item| values.iter().any(|wanted| wanted == item))
            }),
        FilterPredicate::DateRange { field, from, to } => {
            let companion = format!("{field}_int");
            let Some(actual) = value.get(&companion).and_then(|v| v.as_i64()) else {
                return false;
            };
            let after = from
                .map(|d| actual >= govreporter_app::store::date_int(&d.to_string()))
                .unwrap_or(true);
            let before = to
                .map(|d| actual <= govreporter_app::store::date_int(&d.to_string()))
                .unwrap_or(true);
            after && before
        }
    })
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, name: &str, dimension: u64) -> Result<(), StoreError> {
        let mut dimensions = self.dimensions.lock().expect("lock");
        if let Some(existing) = dimensions.get(name) {
            if *existing != dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: dimension,
                    actual: *existing,
                });
            }
            return Ok(());
        }
        dimensions.insert(name.to_string(), dimension);
        self.collections
            .lock()
            .expect("lock")
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn exists(&self, collection: &str, chunk_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .lock()
            .expect("lock")
            .get(collection)
            .is_some_and(|points| points.contains_key(chunk_id)))
    }

    async fn batch_upsert(
        &self,
        collection: &str,
        chunks: Vec<EmbeddedChunk>,
        progress: Option<UpsertProgress<'_>>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();
        let total = chunks.len();
        let mut store = self.collections.lock().expect("lock");
        let points = store.entry(collection.to_string()).or_default();
        for (done, chunk) in chunks.into_iter().enumerate() {
            if points.contains_key(&chunk.payload.chunk_id) {
                outcome.skipped += 1;
            } else {
                points.insert(
                    chunk.payload.chunk_id.clone(),
                    (chunk.payload, chunk.vector),
                );
                outcome.written += 1;
            }
            if let Some(report) = progress {
                report(done + 1, total);
            }
        }
        Ok(outcome)
    }

    async fn semantic_search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<FilterExpr>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let store = self.collections.lock().expect("lock");
        let Some(points) = store.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<ScoredChunk> = points
            .values()
            .filter(|(payload, _)| {
                filter
                    .as_ref()
                    .map(|f| matches_filter(payload, f))
                    .unwrap_or(true)
            })
            .map(|(payload, stored)| ScoredChunk {
                id: payload.chunk_id.clone(),
                score: cosine(&vector, stored),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_by_id(
        &self,
        collection: &str,
        chunk_id: &str,
    ) -> Result<Option<ChunkPayload>, StoreError> {
        Ok(self
            .collections
            .lock()
            .expect("lock")
            .get(collection)
            .and_then(|points| points.get(chunk_id))
            .map(|(payload, _)| payload.clone()))
    }

    async fn sample(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<ChunkPayload>, StoreError> {
        Ok(self
            .collections
            .lock()
            .expect("lock")
            .get(collection)
            .map(|points| {
                points
                    .values()
                    .take(limit)
                    .map(|(payload, _)| payload.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let store = self.collections.lock().expect("lock");
        let dimensions = self.dimensions.lock().expect("lock");
        let mut out: Vec<CollectionInfo> = store
            .iter()
            .map(|(name, points)| CollectionInfo {
                name: name.clone(),
                count: points.len() as u64,
                dimension: dimensions.get(name).copied().unwrap_or_default(),
                metric: "cosine".to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections.lock().expect("lock").remove(name);
        self.dimensions.lock().expect("lock").remove(name);
        Ok(())
    }
}

/// A small executive order document for pipeline tests.
pub fn order_document(id: &str, date: &str, body: &str) -> Document {
    Document {
        id: id.to_string(),
        title: format!("Order {id}"),
        date: date.to_string(),
        kind: DocumentKind::ExecutiveOrder,
        source: "Federal Register".to_string(),
        url: format!("https://example.com/{id}"),
        text: body.to_string(),
        metadata: govreporter_app::fetchers::SourceMetadata::Order {
            order_number: format!("14{id}"),
            president: "Example".to_string(),
            signing_date: date.to_string(),
            citation: "90 FR 1".to_string(),
            agencies: vec!["EPA".to_string()],
            raw_text_url: None,
        },
    }
}

/// A small opinion document for pipeline tests.
pub fn opinion_document(id: &str, date: &str, body: &str) -> Document {
    Document {
        id: id.to_string(),
        title: format!("Case {id}"),
        date: date.to_string(),
        kind: DocumentKind::CourtOpinion,
        source: "CourtListener".to_string(),
        url: format!("https://example.com/{id}"),
        text: body.to_string(),
        metadata: govreporter_app::fetchers::SourceMetadata::Opinion {
            case_name: format!("Case {id}"),
            citation: "601 U.S. 416 (2024)".to_string(),
            cluster_id: None,
            authoring_justice: Some("Roberts".to_string()),
            per_curiam: false,
            joined_by: None,
            docket_number: None,
        },
    }
}
