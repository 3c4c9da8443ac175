//! End-to-end ingestion pipeline tests against scripted collaborators.
//!
//! These exercise resumability, duplicate detection, partial-failure
//! isolation, idempotent upserts, and the exact-match search law.

mod support;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::NaiveDate;

use govreporter_app::chunking::ChunkingConfig;
use govreporter_app::embed::Embedder;
use govreporter_app::fetchers::DocumentKind;
use govreporter_app::pipeline::{IngestionPipeline, PipelineOptions};
use govreporter_app::progress::{ProgressStore, ProgressStoreOptions, ProgressStatus};
use govreporter_app::store::{chunk_id, VectorStore};

use support::{order_document, FakeEnricher, FakeFetcher, HashEmbedder, MemoryVectorStore};

fn small_cfg() -> ChunkingConfig {
    ChunkingConfig::new(5, 30, 60, 0.1).expect("valid config")
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

fn order_body(seed: &str) -> String {
    format!(
        "It is hereby ordered:\nSec. 1. Purpose. {seed} purpose text explains the objective in detail.\nSec. 2. Policy. {seed} policy text directs the agencies to act accordingly."
    )
}

struct Harness {
    fetcher: Arc<FakeFetcher>,
    store: Arc<MemoryVectorStore>,
    progress: ProgressStore,
}

impl Harness {
    async fn new(documents: Vec<govreporter_app::fetchers::Document>) -> Self {
        Self {
            fetcher: Arc::new(FakeFetcher::new(DocumentKind::ExecutiveOrder, documents)),
            store: Arc::new(MemoryVectorStore::default()),
            progress: ProgressStore::open_in_memory().await.expect("progress store"),
        }
    }

    fn pipeline(&self, batch_size: usize) -> IngestionPipeline {
        let options = PipelineOptions::builder()
            .start_date(date("2025-01-01"))
            .end_date(date("2025-12-31"))
            .batch_size(batch_size)
            .workers(3)
            .build();
        IngestionPipeline::new(
            self.fetcher.clone(),
            Arc::new(FakeEnricher::default()),
            Arc::new(HashEmbedder::default()),
            self.store.clone(),
            self.progress.clone(),
            small_cfg(),
            small_cfg(),
            options,
        )
    }

    async fn run(&self, batch_size: usize) -> govreporter_app::pipeline::IngestSummary {
        self.pipeline(batch_size)
            .run(None, Arc::new(AtomicBool::new(false)))
            .await
            .expect("pipeline run")
    }
}

#[tokio::test]
async fn full_run_completes_every_document() {
    let docs = vec![
        order_document("a1", "2025-01-02", &order_body("Alpha")),
        order_document("b2", "2025-01-03", &order_body("Beta")),
        order_document("c3", "2025-01-04", &order_body("Gamma")),
    ];
    let harness = Harness::new(docs).await;
    let summary = harness.run(2).await;

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);
    assert!(summary.chunks_written > 0);
    assert_eq!(
        harness.store.chunk_count("executive_orders"),
        summary.chunks_written
    );

    let stats = harness.progress.stats().await.expect("stats");
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn rerun_skips_completed_documents_without_refetching() {
    let docs = vec![
        order_document("a1", "2025-01-02", &order_body("Alpha")),
        order_document("b2", "2025-01-03", &order_body("Beta")),
    ];
    let harness = Harness::new(docs).await;

    let first = harness.run(10).await;
    assert_eq!(first.completed, 2);
    let fetches_after_first = harness.fetcher.fetch_count();

    let second = harness.run(10).await;
    assert_eq!(second.completed, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(
        harness.fetcher.fetch_count(),
        fetches_after_first,
        "completed documents must not be re-fetched"
    );
}

#[tokio::test]
async fn failure_is_isolated_and_retried_on_rerun() {
    let docs = vec![
        order_document("a1", "2025-01-02", &order_body("Alpha")),
        order_document("bad", "2025-01-03", &order_body("Broken")),
        order_document("c3", "2025-01-04", &order_body("Gamma")),
    ];
    let harness = Harness::new(docs).await;
    harness.fetcher.fail_on("bad");

    let first = harness.run(10).await;
    assert_eq!(first.completed, 2);
    assert_eq!(first.failed, 1);
    let record = harness
        .progress
        .get("bad")
        .await
        .expect("get")
        .expect("row exists");
    assert_eq!(record.status, ProgressStatus::Failed);
    assert!(record.error.as_deref().is_some_and(|e| e.contains("fetch")));

    harness.fetcher.heal("bad");
    let second = harness.run(10).await;
    assert_eq!(second.completed, 1);
    assert_eq!(second.duplicates, 2);
    assert_eq!(second.failed, 0);

    let stats = harness.progress.stats().await.expect("stats");
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn empty_document_completes_with_zero_chunks() {
    let docs = vec![order_document("empty", "2025-01-02", "")];
    let harness = Harness::new(docs).await;

    let summary = harness.run(10).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.chunks_written, 0);
    assert!(harness
        .progress
        .is_completed("empty")
        .await
        .expect("is_completed"));
    assert_eq!(harness.store.chunk_count("executive_orders"), 0);
}

#[tokio::test]
async fn reingestion_into_fresh_progress_is_idempotent() {
    let docs = vec![
        order_document("a1", "2025-01-02", &order_body("Alpha")),
        order_document("b2", "2025-01-03", &order_body("Beta")),
    ];
    let harness = Harness::new(docs.clone()).await;
    harness.run(10).await;
    let ids_after_first = harness.store.chunk_ids("executive_orders");
    assert!(!ids_after_first.is_empty());

    // Losing the progress database must not duplicate vector-store
    // contents: the store-side duplicate check catches each document.
    let fresh_progress = ProgressStore::open_in_memory().await.expect("progress");
    let rerun = IngestionPipeline::new(
        harness.fetcher.clone(),
        Arc::new(FakeEnricher::default()),
        Arc::new(HashEmbedder::default()),
        harness.store.clone(),
        fresh_progress,
        small_cfg(),
        small_cfg(),
        PipelineOptions::builder()
            .start_date(date("2025-01-01"))
            .end_date(date("2025-12-31"))
            .build(),
    );
    let summary = rerun
        .run(None, Arc::new(AtomicBool::new(false)))
        .await
        .expect("rerun");

    assert_eq!(summary.duplicates, 2);
    assert_eq!(harness.store.chunk_ids("executive_orders"), ids_after_first);
}

#[tokio::test]
async fn zero_vector_chunks_complete_with_a_reembedding_note() {
    let body = order_body("Alpha");
    let docs = vec![order_document("a1", "2025-01-02", &body)];
    let harness = Harness::new(docs).await;

    // Fail the header chunk's embedding; the fake emits a zero vector for
    // it, which must surface as a re-embedding note on the document.
    let embedder = Arc::new(HashEmbedder::default());
    embedder
        .fail_texts
        .lock()
        .expect("lock")
        .insert("It is hereby ordered:".to_string());
    let options = PipelineOptions::builder()
        .start_date(date("2025-01-01"))
        .end_date(date("2025-12-31"))
        .build();
    let pipeline = IngestionPipeline::new(
        harness.fetcher.clone(),
        Arc::new(FakeEnricher::default()),
        embedder,
        harness.store.clone(),
        harness.progress.clone(),
        small_cfg(),
        small_cfg(),
        options,
    );
    let summary = pipeline
        .run(None, Arc::new(AtomicBool::new(false)))
        .await
        .expect("run");

    assert_eq!(summary.completed, 1);
    let record = harness
        .progress
        .get("a1")
        .await
        .expect("get")
        .expect("row");
    assert_eq!(record.status, ProgressStatus::Completed);
    assert!(record
        .error
        .as_deref()
        .is_some_and(|note| note.contains("re-embedding")));
}

#[tokio::test]
async fn exact_match_search_returns_the_stored_payload() {
    let body = order_body("Unique appropriations language");
    let docs = vec![order_document("a1", "2025-01-02", &body)];
    let harness = Harness::new(docs).await;
    harness.run(10).await;

    // Querying with a stored chunk's own text must return that chunk with
    // a near-perfect score.
    let stored = harness
        .store
        .sample("executive_orders", 1)
        .await
        .expect("sample");
    let target = &stored[0];
    let embedder = HashEmbedder::default();
    let vector = embedder.embed_one(&target.text).await.expect("embed");
    let hits = harness
        .store
        .semantic_search("executive_orders", vector, 1, None)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.chunk_id, target.chunk_id);
    assert!(hits[0].score >= 0.999, "score was {}", hits[0].score);
}

#[tokio::test]
async fn chunk_ids_derive_from_document_and_index() {
    let docs = vec![order_document("a1", "2025-01-02", &order_body("Alpha"))];
    let harness = Harness::new(docs).await;
    harness.run(10).await;

    let ids = harness.store.chunk_ids("executive_orders");
    let expected: Vec<String> = (0..ids.len() as u32).map(|i| chunk_id("a1", i)).collect();
    let mut expected_sorted = expected.clone();
    expected_sorted.sort();
    assert_eq!(ids, expected_sorted);
}
