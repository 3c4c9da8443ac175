//! Resumable, rate-limited ingestion: fetch → chunk → enrich → embed →
//! upsert, with per-document progress tracking and duplicate detection.
//!
//! A bounded worker pool pulls discovered documents from a queue; each
//! worker claims its document in the progress store, runs the per-document
//! stages under per-stage deadlines, and hands the assembled payloads to a
//! collector that batches embedding and vector-store writes. A failure in
//! any stage fails only its own document.

pub mod monitor;
pub mod payload;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bon::Builder;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::chunking::ChunkingConfig;
use crate::embed::Embedder;
use crate::enrich::{Enricher, EnrichmentRecord};
use crate::fetchers::{DiscoveredDocument, DocumentFetcher};
use crate::progress::{ProgressError, ProgressStore};
use crate::store::{chunk_id, ChunkPayload, EmbeddedChunk, StoreError, VectorStore};

pub use monitor::{IngestMonitor, IngestSummary};
pub use payload::{assemble_payloads, chunk_document, DocumentChunks};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] crate::fetchers::FetchError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("pipeline channel closed unexpectedly")]
    ChannelClosed,
    #[error("worker task panicked")]
    WorkerPanic,
}

/// Per-run knobs with per-stage deadlines for every external call.
#[derive(Debug, Clone, Builder)]
pub struct PipelineOptions {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[builder(default = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    #[builder(default = false)]
    pub dry_run: bool,
    #[builder(default = Duration::from_secs(30))]
    pub fetch_timeout: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub enrich_timeout: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub embed_timeout: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub upsert_timeout: Duration,
}

/// Stream of run events for progress rendering.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    DiscoveryStarted,
    Discovered {
        total: usize,
    },
    DocumentStarted {
        doc_id: String,
    },
    DocumentCompleted {
        doc_id: String,
        chunks: usize,
        eta: Option<Duration>,
    },
    DocumentFailed {
        doc_id: String,
        error: String,
    },
    DocumentSkipped {
        doc_id: String,
        duplicate: bool,
    },
    BatchUpserted {
        written: usize,
        skipped: usize,
    },
}

#[derive(Clone)]
struct EventSink(Option<mpsc::Sender<PipelineEvent>>);

impl EventSink {
    async fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event).await;
        }
    }
}

struct ProcessedDoc {
    doc_id: String,
    payloads: Vec<ChunkPayload>,
    claimed_at: Instant,
}

enum CollectorMsg {
    Processed(ProcessedDoc),
    /// Worker finished the document without producing payloads (empty
    /// chunk list); the progress store is already updated.
    CompletedEmpty { doc_id: String },
    /// Worker recorded the failure already; accounting only.
    Failed,
    Skipped { duplicate: bool },
}

pub struct IngestionPipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    enricher: Arc<dyn Enricher>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    progress: ProgressStore,
    opinion_cfg: ChunkingConfig,
    order_cfg: ChunkingConfig,
    options: PipelineOptions,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        enricher: Arc<dyn Enricher>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        progress: ProgressStore,
        opinion_cfg: ChunkingConfig,
        order_cfg: ChunkingConfig,
        options: PipelineOptions,
    ) -> Self {
        Self {
            fetcher,
            enricher,
            embedder,
            store,
            progress,
            opinion_cfg,
            order_cfg,
            options,
        }
    }

    /// Run the full ingestion. `shutdown` stops new claims while letting
    /// in-flight documents finish and the partial batch flush.
    pub async fn run(
        &self,
        events: Option<mpsc::Sender<PipelineEvent>>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<IngestSummary, PipelineError> {
        let events = EventSink(events);
        let collection = self.fetcher.kind().collection_name();

        if !self.options.dry_run {
            self.store
                .ensure_collection(collection, self.embedder.dimension() as u64)
                .await?;
        }

        let run_args = serde_json::json!({
            "start_date": self.options.start_date.to_string(),
            "end_date": self.options.end_date.to_string(),
            "batch_size": self.options.batch_size,
            "workers": self.options.workers,
            "dry_run": self.options.dry_run,
        })
        .to_string();
        let run_id = self.progress.start_run(&run_args).await?;

        events.emit(PipelineEvent::DiscoveryStarted).await;
        let discovered = match self
            .fetcher
            .list_ids(self.options.start_date, self.options.end_date)
            .await
        {
            Ok(list) => list,
            Err(err) => {
                self.progress.end_run(run_id, "failed").await?;
                return Err(err.into());
            }
        };
        let total = discovered.len();
        events.emit(PipelineEvent::Discovered { total }).await;
        info!(
            collection,
            total,
            start = %self.options.start_date,
            end = %self.options.end_date,
            "discovery finished"
        );

        for doc in &discovered {
            self.progress.register(&doc.id).await?;
        }

        let workers = self.options.workers.max(1);
        let (doc_tx, doc_rx) = mpsc::channel::<DiscoveredDocument>(workers * 2);
        // The collector buffer plus this channel bound how many documents'
        // chunks are held in memory at once.
        let (col_tx, col_rx) = mpsc::channel::<CollectorMsg>(self.options.batch_size.max(1));

        let collector = tokio::spawn(run_collector(
            col_rx,
            CollectorCtx {
                embedder: self.embedder.clone(),
                store: self.store.clone(),
                progress: self.progress.clone(),
                events: events.clone(),
                collection: collection.to_string(),
                batch_size: self.options.batch_size.max(1),
                dry_run: self.options.dry_run,
                embed_timeout: self.options.embed_timeout,
                upsert_timeout: self.options.upsert_timeout,
            },
            total,
        ));

        let shared_rx = Arc::new(Mutex::new(doc_rx));
        let mut worker_set = JoinSet::new();
        for worker_idx in 0..workers {
            let ctx = WorkerCtx {
                fetcher: self.fetcher.clone(),
                enricher: self.enricher.clone(),
                store: self.store.clone(),
                progress: self.progress.clone(),
                events: events.clone(),
                collector: col_tx.clone(),
                collection: collection.to_string(),
                opinion_cfg: self.opinion_cfg,
                order_cfg: self.order_cfg,
                fetch_timeout: self.options.fetch_timeout,
                enrich_timeout: self.options.enrich_timeout,
                dry_run: self.options.dry_run,
            };
            let rx = Arc::clone(&shared_rx);
            worker_set.spawn(async move { run_worker(worker_idx, rx, ctx).await });
        }
        drop(col_tx);

        let mut interrupted = false;
        for doc in discovered {
            if shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }
            if doc_tx.send(doc).await.is_err() {
                break;
            }
        }
        drop(doc_tx);

        while let Some(result) = worker_set.join_next().await {
            match result {
                Ok(()) => {}
                Err(err) if err.is_panic() => return Err(PipelineError::WorkerPanic),
                Err(_) => return Err(PipelineError::WorkerPanic),
            }
        }

        let summary = collector.await.map_err(|_| PipelineError::WorkerPanic)??;

        let run_status = if interrupted { "interrupted" } else { "completed" };
        self.progress.end_run(run_id, run_status).await?;
        info!(
            collection,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            chunks = summary.chunks_written,
            status = run_status,
            "ingestion run finished"
        );
        Ok(summary)
    }
}

struct WorkerCtx {
    fetcher: Arc<dyn DocumentFetcher>,
    enricher: Arc<dyn Enricher>,
    store: Arc<dyn VectorStore>,
    progress: ProgressStore,
    events: EventSink,
    collector: mpsc::Sender<CollectorMsg>,
    collection: String,
    opinion_cfg: ChunkingConfig,
    order_cfg: ChunkingConfig,
    fetch_timeout: Duration,
    enrich_timeout: Duration,
    dry_run: bool,
}

async fn run_worker(
    worker_idx: usize,
    queue: Arc<Mutex<mpsc::Receiver<DiscoveredDocument>>>,
    ctx: WorkerCtx,
) {
    loop {
        let doc = {
            let mut guard = queue.lock().await;
            guard.recv().await
        };
        let Some(doc) = doc else {
            debug!(worker = worker_idx, "worker terminating (queue closed)");
            break;
        };
        process_one(worker_idx, &doc, &ctx).await;
    }
}

async fn process_one(worker_idx: usize, doc: &DiscoveredDocument, ctx: &WorkerCtx) {
    let doc_id = doc.id.clone();

    let already_done = match ctx.progress.is_completed(&doc_id).await {
        Ok(done) => done,
        Err(err) => {
            warn!(doc_id = %doc_id, error = %err, "progress lookup failed");
            false
        }
    };
    if already_done {
        ctx.events
            .emit(PipelineEvent::DocumentSkipped {
                doc_id: doc_id.clone(),
                duplicate: true,
            })
            .await;
        let _ = ctx.collector.send(CollectorMsg::Skipped { duplicate: true }).await;
        return;
    }

    let claimed = match ctx.progress.claim(&doc_id).await {
        Ok(claimed) => claimed,
        Err(err) => {
            warn!(doc_id = %doc_id, error = %err, "claim failed");
            false
        }
    };
    if !claimed {
        ctx.events
            .emit(PipelineEvent::DocumentSkipped {
                doc_id: doc_id.clone(),
                duplicate: false,
            })
            .await;
        let _ = ctx
            .collector
            .send(CollectorMsg::Skipped { duplicate: false })
            .await;
        return;
    }

    let claimed_at = Instant::now();
    ctx.events
        .emit(PipelineEvent::DocumentStarted {
            doc_id: doc_id.clone(),
        })
        .await;
    debug!(worker = worker_idx, doc_id = %doc_id, "worker picked up document");

    // The vector store already holding the first chunk means a previous run
    // stored this document; record it as completed and move on.
    if !ctx.dry_run {
        match ctx.store.exists(&ctx.collection, &chunk_id(&doc_id, 0)).await {
            Ok(true) => {
                let _ = ctx.progress.complete(&doc_id, claimed_at.elapsed()).await;
                ctx.events
                    .emit(PipelineEvent::DocumentSkipped {
                        doc_id: doc_id.clone(),
                        duplicate: true,
                    })
                    .await;
                let _ = ctx
                    .collector
                    .send(CollectorMsg::Skipped { duplicate: true })
                    .await;
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(doc_id = %doc_id, error = %err, "duplicate check failed; continuing");
            }
        }
    }

    let fetched = match timeout(ctx.fetch_timeout, ctx.fetcher.fetch(&doc_id)).await {
        Ok(Ok(document)) => document,
        Ok(Err(err)) => {
            fail_document(ctx, &doc_id, "fetch", &err.to_string()).await;
            return;
        }
        Err(_) => {
            fail_document(ctx, &doc_id, "fetch", "deadline exceeded").await;
            return;
        }
    };

    let (chunks, syllabus) = chunk_document(&fetched, &ctx.opinion_cfg, &ctx.order_cfg);
    if chunks.is_empty() {
        // An empty document is a completion with zero chunks written.
        let _ = ctx.progress.complete(&doc_id, claimed_at.elapsed()).await;
        let _ = ctx
            .collector
            .send(CollectorMsg::CompletedEmpty {
                doc_id: doc_id.clone(),
            })
            .await;
        return;
    }

    let enrichment = match timeout(
        ctx.enrich_timeout,
        ctx.enricher.enrich(&fetched, syllabus.as_deref()),
    )
    .await
    {
        Ok(record) => record,
        Err(_) => {
            warn!(doc_id = %doc_id, "enrichment deadline exceeded; continuing with empty record");
            EnrichmentRecord::empty_for(fetched.kind)
        }
    };

    let payloads = assemble_payloads(&fetched, &chunks, &enrichment);
    let _ = ctx
        .collector
        .send(CollectorMsg::Processed(ProcessedDoc {
            doc_id,
            payloads,
            claimed_at,
        }))
        .await;
}

async fn fail_document(ctx: &WorkerCtx, doc_id: &str, stage: &str, reason: &str) {
    let message = format!("{stage}: {reason}");
    warn!(doc_id = %doc_id, stage, reason, "document failed");
    if let Err(err) = ctx.progress.fail(doc_id, &message).await {
        warn!(doc_id = %doc_id, error = %err, "failed to record document failure");
    }
    ctx.events
        .emit(PipelineEvent::DocumentFailed {
            doc_id: doc_id.to_string(),
            error: message,
        })
        .await;
    let _ = ctx.collector.send(CollectorMsg::Failed).await;
}

struct CollectorCtx {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    progress: ProgressStore,
    events: EventSink,
    collection: String,
    batch_size: usize,
    dry_run: bool,
    embed_timeout: Duration,
    upsert_timeout: Duration,
}

async fn run_collector(
    mut rx: mpsc::Receiver<CollectorMsg>,
    ctx: CollectorCtx,
    total: usize,
) -> Result<IngestSummary, PipelineError> {
    let mut monitor = IngestMonitor::new(total);
    let mut buffer: Vec<ProcessedDoc> = Vec::new();

    while let Some(message) = rx.recv().await {
        match message {
            CollectorMsg::Processed(doc) => {
                buffer.push(doc);
                if buffer.len() >= ctx.batch_size {
                    flush_batch(&ctx, std::mem::take(&mut buffer), &mut monitor).await;
                }
            }
            CollectorMsg::CompletedEmpty { doc_id } => {
                monitor.record_completion(Duration::ZERO, 0);
                ctx.events
                    .emit(PipelineEvent::DocumentCompleted {
                        doc_id,
                        chunks: 0,
                        eta: monitor.eta(),
                    })
                    .await;
            }
            CollectorMsg::Failed => monitor.record_failure(),
            CollectorMsg::Skipped { duplicate } => {
                if duplicate {
                    monitor.record_duplicate();
                } else {
                    monitor.record_skip();
                }
            }
        }
    }

    if !buffer.is_empty() {
        flush_batch(&ctx, buffer, &mut monitor).await;
    }

    Ok(monitor.summary())
}

/// Embed and upsert one accumulated batch. Failures are isolated to the
/// documents they belong to.
async fn flush_batch(ctx: &CollectorCtx, batch: Vec<ProcessedDoc>, monitor: &mut IngestMonitor) {
    if batch.is_empty() {
        return;
    }

    if ctx.dry_run {
        for doc in batch {
            let chunks = doc.payloads.len();
            let _ = ctx.progress.complete(&doc.doc_id, doc.claimed_at.elapsed()).await;
            monitor.record_completion(doc.claimed_at.elapsed(), chunks);
            ctx.events
                .emit(PipelineEvent::DocumentCompleted {
                    doc_id: doc.doc_id,
                    chunks,
                    eta: monitor.eta(),
                })
                .await;
        }
        return;
    }

    let texts: Vec<String> = batch
        .iter()
        .flat_map(|doc| doc.payloads.iter().map(|p| p.text.clone()))
        .collect();

    let embedded = match timeout(ctx.embed_timeout, ctx.embedder.embed_batch(&texts)).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            fail_batch(ctx, batch, monitor, &format!("embed: {err}")).await;
            return;
        }
        Err(_) => {
            fail_batch(ctx, batch, monitor, "embed: deadline exceeded").await;
            return;
        }
    };

    // Map flat embedding indices back onto their documents.
    let mut chunks = Vec::with_capacity(texts.len());
    let mut zero_vector_docs: Vec<String> = Vec::new();
    {
        let mut vectors = embedded.vectors.into_iter();
        let mut flat_index = 0usize;
        for doc in &batch {
            let mut doc_failed = false;
            for payload in &doc.payloads {
                let Some(vector) = vectors.next() else {
                    warn!(doc_id = %doc.doc_id, "embedding output shorter than input");
                    break;
                };
                if embedded.failed.contains(&flat_index) {
                    doc_failed = true;
                }
                chunks.push(EmbeddedChunk {
                    payload: payload.clone(),
                    vector,
                });
                flat_index += 1;
            }
            if doc_failed {
                zero_vector_docs.push(doc.doc_id.clone());
            }
        }
    }

    let outcome = match timeout(
        ctx.upsert_timeout,
        ctx.store.batch_upsert(&ctx.collection, chunks, None),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            fail_batch(ctx, batch, monitor, &format!("upsert: {err}")).await;
            return;
        }
        Err(_) => {
            fail_batch(ctx, batch, monitor, "upsert: deadline exceeded").await;
            return;
        }
    };

    ctx.events
        .emit(PipelineEvent::BatchUpserted {
            written: outcome.written,
            skipped: outcome.skipped,
        })
        .await;

    for doc in batch {
        let doc_error = outcome
            .errors
            .iter()
            .find(|message| {
                doc.payloads
                    .iter()
                    .any(|p| message.starts_with(&p.chunk_id))
            })
            .cloned();
        match doc_error {
            Some(message) => {
                let _ = ctx
                    .progress
                    .fail(&doc.doc_id, &format!("upsert: {message}"))
                    .await;
                monitor.record_failure();
                ctx.events
                    .emit(PipelineEvent::DocumentFailed {
                        doc_id: doc.doc_id,
                        error: message,
                    })
                    .await;
            }
            None => {
                let chunks = doc.payloads.len();
                let _ = ctx.progress.complete(&doc.doc_id, doc.claimed_at.elapsed()).await;
                if zero_vector_docs.contains(&doc.doc_id) {
                    // Stored with zero vectors; flagged for re-embedding
                    // rather than dropped.
                    let _ = ctx
                        .progress
                        .annotate(&doc.doc_id, "some chunks embedded as zero vectors; re-embedding required")
                        .await;
                }
                monitor.record_completion(doc.claimed_at.elapsed(), chunks);
                ctx.events
                    .emit(PipelineEvent::DocumentCompleted {
                        doc_id: doc.doc_id,
                        chunks,
                        eta: monitor.eta(),
                    })
                    .await;
            }
        }
    }
}

async fn fail_batch(
    ctx: &CollectorCtx,
    batch: Vec<ProcessedDoc>,
    monitor: &mut IngestMonitor,
    reason: &str,
) {
    warn!(batch_len = batch.len(), reason, "failing batch");
    for doc in batch {
        let _ = ctx.progress.fail(&doc.doc_id, reason).await;
        monitor.record_failure();
        ctx.events
            .emit(PipelineEvent::DocumentFailed {
                doc_id: doc.doc_id,
                error: reason.to_string(),
            })
            .await;
    }
}
