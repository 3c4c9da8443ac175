use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;
use tracing_subscriber::{filter::LevelFilter, fmt};

use govreporter_app::chunking::ChunkingConfig;
use govreporter_app::cli::{
    Cli, Commands, DeleteArgs, DocTypeArg, InfoArgs, InfoCommands, IngestRunArgs, IngestSource,
    QueryArgs, SampleArgs,
};
use govreporter_app::config::AppConfig;
use govreporter_app::embed::{Embedder, OpenAiEmbedder};
use govreporter_app::enrich::OpenAiEnricher;
use govreporter_app::error::{EXIT_INTERRUPTED, EXIT_OK, EXIT_USER_ERROR};
use govreporter_app::fetchers::{
    CourtListenerFetcher, DocumentFetcher, DocumentKind, FederalRegisterFetcher,
    court_listener::DEFAULT_COURT_LISTENER_URL, federal_register::DEFAULT_FEDERAL_REGISTER_URL,
};
use govreporter_app::pipeline::{
    IngestSummary, IngestionPipeline, PipelineError, PipelineEvent, PipelineOptions,
};
use govreporter_app::progress::{ProgressStore, ProgressStoreOptions};
use govreporter_app::server::query_processor::{
    format_collections, format_search_results, ShapingOptions,
};
use govreporter_app::server::{self, GovReporterService};
use govreporter_app::store::{PayloadDetail, QdrantStore, ScoredChunk, VectorStore};
use govreporter_app::AppError;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USER_ERROR,
            };
            let _ = err.print();
            process::exit(code);
        }
    };

    init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            process::exit(err.exit_code());
        }
    }
}

fn init_tracing(cli_level: Option<&str>) {
    let level = cli_level
        .map(str::to_string)
        .or_else(|| std::env::var("MCP_LOG_LEVEL").ok())
        .and_then(|raw| raw.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    // stdout belongs to the MCP transport; logs always go to stderr.
    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing subscriber already set; skipping re-initialization");
    }
}

async fn run(cli: Cli) -> Result<i32, AppError> {
    let config = AppConfig::load()?;

    match cli.command {
        Commands::Server => run_server(config).await,
        Commands::Ingest(args) => match args.source {
            IngestSource::Opinions(run_args) => {
                run_ingest(config, DocumentKind::CourtOpinion, run_args).await
            }
            IngestSource::Orders(run_args) => {
                run_ingest(config, DocumentKind::ExecutiveOrder, run_args).await
            }
        },
        Commands::Delete(args) => run_delete(config, args).await,
        Commands::Info(args) => run_info(config, args).await,
        Commands::Query(args) => run_query(config, args).await,
    }
}

fn connect_store(
    config: &AppConfig,
    url_override: Option<&str>,
) -> Result<Arc<QdrantStore>, AppError> {
    let url = match url_override {
        Some(url) => url.to_string(),
        None => config.qdrant.url(),
    };
    Ok(Arc::new(QdrantStore::connect(
        &url,
        config.qdrant.api_key.as_deref(),
    )?))
}

fn opinion_fetcher(config: &AppConfig) -> Result<Arc<CourtListenerFetcher>, AppError> {
    let token = config.require_court_listener_token()?;
    Ok(Arc::new(CourtListenerFetcher::new(
        DEFAULT_COURT_LISTENER_URL,
        token,
    )?))
}

fn order_fetcher() -> Result<Arc<FederalRegisterFetcher>, AppError> {
    Ok(Arc::new(FederalRegisterFetcher::new(
        DEFAULT_FEDERAL_REGISTER_URL,
    )?))
}

async fn run_server(config: AppConfig) -> Result<i32, AppError> {
    let store = connect_store(&config, None)?;
    let embedder = Arc::new(OpenAiEmbedder::new(config.require_openai_key()?)?);
    let opinions = opinion_fetcher(&config)?;
    let orders = order_fetcher()?;

    let service = GovReporterService::new(
        store,
        embedder,
        opinions,
        orders,
        config.server.clone(),
    );
    server::serve_stdio(service).await?;
    Ok(EXIT_OK)
}

async fn run_ingest(
    config: AppConfig,
    kind: DocumentKind,
    args: IngestRunArgs,
) -> Result<i32, AppError> {
    if args.start_date > args.end_date {
        return Err(AppError::usage(format!(
            "--start-date {} is after --end-date {}",
            args.start_date, args.end_date
        )));
    }

    let openai_key = config.require_openai_key()?.to_string();
    let fetcher: Arc<dyn DocumentFetcher> = match kind {
        DocumentKind::CourtOpinion => opinion_fetcher(&config)?,
        DocumentKind::ExecutiveOrder => order_fetcher()?,
    };
    let enricher = Arc::new(OpenAiEnricher::new(&openai_key)?);
    let embedder = Arc::new(OpenAiEmbedder::new(&openai_key)?);
    let store = connect_store(&config, args.vector_db_path.as_deref())?;

    let progress_path = args.progress_db.clone().unwrap_or_else(|| {
        PathBuf::from(match kind {
            DocumentKind::CourtOpinion => "opinions_ingestion.db",
            DocumentKind::ExecutiveOrder => "orders_ingestion.db",
        })
    });
    let progress = ProgressStore::open(
        &progress_path,
        ProgressStoreOptions::builder()
            .stale_after(config.stale_claim)
            .build(),
    )
    .await?;

    let (opinion_cfg, order_cfg): (ChunkingConfig, ChunkingConfig) =
        (config.opinion_chunking, config.order_chunking);
    let options = PipelineOptions::builder()
        .start_date(args.start_date)
        .end_date(args.end_date)
        .batch_size(args.batch_size.max(1))
        .workers(args.workers.max(1))
        .dry_run(args.dry_run)
        .build();

    if args.dry_run {
        tracing::info!("dry run: no vectors will be written");
    }

    let pipeline = IngestionPipeline::new(
        fetcher, enricher, embedder, store, progress, opinion_cfg, order_cfg, options,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing in-flight documents");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(256);
    let run_shutdown = Arc::clone(&shutdown);
    let handle =
        tokio::spawn(async move { pipeline.run(Some(event_tx), run_shutdown).await });

    let progress_bar = make_progress_bar();
    while let Some(event) = event_rx.recv().await {
        render_event(&progress_bar, &event);
    }

    let summary = handle
        .await
        .map_err(|_| AppError::Pipeline(PipelineError::WorkerPanic))??;
    progress_bar.finish_and_clear();
    print_summary(kind, &summary);

    Ok(if shutdown.load(Ordering::Relaxed) {
        EXIT_INTERRUPTED
    } else {
        EXIT_OK
    })
}

fn make_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {pos}/{len} docs ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn render_event(pb: &ProgressBar, event: &PipelineEvent) {
    match event {
        PipelineEvent::DiscoveryStarted => pb.set_message("discovering documents"),
        PipelineEvent::Discovered { total } => {
            pb.set_length((*total).max(1) as u64);
            pb.set_message(format!("{total} documents discovered"));
        }
        PipelineEvent::DocumentStarted { doc_id } => {
            pb.set_message(format!("processing {doc_id}"));
        }
        PipelineEvent::DocumentCompleted { doc_id, chunks, .. } => {
            pb.inc(1);
            pb.set_message(format!("completed {doc_id} ({chunks} chunks)"));
        }
        PipelineEvent::DocumentFailed { doc_id, error } => {
            pb.inc(1);
            pb.set_message(format!("failed {doc_id}: {error}"));
        }
        PipelineEvent::DocumentSkipped { doc_id, duplicate } => {
            pb.inc(1);
            let reason = if *duplicate { "duplicate" } else { "skipped" };
            pb.set_message(format!("{reason} {doc_id}"));
        }
        PipelineEvent::BatchUpserted { written, skipped } => {
            pb.set_message(format!("upserted batch ({written} written, {skipped} existing)"));
        }
    }
}

fn print_summary(kind: DocumentKind, summary: &IngestSummary) {
    println!("ingestion summary ({})", kind.collection_name());
    println!("  discovered: {}", summary.discovered);
    println!("  completed:  {}", summary.completed);
    println!("  failed:     {}", summary.failed);
    println!("  skipped:    {}", summary.skipped);
    println!("  duplicates: {}", summary.duplicates);
    println!("  chunks:     {}", summary.chunks_written);
    println!("  elapsed:    {:.1}s", summary.elapsed.as_secs_f64());
}

async fn run_delete(config: AppConfig, args: DeleteArgs) -> Result<i32, AppError> {
    let store = connect_store(&config, None)?;

    let targets: Vec<String> = if args.all {
        store
            .list_collections()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect()
    } else {
        match args.collection {
            Some(name) => vec![name],
            None => {
                return Err(AppError::usage(
                    "delete requires --collection NAME or --all",
                ));
            }
        }
    };

    if targets.is_empty() {
        println!("Nothing to delete.");
        return Ok(EXIT_OK);
    }

    if !args.yes {
        let prompt = format!("Delete collection(s) {}?", targets.join(", "));
        let confirmed = inquire::Confirm::new(&prompt).with_default(false).prompt()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(EXIT_OK);
        }
    }

    for name in targets {
        store.delete_collection(&name).await?;
        println!("Deleted {name}.");
    }
    Ok(EXIT_OK)
}

async fn run_info(config: AppConfig, args: InfoArgs) -> Result<i32, AppError> {
    let store = connect_store(&config, None)?;
    match args.what {
        InfoCommands::Collections => {
            let collections = store.list_collections().await?;
            println!("{}", format_collections(&collections));
        }
        InfoCommands::Sample(sample) => print_samples(store, sample).await?,
    }
    Ok(EXIT_OK)
}

async fn print_samples(store: Arc<QdrantStore>, args: SampleArgs) -> Result<(), AppError> {
    let kind = match args.doc_type {
        DocTypeArg::Opinions => DocumentKind::CourtOpinion,
        DocTypeArg::Orders => DocumentKind::ExecutiveOrder,
    };
    let payloads = store.sample(kind.collection_name(), args.limit).await?;
    if payloads.is_empty() {
        println!("No chunks stored in {}.", kind.collection_name());
        return Ok(());
    }
    for payload in payloads {
        println!("{} · {} · chunk {}", payload.chunk_id, payload.title, payload.chunk_index);
        match &payload.detail {
            PayloadDetail::CourtOpinion(detail) => {
                let kind = detail
                    .opinion_type
                    .map(|t| t.as_ref().to_string())
                    .unwrap_or_else(|| "unlabeled".to_string());
                let section = detail.section_label.as_deref().unwrap_or("-");
                println!("  {kind} opinion · section {section}");
            }
            PayloadDetail::ExecutiveOrder(detail) => {
                let section = detail.section_title.as_deref().unwrap_or("-");
                println!("  {} block · {section}", detail.chunk_type.as_ref());
            }
        }
        if args.show_text {
            println!("  {}", payload.text.replace('\n', "\n  "));
        }
    }
    Ok(())
}

async fn run_query(config: AppConfig, args: QueryArgs) -> Result<i32, AppError> {
    let store = connect_store(&config, None)?;
    let embedder = OpenAiEmbedder::new(config.require_openai_key()?)?;

    let vector = embedder.embed_one(&args.text).await?;
    let mut hits: Vec<ScoredChunk> = Vec::new();
    for kind in [DocumentKind::CourtOpinion, DocumentKind::ExecutiveOrder] {
        match store
            .semantic_search(kind.collection_name(), vector.clone(), args.limit, None)
            .await
        {
            Ok(found) => hits.extend(found),
            Err(err) => tracing::warn!(
                collection = kind.collection_name(),
                error = %err,
                "search failed for collection"
            ),
        }
    }
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(args.limit);

    let shaping = ShapingOptions {
        max_chunk_chars: config.server.max_chunk_chars,
        hint_score_threshold: config.server.hint_score_threshold,
        hint_max_hits: config.server.hint_max_hits,
    };
    println!("{}", format_search_results(&args.text, &hits, &shaping));
    Ok(EXIT_OK)
}
