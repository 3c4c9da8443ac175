//! MCP server over stdio: typed search tools plus URI-addressable
//! resources that fetch full documents from the authoritative sources.

pub mod query_processor;

use std::sync::Arc;

use chrono::NaiveDate;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    AnnotateAble, CallToolResult, Content, ErrorCode, Implementation, ListResourceTemplatesResult,
    ListResourcesResult, PaginatedRequestParam, RawResourceTemplate, ReadResourceRequestParam,
    ReadResourceResult, ResourceContents, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::embed::Embedder;
use crate::fetchers::{DocumentFetcher, DocumentKind};
use crate::store::{FilterExpr, ScoredChunk, VectorStore};
use query_processor::{format_collections, format_document, format_search_results, ShapingOptions};

/// JSON-RPC error code for upstream (external API) failures.
const UPSTREAM_ERROR: ErrorCode = ErrorCode(-32000);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to start MCP server: {0}")]
    Initialize(String),
    #[error("MCP server terminated abnormally: {0}")]
    Terminated(String),
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchDocumentsRequest {
    /// Natural-language search query.
    pub query: String,
    /// Restrict to specific document types; default searches both.
    #[serde(default)]
    pub document_types: Option<Vec<DocumentKind>>,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchOpinionsRequest {
    /// Natural-language search query.
    pub query: String,
    /// Filter by opinion type (majority, concurring, dissenting, syllabus).
    #[serde(default)]
    pub opinion_type: Option<String>,
    /// Filter by authoring justice, last name only.
    #[serde(default)]
    pub authoring_justice: Option<String>,
    /// Decisions on or after this date (YYYY-MM-DD).
    #[serde(default)]
    pub date_from: Option<String>,
    /// Decisions on or before this date (YYYY-MM-DD).
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchOrdersRequest {
    /// Natural-language search query.
    pub query: String,
    /// Filter by president, last name only.
    #[serde(default)]
    pub president: Option<String>,
    /// Match orders impacting any of these agencies.
    #[serde(default)]
    pub agencies: Option<Vec<String>>,
    /// Match orders tagged with any of these policy topics.
    #[serde(default)]
    pub policy_topics: Option<Vec<String>>,
    /// Signed on or after this date (YYYY-MM-DD).
    #[serde(default)]
    pub date_from: Option<String>,
    /// Signed on or before this date (YYYY-MM-DD).
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetDocumentRequest {
    /// Chunk id as returned in search results.
    pub id: String,
    /// Collection the chunk lives in.
    pub collection: String,
}

#[derive(Clone)]
pub struct GovReporterService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    opinion_fetcher: Arc<dyn DocumentFetcher>,
    order_fetcher: Arc<dyn DocumentFetcher>,
    config: ServerConfig,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GovReporterService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        opinion_fetcher: Arc<dyn DocumentFetcher>,
        order_fetcher: Arc<dyn DocumentFetcher>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            opinion_fetcher,
            order_fetcher,
            config,
            tool_router: Self::tool_router(),
        }
    }

    fn shaping(&self) -> ShapingOptions {
        ShapingOptions {
            max_chunk_chars: self.config.max_chunk_chars,
            hint_score_threshold: self.config.hint_score_threshold,
            hint_max_hits: self.config.hint_max_hits,
        }
    }

    fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.config.default_search_limit)
            .clamp(1, self.config.max_search_limit)
    }

    async fn query_vector(&self, query: &str) -> Result<Vec<f32>, McpError> {
        self.embedder.embed_one(query).await.map_err(|err| {
            McpError::new(
                UPSTREAM_ERROR,
                format!("embedding the query failed: {err}"),
                None,
            )
        })
    }

    async fn search_collection(
        &self,
        kind: DocumentKind,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<FilterExpr>,
    ) -> Result<Vec<ScoredChunk>, McpError> {
        self.store
            .semantic_search(kind.collection_name(), vector, limit, filter)
            .await
            .map_err(|err| {
                McpError::new(UPSTREAM_ERROR, format!("vector search failed: {err}"), None)
            })
    }

    #[tool(
        description = "Semantic search across all government document collections (Supreme Court opinions and Executive Orders). Returns ranked chunks with structural context, citations, and document summaries."
    )]
    pub async fn search_government_documents(
        &self,
        Parameters(request): Parameters<SearchDocumentsRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.query.trim().is_empty() {
            return Err(McpError::invalid_params("query must not be empty", None));
        }
        let limit = self.clamp_limit(request.limit);
        let kinds = request
            .document_types
            .filter(|kinds| !kinds.is_empty())
            .unwrap_or_else(|| vec![DocumentKind::CourtOpinion, DocumentKind::ExecutiveOrder]);

        let vector = self.query_vector(&request.query).await?;
        let mut hits = Vec::new();
        for kind in kinds {
            hits.extend(
                self.search_collection(kind, vector.clone(), limit, None)
                    .await?,
            );
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        let text = format_search_results(&request.query, &hits, &self.shaping());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "Search Supreme Court opinions with filters for opinion type, authoring justice, and decision date range. Returns ranked opinion chunks with legal metadata."
    )]
    pub async fn search_court_opinions(
        &self,
        Parameters(request): Parameters<SearchOpinionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.query.trim().is_empty() {
            return Err(McpError::invalid_params("query must not be empty", None));
        }
        let limit = self.clamp_limit(request.limit);

        let mut filter = FilterExpr::default();
        if let Some(opinion_type) = &request.opinion_type {
            filter = filter.eq("opinion_type", opinion_type.clone());
        }
        if let Some(justice) = &request.authoring_justice {
            filter = filter.eq("authoring_justice", justice.clone());
        }
        let from = parse_date_arg(request.date_from.as_deref(), "date_from")?;
        let to = parse_date_arg(request.date_to.as_deref(), "date_to")?;
        filter = filter.date_range("publication_date", from, to);

        let vector = self.query_vector(&request.query).await?;
        let filter = (!filter.is_empty()).then_some(filter);
        let hits = self
            .search_collection(DocumentKind::CourtOpinion, vector, limit, filter)
            .await?;

        let text = format_search_results(&request.query, &hits, &self.shaping());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "Search Executive Orders with filters for president, impacted agencies, policy topics, and signing date range. Returns ranked order chunks with policy metadata."
    )]
    pub async fn search_executive_orders(
        &self,
        Parameters(request): Parameters<SearchOrdersRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.query.trim().is_empty() {
            return Err(McpError::invalid_params("query must not be empty", None));
        }
        let limit = self.clamp_limit(request.limit);

        let mut filter = FilterExpr::default();
        if let Some(president) = &request.president {
            filter = filter.eq("president", president.clone());
        }
        if let Some(agencies) = &request.agencies {
            filter = filter.any_of("agencies_impacted", agencies.clone());
        }
        if let Some(topics) = &request.policy_topics {
            filter = filter.any_of("policy_topics", topics.clone());
        }
        let from = parse_date_arg(request.date_from.as_deref(), "date_from")?;
        let to = parse_date_arg(request.date_to.as_deref(), "date_to")?;
        filter = filter.date_range("signing_date", from, to);

        let vector = self.query_vector(&request.query).await?;
        let filter = (!filter.is_empty()).then_some(filter);
        let hits = self
            .search_collection(DocumentKind::ExecutiveOrder, vector, limit, filter)
            .await?;

        let text = format_search_results(&request.query, &hits, &self.shaping());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Fetch one stored chunk by id from a collection.")]
    pub async fn get_document_by_id(
        &self,
        Parameters(request): Parameters<GetDocumentRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.id.trim().is_empty() || request.collection.trim().is_empty() {
            return Err(McpError::invalid_params(
                "id and collection are required",
                None,
            ));
        }
        let payload = self
            .store
            .get_by_id(&request.collection, &request.id)
            .await
            .map_err(|err| {
                McpError::new(UPSTREAM_ERROR, format!("lookup failed: {err}"), None)
            })?;
        let text = match payload {
            Some(payload) => format_document(&payload),
            None => format!(
                "Document {} not found in collection {}",
                request.id, request.collection
            ),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "List the available document collections and their chunk counts.")]
    pub async fn list_collections(&self) -> Result<CallToolResult, McpError> {
        let collections = self.store.list_collections().await.map_err(|err| {
            McpError::new(
                UPSTREAM_ERROR,
                format!("listing collections failed: {err}"),
                None,
            )
        })?;
        Ok(CallToolResult::success(vec![Content::text(
            format_collections(&collections),
        )]))
    }

    fn fetcher_for_scheme(&self, scheme: &str) -> Option<&Arc<dyn DocumentFetcher>> {
        match scheme {
            "opinion" => Some(&self.opinion_fetcher),
            "order" => Some(&self.order_fetcher),
            _ => None,
        }
    }
}

#[tool_handler]
impl ServerHandler for GovReporterService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "govreporter".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            instructions: Some(
                "Semantic search over US Supreme Court opinions and presidential Executive \
                 Orders. Search tools return ranked chunks; opinion:// and order:// resources \
                 return complete, freshly fetched documents."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: Vec::new(),
            next_cursor: None,
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        let templates = vec![
            RawResourceTemplate {
                uri_template: "opinion://{id}".to_string(),
                name: "Supreme Court opinion".to_string(),
                description: Some(
                    "Full current text of a Supreme Court opinion, fetched on demand".to_string(),
                ),
                mime_type: Some("text/plain".to_string()),
                title: None,
            }
            .no_annotation(),
            RawResourceTemplate {
                uri_template: "order://{document_number}".to_string(),
                name: "Executive Order".to_string(),
                description: Some(
                    "Full current text of an Executive Order, fetched on demand".to_string(),
                ),
                mime_type: Some("text/plain".to_string()),
                title: None,
            }
            .no_annotation(),
        ];
        Ok(ListResourceTemplatesResult {
            resource_templates: templates,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let (scheme, id) = parse_resource_uri(&uri)
            .ok_or_else(|| McpError::invalid_params(format!("unknown resource URI: {uri}"), None))?;
        let fetcher = self
            .fetcher_for_scheme(scheme)
            .ok_or_else(|| McpError::invalid_params(format!("unknown resource URI: {uri}"), None))?;

        // Resources bypass the vector store so the returned document is
        // always the current upstream text.
        let document = tokio::time::timeout(self.config.request_timeout, fetcher.fetch(id))
            .await
            .map_err(|_| {
                McpError::new(UPSTREAM_ERROR, format!("fetching {uri} timed out"), None)
            })?
            .map_err(|err| {
                McpError::new(UPSTREAM_ERROR, format!("fetching {uri} failed: {err}"), None)
            })?;

        let text = format!(
            "{}\n{}\n\n{}",
            document.title, document.date, document.text
        );
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }
}

fn parse_resource_uri(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;
    let id = rest.trim_matches('/');
    if id.is_empty() {
        return None;
    }
    Some((scheme, id))
}

fn parse_date_arg(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>, McpError> {
    match raw {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                McpError::invalid_params(
                    format!("{field} must be an ISO date (YYYY-MM-DD), got `{value}`"),
                    None,
                )
            }),
    }
}

/// Serve MCP over stdio until the client disconnects. On SIGINT in-flight
/// requests get the configured grace period before the transport is closed.
pub async fn serve_stdio(service: GovReporterService) -> Result<(), ServerError> {
    let grace = service.config.shutdown_grace;
    info!("starting MCP server on stdio");

    let running = service
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|err| ServerError::Initialize(err.to_string()))?;

    let cancellation = running.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(grace_secs = grace.as_secs(), "termination signal; draining in-flight requests");
            tokio::time::sleep(grace).await;
            cancellation.cancel();
        }
    });

    running
        .waiting()
        .await
        .map_err(|err| ServerError::Terminated(err.to_string()))?;
    info!("MCP server stopped");
    Ok(())
}
