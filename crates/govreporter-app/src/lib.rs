//! govreporter: ingestion and retrieval engine for US federal legal
//! documents, exposed to LLMs over the Model Context Protocol.
//!
//! - [`fetchers`] pull Supreme Court opinions and Executive Orders from
//!   their authoritative sources with rate limiting and retries.
//! - [`chunking`] segments documents along their legal structure under
//!   token budgets matched to the embedding model.
//! - [`enrich`] extracts document-level metadata with an LLM and validates
//!   it against the source text.
//! - [`embed`] turns chunk text into vectors in resilient batches.
//! - [`store`] adapts the vector database: collections, idempotent batch
//!   upserts, filtered cosine search.
//! - [`progress`] keeps durable per-document state for resumption and
//!   duplicate detection.
//! - [`pipeline`] orchestrates the whole ingestion flow with a bounded
//!   worker pool.
//! - [`server`] speaks MCP over stdio: search tools and full-document
//!   resources.

pub mod chunking;
pub mod citations;
pub mod cli;
pub mod config;
pub mod embed;
pub mod enrich;
pub mod error;
pub mod fetchers;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod store;

pub use error::AppError;
