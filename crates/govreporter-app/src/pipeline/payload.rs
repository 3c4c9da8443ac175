//! Chunking and payload assembly for one document.

use tracing::debug;

use crate::chunking::{chunk_opinion, chunk_order, ChunkingConfig, OpinionChunk, OrderChunk};
use crate::enrich::EnrichmentRecord;
use crate::fetchers::{Document, DocumentKind, SourceMetadata};
use crate::store::{chunk_id, date_int, ChunkPayload, OpinionDetail, OrderDetail, PayloadDetail};

/// Chunker output, one variant per document kind.
#[derive(Debug, Clone)]
pub enum DocumentChunks {
    Opinion(Vec<OpinionChunk>),
    Order(Vec<OrderChunk>),
}

impl DocumentChunks {
    pub fn len(&self) -> usize {
        match self {
            DocumentChunks::Opinion(chunks) => chunks.len(),
            DocumentChunks::Order(chunks) => chunks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Segment a document with the config for its type. For opinions the
/// Syllabus body is returned alongside for the enricher.
pub fn chunk_document(
    document: &Document,
    opinion_cfg: &ChunkingConfig,
    order_cfg: &ChunkingConfig,
) -> (DocumentChunks, Option<String>) {
    match document.kind {
        DocumentKind::CourtOpinion => {
            let (chunks, syllabus) = chunk_opinion(&document.text, opinion_cfg);
            (DocumentChunks::Opinion(chunks), syllabus)
        }
        DocumentKind::ExecutiveOrder => {
            let chunks = chunk_order(&document.text, order_cfg);
            (DocumentChunks::Order(chunks), None)
        }
    }
}

/// Combine chunk-level labels with document-level metadata and enrichment
/// into the payloads persisted to the vector store. Chunk ids are derived
/// from `(document_id, chunk_index)` and stay stable across re-ingestion.
pub fn assemble_payloads(
    document: &Document,
    chunks: &DocumentChunks,
    enrichment: &EnrichmentRecord,
) -> Vec<ChunkPayload> {
    let publication_date_int = date_int(&document.date);
    let base = |index: u32, text: &str, token_count: usize, detail: PayloadDetail| ChunkPayload {
        chunk_id: chunk_id(&document.id, index),
        document_id: document.id.clone(),
        chunk_index: index,
        token_count,
        text: text.to_string(),
        title: document.title.clone(),
        publication_date: document.date.clone(),
        publication_date_int,
        source: document.source.clone(),
        url: document.url.clone(),
        detail,
    };

    let payloads = match (chunks, &document.metadata) {
        (DocumentChunks::Opinion(chunks), SourceMetadata::Opinion { case_name, citation, authoring_justice, .. }) => {
            let enrichment = match enrichment {
                EnrichmentRecord::Opinion(e) => e.clone(),
                EnrichmentRecord::Order(_) => {
                    debug!(doc_id = %document.id, "order enrichment attached to opinion; ignoring");
                    Default::default()
                }
            };
            chunks
                .iter()
                .map(|chunk| {
                    base(
                        chunk.chunk_index,
                        &chunk.text,
                        chunk.token_count,
                        PayloadDetail::CourtOpinion(OpinionDetail {
                            case_name: case_name.clone(),
                            citation: citation.clone(),
                            opinion_type: chunk.opinion_type,
                            authoring_justice: chunk
                                .authoring_justice
                                .clone()
                                .or_else(|| authoring_justice.clone()),
                            section_label: chunk.section_label.clone(),
                            enrichment: enrichment.clone(),
                        }),
                    )
                })
                .collect()
        }
        (DocumentChunks::Order(chunks), SourceMetadata::Order { order_number, president, signing_date, .. }) => {
            let enrichment = match enrichment {
                EnrichmentRecord::Order(e) => e.clone(),
                EnrichmentRecord::Opinion(_) => {
                    debug!(doc_id = %document.id, "opinion enrichment attached to order; ignoring");
                    Default::default()
                }
            };
            let signing_date_int = date_int(signing_date);
            chunks
                .iter()
                .map(|chunk| {
                    base(
                        chunk.chunk_index,
                        &chunk.text,
                        chunk.token_count,
                        PayloadDetail::ExecutiveOrder(OrderDetail {
                            order_number: order_number.clone(),
                            president: president.clone(),
                            signing_date: signing_date.clone(),
                            signing_date_int,
                            chunk_type: chunk.chunk_type,
                            section_title: chunk.section_title.clone(),
                            subsection_label: chunk.subsection_label.clone(),
                            enrichment: enrichment.clone(),
                        }),
                    )
                })
                .collect()
        }
        _ => {
            debug!(doc_id = %document.id, "document metadata does not match its chunk kind");
            Vec::new()
        }
    };

    payloads
}
