//! Shapes vector-store hits into the text blocks returned to the LLM.

use crate::store::{ChunkPayload, CollectionInfo, PayloadDetail, ScoredChunk};

/// Knobs for result shaping, taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct ShapingOptions {
    pub max_chunk_chars: usize,
    pub hint_score_threshold: f32,
    pub hint_max_hits: usize,
}

impl Default for ShapingOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: 2000,
            hint_score_threshold: 0.4,
            hint_max_hits: 3,
        }
    }
}

/// Render ranked search hits: per-hit header, hierarchical context, the
/// (possibly truncated) chunk text, metadata, and the document summary.
/// A small, uniformly strong result set gets a full-document hint naming
/// the resource URIs that return the complete texts.
pub fn format_search_results(query: &str, hits: &[ScoredChunk], opts: &ShapingOptions) -> String {
    if hits.is_empty() {
        return format!("No results found for query: \"{query}\"");
    }

    let mut ranked: Vec<&ScoredChunk> = hits.iter().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = Vec::new();
    out.push(format!("Search results for: \"{query}\""));
    out.push(format!("{} relevant chunks found.", ranked.len()));
    out.push(String::new());

    for (rank, hit) in ranked.iter().enumerate() {
        out.push(format_hit(rank + 1, hit, opts));
        out.push(String::new());
    }

    if let Some(hint) = full_document_hint(&ranked, opts) {
        out.push(hint);
    }

    out.join("\n").trim_end().to_string()
}

/// Render a single payload fetched by id, without ranking.
pub fn format_document(payload: &ChunkPayload) -> String {
    let mut out = Vec::new();
    out.push(format!("Document chunk {}", payload.chunk_id));
    out.push(title_line(payload));
    if let Some(context) = context_line(payload) {
        out.push(context);
    }
    out.push(format!(
        "chunk {} · {} tokens · {}",
        payload.chunk_index, payload.token_count, payload.publication_date
    ));
    out.push(String::new());
    out.push(payload.text.clone());
    let metadata = metadata_lines(payload);
    if !metadata.is_empty() {
        out.push(String::new());
        out.extend(metadata);
    }
    out.join("\n")
}

/// Render the collection inventory as a compact table.
pub fn format_collections(collections: &[CollectionInfo]) -> String {
    if collections.is_empty() {
        return "No collections found.".to_string();
    }
    let mut out = Vec::new();
    out.push(format!(
        "{:<24} {:>10} {:>6} {:>8}",
        "collection", "chunks", "dim", "metric"
    ));
    for info in collections {
        out.push(format!(
            "{:<24} {:>10} {:>6} {:>8}",
            info.name, info.count, info.dimension, info.metric
        ));
    }
    out.join("\n")
}

fn format_hit(rank: usize, hit: &ScoredChunk, opts: &ShapingOptions) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "[{rank}] score={:.2} — {}",
        hit.score,
        title_line(&hit.payload)
    ));
    if let Some(context) = context_line(&hit.payload) {
        lines.push(context);
    }
    lines.push(truncate_chars(&hit.payload.text, opts.max_chunk_chars));
    lines.extend(metadata_lines(&hit.payload));
    let summary = summary_of(&hit.payload);
    if !summary.is_empty() {
        lines.push(format!("summary: {summary}"));
    }
    lines.join("\n")
}

fn title_line(payload: &ChunkPayload) -> String {
    match &payload.detail {
        PayloadDetail::CourtOpinion(detail) => {
            if detail.citation.is_empty() {
                detail.case_name.clone()
            } else {
                format!("{}, {}", detail.case_name, detail.citation)
            }
        }
        PayloadDetail::ExecutiveOrder(detail) => {
            if detail.order_number.is_empty() {
                payload.title.clone()
            } else {
                format!("Executive Order {}: {}", detail.order_number, payload.title)
            }
        }
    }
}

fn context_line(payload: &ChunkPayload) -> Option<String> {
    match &payload.detail {
        PayloadDetail::CourtOpinion(detail) => {
            let mut parts = Vec::new();
            if let Some(kind) = &detail.opinion_type {
                parts.push(format!("{} opinion", kind.as_ref().replace('_', " ")));
            }
            if let Some(justice) = &detail.authoring_justice {
                parts.push(format!("by Justice {justice}"));
            }
            if let Some(section) = &detail.section_label {
                parts.push(format!("§ {section}"));
            }
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" · "))
            }
        }
        PayloadDetail::ExecutiveOrder(detail) => {
            let mut parts = Vec::new();
            if !detail.president.is_empty() {
                parts.push(format!("President {}", detail.president));
            }
            match &detail.section_title {
                Some(title) => {
                    let mut section = title.clone();
                    if let Some(label) = &detail.subsection_label {
                        section.push(' ');
                        section.push_str(label);
                    }
                    parts.push(section);
                }
                None => parts.push(format!("{} block", detail.chunk_type.as_ref())),
            }
            Some(parts.join(" · "))
        }
    }
}

fn metadata_lines(payload: &ChunkPayload) -> Vec<String> {
    let mut lines = Vec::new();
    match &payload.detail {
        PayloadDetail::CourtOpinion(detail) => {
            let enrichment = &detail.enrichment;
            if !enrichment.legal_topics.is_empty() {
                lines.push(format!("topics: {}", enrichment.legal_topics.join(", ")));
            }
            if !enrichment.constitution_cited.is_empty() {
                lines.push(format!(
                    "constitution cited: {}",
                    enrichment.constitution_cited.join("; ")
                ));
            }
            if !enrichment.statutes_cited.is_empty() {
                lines.push(format!(
                    "statutes cited: {}",
                    enrichment.statutes_cited.join("; ")
                ));
            }
            if !enrichment.vote_breakdown.is_empty() {
                lines.push(format!("vote: {}", enrichment.vote_breakdown));
            }
        }
        PayloadDetail::ExecutiveOrder(detail) => {
            let enrichment = &detail.enrichment;
            if !enrichment.policy_topics.is_empty() {
                lines.push(format!("topics: {}", enrichment.policy_topics.join(", ")));
            }
            if !enrichment.agencies_impacted.is_empty() {
                lines.push(format!(
                    "agencies: {}",
                    enrichment.agencies_impacted.join(", ")
                ));
            }
            if !enrichment.legal_authorities.is_empty() {
                lines.push(format!(
                    "authorities: {}",
                    enrichment.legal_authorities.join("; ")
                ));
            }
        }
    }
    lines
}

fn summary_of(payload: &ChunkPayload) -> String {
    match &payload.detail {
        PayloadDetail::CourtOpinion(detail) => detail.enrichment.summary.clone(),
        PayloadDetail::ExecutiveOrder(detail) => detail.enrichment.summary.clone(),
    }
}

/// The resource URI returning the complete document behind a hit.
fn resource_uri(payload: &ChunkPayload) -> String {
    match &payload.detail {
        PayloadDetail::CourtOpinion(_) => format!("opinion://{}", payload.document_id),
        PayloadDetail::ExecutiveOrder(_) => format!("order://{}", payload.document_id),
    }
}

fn full_document_hint(ranked: &[&ScoredChunk], opts: &ShapingOptions) -> Option<String> {
    if ranked.is_empty() || ranked.len() > opts.hint_max_hits {
        return None;
    }
    if !ranked.iter().all(|hit| hit.score >= opts.hint_score_threshold) {
        return None;
    }
    let mut uris: Vec<String> = ranked.iter().map(|hit| resource_uri(&hit.payload)).collect();
    uris.dedup();
    Some(format!(
        "For the complete documents, read: {}",
        uris.join(", ")
    ))
}

/// Truncate on a char boundary with a visible marker.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
