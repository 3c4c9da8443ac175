//! Section-aware chunking for Executive Orders.
//!
//! Orders are partitioned into a header (title + preamble through the
//! "it is hereby ordered" clause), numbered `Sec. N.` sections with lettered
//! or numbered subsections, and a tail (signature and filing blocks). Each
//! block is chunked independently; overlap never crosses a section boundary.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::{chunk_with_config, ChunkingConfig};

/// Structural block an order chunk belongs to.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderChunkKind {
    Header,
    Section,
    Tail,
}

/// One chunk of an Executive Order with its structural labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderChunk {
    pub text: String,
    pub token_count: usize,
    pub chunk_index: u32,
    pub chunk_type: OrderChunkKind,
    pub section_title: Option<String>,
    pub subsection_label: Option<String>,
}

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*Sec(?:tion)?\.?\s*(\d+[A-Za-z-]*)\.").expect("static pattern")
});
static SECTION_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*Sec(?:tion)?\.?\s*\d+[A-Za-z-]*\.\s*([^.\n]+)\.").expect("static pattern")
});
static SUBSECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\(([a-z]|\d+)\)\s*").expect("static pattern"));
static TAIL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:THE WHITE HOUSE,?|\[FR Doc\.|Filed \d)").expect("static pattern")
});

/// Chunk an Executive Order.
///
/// Malformed input is never fatal: with no recognizable section headers the
/// whole document becomes one unlabeled span, and empty input yields an
/// empty chunk list.
pub fn chunk_order(text: &str, cfg: &ChunkingConfig) -> Vec<OrderChunk> {
    let mut out = Vec::new();
    let mut chunk_index = 0u32;

    let section_starts: Vec<(usize, String)> = SECTION_HEADER
        .captures_iter(text)
        .map(|caps| {
            let whole = caps.get(0).expect("match exists");
            let number = caps.get(1).expect("group exists");
            (whole.start(), number.as_str().to_string())
        })
        .collect();

    if section_starts.is_empty() {
        tracing::warn!("no section markers found in Executive Order");
        for window in chunk_with_config(text, cfg) {
            out.push(OrderChunk {
                text: window.text,
                token_count: window.token_count,
                chunk_index,
                chunk_type: OrderChunkKind::Section,
                section_title: None,
                subsection_label: None,
            });
            chunk_index += 1;
        }
        return out;
    }

    // Header: title and preamble up to the first section.
    let header_text = text[..section_starts[0].0].trim();
    if !header_text.is_empty() {
        for window in chunk_with_config(header_text, cfg) {
            out.push(OrderChunk {
                text: window.text,
                token_count: window.token_count,
                chunk_index,
                chunk_type: OrderChunkKind::Header,
                section_title: None,
                subsection_label: None,
            });
            chunk_index += 1;
        }
    }

    for (i, (start, number)) in section_starts.iter().enumerate() {
        let end = section_starts
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(text.len());
        let mut section_text = text[*start..end].trim();
        let mut tail_text = None;

        // The signature/filing block rides inside the last section's span.
        if i + 1 == section_starts.len() {
            if let Some(m) = TAIL_MARKER.find(section_text) {
                tail_text = Some(section_text[m.start()..].trim());
                section_text = section_text[..m.start()].trim();
            }
        }

        let section_title = section_title_for(section_text, number);

        if section_text.is_empty() {
            tracing::debug!(section = %number, "empty section body");
        } else {
            for (span, subsection_label) in split_subsections(section_text) {
                for window in chunk_with_config(span, cfg) {
                    out.push(OrderChunk {
                        text: window.text,
                        token_count: window.token_count,
                        chunk_index,
                        chunk_type: OrderChunkKind::Section,
                        section_title: Some(section_title.clone()),
                        subsection_label: subsection_label.clone(),
                    });
                    chunk_index += 1;
                }
            }
        }

        if let Some(tail) = tail_text {
            if !tail.is_empty() {
                for window in chunk_with_config(tail, cfg) {
                    out.push(OrderChunk {
                        text: window.text,
                        token_count: window.token_count,
                        chunk_index,
                        chunk_type: OrderChunkKind::Tail,
                        section_title: None,
                        subsection_label: None,
                    });
                    chunk_index += 1;
                }
            }
        }
    }

    tracing::debug!(chunks = out.len(), "chunked Executive Order");
    out
}

/// Canonical section title, e.g. `Sec. 1. Purpose.` when a title follows
/// the number, otherwise `Sec. 1.`.
fn section_title_for(section_text: &str, number: &str) -> String {
    match SECTION_TITLE.captures(section_text) {
        Some(caps) => {
            let title = caps.get(1).expect("group exists").as_str().trim();
            format!("Sec. {number}. {title}.")
        }
        None => format!("Sec. {number}."),
    }
}

/// Split a section at lettered/numbered subsection markers. A section with
/// fewer than two markers stays whole.
fn split_subsections(section_text: &str) -> Vec<(&str, Option<String>)> {
    let matches: Vec<(usize, String)> = SUBSECTION
        .captures_iter(section_text)
        .map(|caps| {
            let whole = caps.get(0).expect("match exists");
            let label = caps.get(1).expect("group exists");
            (whole.start(), label.as_str().to_string())
        })
        .collect();

    if matches.len() < 2 {
        return vec![(section_text, None)];
    }

    let mut spans = Vec::new();
    if matches[0].0 > 0 {
        let head = section_text[..matches[0].0].trim();
        if !head.is_empty() {
            spans.push((head, None));
        }
    }
    for (i, (start, label)) in matches.iter().enumerate() {
        let end = matches.get(i + 1).map(|m| m.0).unwrap_or(section_text.len());
        let span = section_text[*start..end].trim();
        if !span.is_empty() {
            spans.push((span, Some(format!("({label})"))));
        }
    }
    spans
}
