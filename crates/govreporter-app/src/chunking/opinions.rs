//! Section-aware chunking for Supreme Court opinions.
//!
//! An opinion is partitioned by opinion-type markers (Syllabus, majority,
//! concurrences, dissents, mixed) and, within each span, by inline Roman
//! numeral / capital letter subsection markers. Every span is chunked
//! independently so overlap never crosses a structural boundary.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::{chunk_with_config, ChunkingConfig};

/// Kind of opinion a chunk was taken from.
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
pub enum OpinionType {
    Syllabus,
    Majority,
    Concurring,
    Dissenting,
    ConcurringInPartAndDissentingInPart,
}

/// One chunk of a Supreme Court opinion with its structural labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpinionChunk {
    pub text: String,
    pub token_count: usize,
    pub chunk_index: u32,
    pub opinion_type: Option<OpinionType>,
    pub authoring_justice: Option<String>,
    pub section_label: Option<String>,
}

static SYLLABUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSyllabus\b").expect("static pattern"));
static MAJORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Justice\s+(\w+)\s+delivered\s+the\s+opinion\s+of\s+the\s+Court\.?|(?i)Per\s+Curiam\.?")
        .expect("static pattern")
});
static CONCURRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Justice\s+(\w+),\s+(?:with\s+whom[\s\S]{0,200}?joins?,\s+)?concurring")
        .expect("static pattern")
});
static DISSENTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Justice\s+(\w+),\s+(?:with\s+whom[\s\S]{0,200}?joins?,\s+)?dissenting")
        .expect("static pattern")
});
static CONCUR_DISSENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Justice\s+(\w+),\s+(?:with\s+whom[\s\S]{0,200}?joins?,\s+)?concurring\s+in\s+part\s+and\s+dissenting\s+in\s+part",
    )
    .expect("static pattern")
});
static SUBSECTION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([IVX]+|[A-Z])\s+").expect("static pattern"));

#[derive(Debug)]
struct SectionMarker {
    opinion_type: OpinionType,
    start: usize,
    justice: Option<String>,
}

/// Chunk a Supreme Court opinion, returning the chunks plus the Syllabus
/// body (used by the metadata enricher) when one was detected.
///
/// Malformed input is never fatal: when no markers are found the whole text
/// is chunked as a single unlabeled span, and empty input yields no chunks.
pub fn chunk_opinion(text: &str, cfg: &ChunkingConfig) -> (Vec<OpinionChunk>, Option<String>) {
    let markers = detect_sections(text);

    if markers.is_empty() {
        tracing::warn!("no section markers found in Supreme Court opinion");
        let chunks = chunk_with_config(text, cfg)
            .into_iter()
            .enumerate()
            .map(|(i, window)| OpinionChunk {
                text: window.text,
                token_count: window.token_count,
                chunk_index: i as u32,
                opinion_type: None,
                authoring_justice: None,
                section_label: None,
            })
            .collect();
        return (chunks, None);
    }

    let mut chunks = Vec::new();
    let mut syllabus_text = None;
    let mut chunk_index = 0u32;

    for (i, marker) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|next| next.start)
            .unwrap_or(text.len());
        let section_text = text[marker.start..end].trim();
        if section_text.is_empty() {
            continue;
        }

        if marker.opinion_type == OpinionType::Syllabus {
            // The body after the heading line is what the enricher wants.
            let body = section_text
                .split_once('\n')
                .map(|(_, rest)| rest.trim())
                .unwrap_or("");
            if !body.is_empty() {
                syllabus_text = Some(body.to_string());
            }
        }

        for (span_text, label) in split_subsections(section_text) {
            for window in chunk_with_config(span_text, cfg) {
                chunks.push(OpinionChunk {
                    text: window.text,
                    token_count: window.token_count,
                    chunk_index,
                    opinion_type: Some(marker.opinion_type),
                    authoring_justice: marker.justice.clone(),
                    section_label: label.clone(),
                });
                chunk_index += 1;
            }
        }
    }

    tracing::debug!(
        chunks = chunks.len(),
        sections = markers.len(),
        "chunked Supreme Court opinion"
    );
    (chunks, syllabus_text)
}

/// Locate opinion-type markers in document order.
///
/// The `regex` crate has no lookahead, so the exclusions are applied by
/// inspecting the text right after each match: a "concurring" hit followed
/// by "in part and dissenting" and a "dissenting" hit followed by
/// "in part" belong to the mixed form and are suppressed in favor of the
/// dedicated marker.
fn detect_sections(text: &str) -> Vec<SectionMarker> {
    let mut markers = Vec::new();

    if let Some(m) = SYLLABUS.find(text) {
        markers.push(SectionMarker {
            opinion_type: OpinionType::Syllabus,
            start: m.start(),
            justice: None,
        });
    }

    if let Some(caps) = MAJORITY.captures(text) {
        let whole = caps.get(0).expect("match exists");
        markers.push(SectionMarker {
            opinion_type: OpinionType::Majority,
            start: whole.start(),
            justice: caps.get(1).map(|j| j.as_str().to_string()),
        });
    }

    for caps in CONCURRING.captures_iter(text) {
        let whole = caps.get(0).expect("match exists");
        if continues_with(text, whole.end(), &["in", "part", "and", "dissenting"]) {
            continue;
        }
        markers.push(SectionMarker {
            opinion_type: OpinionType::Concurring,
            start: whole.start(),
            justice: caps.get(1).map(|j| j.as_str().to_string()),
        });
    }

    for caps in DISSENTING.captures_iter(text) {
        let whole = caps.get(0).expect("match exists");
        if continues_with(text, whole.end(), &["in", "part"]) {
            continue;
        }
        markers.push(SectionMarker {
            opinion_type: OpinionType::Dissenting,
            start: whole.start(),
            justice: caps.get(1).map(|j| j.as_str().to_string()),
        });
    }

    for caps in CONCUR_DISSENT.captures_iter(text) {
        let whole = caps.get(0).expect("match exists");
        markers.push(SectionMarker {
            opinion_type: OpinionType::ConcurringInPartAndDissentingInPart,
            start: whole.start(),
            justice: caps.get(1).map(|j| j.as_str().to_string()),
        });
    }

    markers.sort_by_key(|m| m.start);
    markers
}

/// True when the text at `pos` continues with the given lowercase words.
fn continues_with(text: &str, pos: usize, words: &[&str]) -> bool {
    let mut rest = text[pos..].split_whitespace();
    words.iter().all(|expected| {
        rest.next().is_some_and(|actual| {
            actual
                .trim_matches(|c: char| !c.is_alphanumeric())
                .eq_ignore_ascii_case(expected)
        })
    })
}

/// Split an opinion span at inline Roman numeral / capital letter markers.
///
/// Returns `(span_text, section_label)` pairs; the label tracks hierarchy,
/// so a capital letter under Roman numeral II becomes "II.A". A span with
/// fewer than two markers is returned whole and unlabeled.
fn split_subsections(section_text: &str) -> Vec<(&str, Option<String>)> {
    let matches: Vec<(usize, usize, String)> = SUBSECTION_MARKER
        .captures_iter(section_text)
        .filter_map(|caps| {
            let whole = caps.get(0).expect("match exists");
            let label = caps.get(1).expect("group exists");
            // Markers introduce a heading, so the following text starts
            // with an uppercase letter.
            let next = section_text[whole.end()..].chars().next()?;
            if !next.is_uppercase() {
                return None;
            }
            Some((whole.start(), whole.end(), label.as_str().to_string()))
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

    let mut current_roman: Option<String> = None;
    for (i, (start, _, marker)) in matches.iter().enumerate() {
        let end = matches.get(i + 1).map(|m| m.0).unwrap_or(section_text.len());
        let span = section_text[*start..end].trim();
        if span.is_empty() {
            continue;
        }
        let label = if is_roman(marker) {
            current_roman = Some(marker.clone());
            marker.clone()
        } else {
            match &current_roman {
                Some(roman) => format!("{roman}.{marker}"),
                None => marker.clone(),
            }
        };
        spans.push((span, Some(label)));
    }
    spans
}

fn is_roman(marker: &str) -> bool {
    !marker.is_empty() && marker.chars().all(|c| matches!(c, 'I' | 'V' | 'X'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkingConfig {
        ChunkingConfig::new(10, 40, 80, 0.1).expect("valid config")
    }

    fn filler(prefix: &str, sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("{prefix} point {i} addresses the statutory question."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn syllabus_and_majority_are_detected_and_attributed() {
        let text = format!(
            "Syllabus\n\nThe Court holds that the funding scheme is valid. {}\n\nJustice Roberts delivered the opinion of the Court. {}",
            filler("Syllabus", 8),
            filler("Majority", 8),
        );
        let (chunks, syllabus) = chunk_opinion(&text, &cfg());
        assert!(chunks.len() >= 2);
        assert!(syllabus.is_some());
        assert!(chunks
            .iter()
            .any(|c| c.opinion_type == Some(OpinionType::Syllabus)));
        let majority: Vec<_> = chunks
            .iter()
            .filter(|c| c.opinion_type == Some(OpinionType::Majority))
            .collect();
        assert!(!majority.is_empty());
        for chunk in majority {
            assert_eq!(chunk.authoring_justice.as_deref(), Some("Roberts"));
        }
    }

    #[test]
    fn per_curiam_counts_as_majority_without_justice() {
        let text = format!("Per Curiam. {}", filler("Court", 8));
        let (chunks, _) = chunk_opinion(&text, &cfg());
        assert!(chunks
            .iter()
            .all(|c| c.opinion_type == Some(OpinionType::Majority)));
        assert!(chunks.iter().all(|c| c.authoring_justice.is_none()));
    }

    #[test]
    fn mixed_opinion_is_neither_concurring_nor_dissenting() {
        let text = format!(
            "Justice Thomas, concurring in part and dissenting in part. {}",
            filler("Mixed", 10),
        );
        let (chunks, _) = chunk_opinion(&text, &cfg());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(
                chunk.opinion_type,
                Some(OpinionType::ConcurringInPartAndDissentingInPart)
            );
            assert_eq!(chunk.authoring_justice.as_deref(), Some("Thomas"));
        }
    }

    #[test]
    fn plain_concurrence_and_dissent_are_split_and_attributed() {
        let text = format!(
            "Justice Kagan, concurring. {}\n\nJustice Alito, with whom Justice Gorsuch joins, dissenting. {}",
            filler("Concurrence", 8),
            filler("Dissent", 8),
        );
        let (chunks, _) = chunk_opinion(&text, &cfg());
        let concurring: Vec<_> = chunks
            .iter()
            .filter(|c| c.opinion_type == Some(OpinionType::Concurring))
            .collect();
        let dissenting: Vec<_> = chunks
            .iter()
            .filter(|c| c.opinion_type == Some(OpinionType::Dissenting))
            .collect();
        assert!(!concurring.is_empty());
        assert!(!dissenting.is_empty());
        assert_eq!(concurring[0].authoring_justice.as_deref(), Some("Kagan"));
        assert_eq!(dissenting[0].authoring_justice.as_deref(), Some("Alito"));
    }

    #[test]
    fn unmarked_text_becomes_one_unlabeled_span() {
        let text = filler("Plain", 6);
        let (chunks, syllabus) = chunk_opinion(&text, &cfg());
        assert!(syllabus.is_none());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.opinion_type.is_none());
            assert!(chunk.section_label.is_none());
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let (chunks, syllabus) = chunk_opinion("", &cfg());
        assert!(chunks.is_empty());
        assert!(syllabus.is_none());
    }

    #[test]
    fn chunk_indices_are_monotone_across_sections() {
        let text = format!(
            "Syllabus\n\n{}\n\nJustice Roberts delivered the opinion of the Court. {}",
            filler("Syllabus", 10),
            filler("Majority", 10),
        );
        let (chunks, _) = chunk_opinion(&text, &cfg());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
        }
    }

    #[test]
    fn roman_and_letter_markers_build_hierarchical_labels() {
        let spans = split_subsections(
            "Justice Roberts delivered the opinion of the Court. Intro text here. \
             II Under the statute the agency acted. More analysis follows here. \
             A The first reason is textual. Further sentences of analysis. \
             B The second reason is structural. Even more analysis text.",
        );
        let labels: Vec<_> = spans.iter().filter_map(|(_, l)| l.clone()).collect();
        assert_eq!(labels, vec!["II", "II.A", "II.B"]);
    }

    #[test]
    fn subsection_markers_require_following_uppercase() {
        let spans = split_subsections("The court ruled. I agree with this. it follows.");
        assert_eq!(spans.len(), 1);
        assert!(spans[0].1.is_none());
    }

    #[test]
    fn opinion_type_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&OpinionType::ConcurringInPartAndDissentingInPart)
                .expect("serializable"),
            "\"concurring_in_part_and_dissenting_in_part\""
        );
        assert_eq!(
            serde_json::to_string(&OpinionType::Majority).expect("serializable"),
            "\"majority\""
        );
    }
}
