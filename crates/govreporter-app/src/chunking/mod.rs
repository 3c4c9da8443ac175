//! Token-budgeted, structure-aware chunking for government documents.
//!
//! The shared sliding-window primitive lives here; the per-document-type
//! chunkers ([`opinions`], [`orders`]) detect structural sections and feed
//! each section through the window independently, so overlap never crosses
//! a structural boundary.

pub mod opinions;
pub mod orders;

use std::env;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiktoken_rs::CoreBPE;

pub use opinions::{chunk_opinion, OpinionChunk, OpinionType};
pub use orders::{chunk_order, OrderChunk, OrderChunkKind};

/// Rough fallback ratio when the BPE vocabulary cannot be loaded.
const CHARS_PER_TOKEN: usize = 4;

static ENCODER: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(err) => {
        tracing::warn!(error = %err, "failed to load cl100k_base vocabulary; falling back to character approximation");
        None
    }
});

/// Count tokens the way the embedding model will, so stored counts predict
/// embedding-side truncation.
pub fn count_tokens(text: &str) -> usize {
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len() / CHARS_PER_TOKEN,
    }
}

#[derive(Debug, Error)]
pub enum ChunkingConfigError {
    #[error("token counts must be positive")]
    NonPositiveTokens,
    #[error("min_tokens ({min}) must not exceed target_tokens ({target})")]
    MinAboveTarget { min: usize, target: usize },
    #[error("target_tokens ({target}) must not exceed max_tokens ({max})")]
    TargetAboveMax { target: usize, max: usize },
    #[error("overlap_ratio must be in [0, 1), got {0}")]
    OverlapOutOfRange(f64),
    #[error("invalid value for {var}: {value}")]
    InvalidOverride { var: String, value: String },
}

/// Per-document-type chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub min_tokens: usize,
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub overlap_ratio: f64,
}

impl ChunkingConfig {
    pub fn new(
        min_tokens: usize,
        target_tokens: usize,
        max_tokens: usize,
        overlap_ratio: f64,
    ) -> Result<Self, ChunkingConfigError> {
        let cfg = Self {
            min_tokens,
            target_tokens,
            max_tokens,
            overlap_ratio,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ChunkingConfigError> {
        if self.min_tokens == 0 || self.target_tokens == 0 || self.max_tokens == 0 {
            return Err(ChunkingConfigError::NonPositiveTokens);
        }
        if self.min_tokens > self.target_tokens {
            return Err(ChunkingConfigError::MinAboveTarget {
                min: self.min_tokens,
                target: self.target_tokens,
            });
        }
        if self.target_tokens > self.max_tokens {
            return Err(ChunkingConfigError::TargetAboveMax {
                target: self.target_tokens,
                max: self.max_tokens,
            });
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(ChunkingConfigError::OverlapOutOfRange(self.overlap_ratio));
        }
        Ok(())
    }

    /// Defaults for Supreme Court opinions, overridable via `RAG_OPINION_*`.
    pub fn opinion_defaults() -> Self {
        Self {
            min_tokens: 500,
            target_tokens: 600,
            max_tokens: 800,
            overlap_ratio: 0.15,
        }
    }

    /// Defaults for Executive Orders, overridable via `RAG_ORDER_*`.
    pub fn order_defaults() -> Self {
        Self {
            min_tokens: 240,
            target_tokens: 340,
            max_tokens: 400,
            overlap_ratio: 0.10,
        }
    }

    /// Apply `{prefix}_MIN_TOKENS`, `{prefix}_TARGET_TOKENS`,
    /// `{prefix}_MAX_TOKENS`, and `{prefix}_OVERLAP_RATIO` env overrides.
    pub fn with_env_overrides(mut self, prefix: &str) -> Result<Self, ChunkingConfigError> {
        self.min_tokens = read_override(prefix, "MIN_TOKENS", self.min_tokens)?;
        self.target_tokens = read_override(prefix, "TARGET_TOKENS", self.target_tokens)?;
        self.max_tokens = read_override(prefix, "MAX_TOKENS", self.max_tokens)?;
        if let Some(raw) = env_value(prefix, "OVERLAP_RATIO") {
            self.overlap_ratio =
                raw.parse::<f64>()
                    .map_err(|_| ChunkingConfigError::InvalidOverride {
                        var: format!("{prefix}_OVERLAP_RATIO"),
                        value: raw,
                    })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Tokens copied from the tail of one chunk to the head of the next,
    /// clamped so the window always makes forward progress.
    pub fn overlap_tokens(&self) -> usize {
        let raw = (self.target_tokens as f64 * self.overlap_ratio).round() as usize;
        raw.min(self.target_tokens.saturating_sub(1))
    }
}

fn env_value(prefix: &str, suffix: &str) -> Option<String> {
    env::var(format!("{prefix}_{suffix}")).ok()
}

fn read_override(
    prefix: &str,
    suffix: &str,
    default: usize,
) -> Result<usize, ChunkingConfigError> {
    match env_value(prefix, suffix) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ChunkingConfigError::InvalidOverride {
                var: format!("{prefix}_{suffix}"),
                value: raw,
            }),
        None => Ok(default),
    }
}

/// Normalize whitespace while preserving paragraph structure: trim the ends
/// and collapse runs of blank lines into a single paragraph break.
pub fn normalize_whitespace(text: &str) -> String {
    static BLANK_RUN: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"\n\s*\n+").expect("static pattern"));
    BLANK_RUN.replace_all(text.trim(), "\n\n").into_owned()
}

/// One window emitted by the sliding chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowChunk {
    pub text: String,
    pub token_count: usize,
}

/// Smallest unit the window works with: a sentence, or a whitespace-bounded
/// slice of an oversized sentence.
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    tokens: usize,
    starts_paragraph: bool,
}

/// Sliding-window chunker over one structural section.
///
/// Paragraphs are accumulated greedily; a chunk is emitted once it reaches
/// `target_tokens` or when the next unit would overshoot `max_tokens`. Each
/// new chunk starts with an overlap tail of the previous one, taken on a
/// sentence boundary. A final chunk below `min_tokens` is merged back into
/// its predecessor when the merged size stays within `max_tokens`.
pub fn chunk_with_config(text: &str, cfg: &ChunkingConfig) -> Vec<WindowChunk> {
    let text = normalize_whitespace(text);
    if text.is_empty() {
        return Vec::new();
    }

    let total = count_tokens(&text);
    if total <= cfg.target_tokens.max(cfg.min_tokens) {
        return vec![WindowChunk {
            text,
            token_count: total,
        }];
    }

    let units = split_units(&text, cfg.max_tokens);
    if units.is_empty() {
        return Vec::new();
    }

    let overlap = cfg.overlap_tokens();
    // Chunks as index ranges into `units`; rendered at the end.
    let mut emitted: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;
    // The overlap tail seeded into `current` is not fresh content; a chunk
    // is only emitted once it carries at least one unit of its own.
    let mut fresh = false;

    for (idx, unit) in units.iter().enumerate() {
        let sep = usize::from(!current.is_empty());
        if !current.is_empty() && current_tokens + sep + unit.tokens > cfg.max_tokens {
            emitted.push(std::mem::take(&mut current));
            let mut tail = overlap_tail(&units, emitted.last().expect("just pushed"), overlap);
            let mut tail_tokens: usize = tail.iter().map(|&i| units[i].tokens + 1).sum();
            // A tail that would immediately re-overflow defeats its purpose.
            if tail_tokens + 1 + unit.tokens > cfg.max_tokens {
                tail.clear();
                tail_tokens = 0;
            }
            current_tokens = tail_tokens;
            current = tail;
            fresh = false;
        }

        let sep = usize::from(!current.is_empty());
        current_tokens += sep + unit.tokens;
        current.push(idx);
        fresh = true;

        if current_tokens >= cfg.target_tokens && idx + 1 < units.len() {
            emitted.push(std::mem::take(&mut current));
            let tail = overlap_tail(&units, emitted.last().expect("just pushed"), overlap);
            current_tokens = tail.iter().map(|&i| units[i].tokens + 1).sum();
            current = tail;
            fresh = false;
        }
    }

    if fresh && !current.is_empty() {
        let tail_tokens: usize = current.iter().map(|&i| units[i].tokens).sum();
        let merged = merge_short_tail(&units, &mut emitted, &current, tail_tokens, cfg);
        if !merged {
            emitted.push(current);
        }
    }

    emitted
        .into_iter()
        .map(|indices| render_chunk(&units, &indices))
        .collect()
}

/// Trailing units of the previous chunk forming the overlap seed.
///
/// Units are taken from the tail while they fit the overlap budget; a single
/// unit wider than twice the budget is skipped entirely, which keeps the
/// realized overlap within one sentence boundary of the requested size.
fn overlap_tail(units: &[Unit], previous: &[usize], overlap: usize) -> Vec<usize> {
    if overlap == 0 {
        return Vec::new();
    }
    let mut tail: Vec<usize> = Vec::new();
    let mut total = 0usize;
    for &idx in previous.iter().rev() {
        let tokens = units[idx].tokens;
        if total + tokens <= overlap || (total == 0 && tokens < overlap * 2) {
            tail.push(idx);
            total += tokens;
            if total >= overlap {
                break;
            }
        } else {
            break;
        }
    }
    tail.reverse();
    tail
}

/// Fold a below-minimum final chunk into its predecessor when the combined
/// size stays within the hard limit. Returns true when the merge happened.
fn merge_short_tail(
    units: &[Unit],
    emitted: &mut [Vec<usize>],
    current: &[usize],
    current_tokens: usize,
    cfg: &ChunkingConfig,
) -> bool {
    if current_tokens >= cfg.min_tokens {
        return false;
    }
    let Some(last) = emitted.last_mut() else {
        return false;
    };
    // Units already present in the predecessor (the overlap seed) must not
    // be duplicated by the merge.
    let fresh: Vec<usize> = current
        .iter()
        .copied()
        .filter(|idx| !last.contains(idx))
        .collect();
    let last_tokens: usize = last.iter().map(|&i| units[i].tokens + 1).sum();
    let fresh_tokens: usize = fresh.iter().map(|&i| units[i].tokens + 1).sum();
    if last_tokens + fresh_tokens > cfg.max_tokens {
        return false;
    }
    last.extend(fresh);
    true
}

fn render_chunk(units: &[Unit], indices: &[usize]) -> WindowChunk {
    let mut text = String::new();
    for (pos, &idx) in indices.iter().enumerate() {
        let unit = &units[idx];
        if pos > 0 {
            text.push_str(if unit.starts_paragraph { "\n\n" } else { " " });
        }
        text.push_str(&unit.text);
    }
    let token_count = count_tokens(&text);
    WindowChunk { text, token_count }
}

/// Break the section into sentence-level units, hard-splitting any sentence
/// that alone exceeds the token ceiling at whitespace boundaries.
fn split_units(text: &str, max_tokens: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let mut first_in_paragraph = true;
        for sentence in split_sentences(paragraph) {
            if count_tokens(&sentence) > max_tokens {
                for piece in split_whitespace_budget(&sentence, max_tokens) {
                    units.push(Unit {
                        tokens: count_tokens(&piece),
                        text: piece,
                        starts_paragraph: first_in_paragraph,
                    });
                    first_in_paragraph = false;
                }
            } else {
                units.push(Unit {
                    tokens: count_tokens(&sentence),
                    text: sentence,
                    starts_paragraph: first_in_paragraph,
                });
                first_in_paragraph = false;
            }
        }
    }
    units
}

/// Split on sentence-final punctuation followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '?' | '!') {
            if let Some(next) = chars.peek() {
                if next.is_whitespace() {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        sentences.push(trimmed.to_string());
                    }
                    current.clear();
                    chars.next();
                }
            }
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Greedy whitespace split keeping every piece within the token budget.
fn split_whitespace_budget(sentence: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if !current.is_empty() && count_tokens(&candidate) > max_tokens {
            pieces.push(std::mem::take(&mut current));
            current = word.to_string();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
