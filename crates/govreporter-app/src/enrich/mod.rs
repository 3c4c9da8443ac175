//! LLM-driven extraction of document-level metadata.
//!
//! One request per document against a JSON-mode chat model; the response is
//! schema-validated and citation fields are checked against the source text
//! so the record never carries a hallucinated reference. Extraction failure
//! is not a document failure: the document proceeds with an empty record.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetchers::{Document, DocumentKind};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_ATTEMPTS: u8 = 2;
const RETRY_SUFFIX: &str =
    "\n\nNOTE: the previous response was not valid JSON for the requested schema. Respond with valid JSON only.";

const OPINION_PROMPT: &str = "You are a legal analyst extracting metadata from a Supreme Court opinion. \
Respond with a JSON object containing exactly these fields: \
summary (1-2 sentence technical summary), \
legal_topics (array of 5-8 short topic strings), \
constitution_cited (array of constitutional citations exactly as they appear in the text), \
statutes_cited (array of U.S.C. statute citations exactly as they appear in the text), \
key_questions (array of the central legal questions), \
holding (the Court's holding in one sentence), \
vote_breakdown (e.g. \"6-3\", or an empty string if unknown). \
Copy citations verbatim from the text; never invent one.";

const ORDER_PROMPT: &str = "You are a policy analyst extracting metadata from a presidential Executive Order. \
Respond with a JSON object containing exactly these fields: \
summary (1-2 sentence policy summary), \
policy_topics (array of 5-8 short topic strings), \
agencies_impacted (array of agency names or codes exactly as they appear in the text), \
legal_authorities (array of U.S. Code or CFR citations exactly as they appear in the text), \
related_orders (array of prior executive order numbers referenced, revoked, or amended), \
economic_sectors (array of affected economic sectors). \
Copy citations and agency names verbatim from the text; never invent one.";

/// Document-level fields extracted for a Supreme Court opinion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpinionEnrichment {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub legal_topics: Vec<String>,
    #[serde(default)]
    pub constitution_cited: Vec<String>,
    #[serde(default)]
    pub statutes_cited: Vec<String>,
    #[serde(default)]
    pub key_questions: Vec<String>,
    #[serde(default)]
    pub holding: String,
    #[serde(default)]
    pub vote_breakdown: String,
}

/// Document-level fields extracted for an Executive Order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderEnrichment {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub policy_topics: Vec<String>,
    #[serde(default)]
    pub agencies_impacted: Vec<String>,
    #[serde(default)]
    pub legal_authorities: Vec<String>,
    #[serde(default)]
    pub related_orders: Vec<String>,
    #[serde(default)]
    pub economic_sectors: Vec<String>,
}

/// Enrichment output, one variant per document kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnrichmentRecord {
    Opinion(OpinionEnrichment),
    Order(OrderEnrichment),
}

impl EnrichmentRecord {
    pub fn empty_for(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::CourtOpinion => EnrichmentRecord::Opinion(OpinionEnrichment::default()),
            DocumentKind::ExecutiveOrder => EnrichmentRecord::Order(OrderEnrichment::default()),
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            EnrichmentRecord::Opinion(e) => &e.summary,
            EnrichmentRecord::Order(e) => &e.summary,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("missing OPENAI_API_KEY environment variable")]
    MissingApiKey,
    #[error("enrichment request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Capability the pipeline depends on; tests swap in fakes.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Produce the document-level enrichment record. Never fails the
    /// document: on persistent extraction errors the empty record is
    /// returned and a warning logged.
    async fn enrich(&self, document: &Document, syllabus: Option<&str>) -> EnrichmentRecord;
}

/// OpenAI chat-completions backed enricher (JSON response mode).
#[derive(Clone)]
pub struct OpenAiEnricher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEnricher {
    pub fn new(api_key: impl Into<String>) -> Result<Self, EnrichError> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, EnrichError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EnrichError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("govreporter/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    async fn request_json(&self, system: &str, user: &str) -> Result<serde_json::Value, EnrichError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.2,
        });
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(EnrichError::EmptyResponse)?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn extract(
        &self,
        kind: DocumentKind,
        system: &str,
        user: &str,
    ) -> Result<EnrichmentRecord, EnrichError> {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            let prompt = if attempt == 0 {
                user.to_string()
            } else {
                format!("{user}{RETRY_SUFFIX}")
            };
            match self.request_json(system, &prompt).await {
                Ok(value) => {
                    let record = match kind {
                        DocumentKind::CourtOpinion => serde_json::from_value::<OpinionEnrichment>(
                            value,
                        )
                        .map(EnrichmentRecord::Opinion),
                        DocumentKind::ExecutiveOrder => serde_json::from_value::<OrderEnrichment>(
                            value,
                        )
                        .map(EnrichmentRecord::Order),
                    };
                    match record {
                        Ok(record) => return Ok(record),
                        Err(err) => last_error = Some(EnrichError::InvalidJson(err)),
                    }
                }
                Err(err) => last_error = Some(err),
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(last_error.unwrap_or(EnrichError::EmptyResponse))
    }
}

#[async_trait]
impl Enricher for OpenAiEnricher {
    async fn enrich(&self, document: &Document, syllabus: Option<&str>) -> EnrichmentRecord {
        let (system, user) = match document.kind {
            DocumentKind::CourtOpinion => {
                let user = match syllabus {
                    // The Syllabus is the Court's official summary; the
                    // model is told to take the holding from it.
                    Some(syllabus) => format!(
                        "SYLLABUS (authoritative; use for the holding):\n{syllabus}\n\nFULL OPINION:\n{}",
                        document.text
                    ),
                    None => document.text.clone(),
                };
                (OPINION_PROMPT, user)
            }
            DocumentKind::ExecutiveOrder => (ORDER_PROMPT, document.text.clone()),
        };

        match self.extract(document.kind, system, &user).await {
            Ok(record) => {
                let validated = validate_record(record, &document.text);
                debug!(doc_id = %document.id, "enrichment extracted");
                validated
            }
            Err(err) => {
                warn!(
                    doc_id = %document.id,
                    error = %err,
                    "metadata extraction failed; continuing with empty record"
                );
                EnrichmentRecord::empty_for(document.kind)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Drop citation-like fields that cannot be found in the source text.
pub fn validate_record(record: EnrichmentRecord, source_text: &str) -> EnrichmentRecord {
    let haystack = squash_whitespace(source_text);
    match record {
        EnrichmentRecord::Opinion(mut e) => {
            e.constitution_cited = retain_present(e.constitution_cited, &haystack, "constitution_cited");
            e.statutes_cited = retain_present(e.statutes_cited, &haystack, "statutes_cited");
            EnrichmentRecord::Opinion(e)
        }
        EnrichmentRecord::Order(mut e) => {
            e.agencies_impacted = retain_present(e.agencies_impacted, &haystack, "agencies_impacted");
            e.legal_authorities = retain_present(e.legal_authorities, &haystack, "legal_authorities");
            EnrichmentRecord::Order(e)
        }
    }
}

fn retain_present(items: Vec<String>, haystack: &str, field: &'static str) -> Vec<String> {
    items
        .into_iter()
        .filter(|item| {
            let needle = squash_whitespace(item);
            let present = !needle.is_empty() && haystack.contains(&needle);
            if !present {
                warn!(field, value = %item, "dropping extracted value not present in source text");
            }
            present
        })
        .collect()
}

fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_drops_absent_citations() {
        let source = "The Appropriations Clause, U.S. Const. art. I, § 9, cl. 7, controls. \
                      See also 12 U.S.C. § 5497.";
        let record = EnrichmentRecord::Opinion(OpinionEnrichment {
            constitution_cited: vec![
                "U.S. Const. art. I, § 9, cl. 7".to_string(),
                "U.S. Const. amend. XIV".to_string(),
            ],
            statutes_cited: vec!["12 U.S.C. § 5497".to_string(), "42 U.S.C. § 1983".to_string()],
            ..OpinionEnrichment::default()
        });
        let EnrichmentRecord::Opinion(validated) = validate_record(record, source) else {
            panic!("kind changed");
        };
        assert_eq!(validated.constitution_cited, vec!["U.S. Const. art. I, § 9, cl. 7"]);
        assert_eq!(validated.statutes_cited, vec!["12 U.S.C. § 5497"]);
    }

    #[test]
    fn validation_normalizes_whitespace_before_matching() {
        let source = "Authority:  12  U.S.C.\n§ 5497 governs the Bureau.";
        let record = EnrichmentRecord::Order(OrderEnrichment {
            legal_authorities: vec!["12 U.S.C. § 5497".to_string()],
            ..OrderEnrichment::default()
        });
        let EnrichmentRecord::Order(validated) = validate_record(record, source) else {
            panic!("kind changed");
        };
        assert_eq!(validated.legal_authorities, vec!["12 U.S.C. § 5497"]);
    }

    #[test]
    fn empty_record_matches_kind() {
        assert!(matches!(
            EnrichmentRecord::empty_for(DocumentKind::CourtOpinion),
            EnrichmentRecord::Opinion(_)
        ));
        assert!(matches!(
            EnrichmentRecord::empty_for(DocumentKind::ExecutiveOrder),
            EnrichmentRecord::Order(_)
        ));
    }

    #[test]
    fn enrichment_serializes_with_defaults() {
        let parsed: OpinionEnrichment =
            serde_json::from_str(r#"{"summary": "s", "holding": "h"}"#).expect("parse");
        assert_eq!(parsed.summary, "s");
        assert!(parsed.legal_topics.is_empty());
    }
}
