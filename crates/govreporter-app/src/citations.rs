//! Bluebook citation formatting for court-opinion cluster data.

use serde::{Deserialize, Serialize};

/// Numeric tag CourtListener uses for the official (primary) reporter.
const PRIMARY_CITATION_TYPE: i64 = 1;

/// One citation record as delivered by the cluster endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationRecord {
    #[serde(default)]
    pub volume: Option<serde_json::Value>,
    #[serde(default)]
    pub reporter: Option<String>,
    #[serde(default)]
    pub page: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<i64>,
}

impl CitationRecord {
    fn volume_str(&self) -> Option<String> {
        value_to_string(self.volume.as_ref())
    }

    fn page_str(&self) -> Option<String> {
        value_to_string(self.page.as_ref())
    }

    fn is_complete(&self) -> bool {
        self.volume_str().is_some() && self.reporter.is_some() && self.page_str().is_some()
    }
}

fn value_to_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a Bluebook-style citation such as `601 U.S. 416 (2024)`.
///
/// The citation tagged as primary wins; failing that, the first complete
/// U.S.-reporter citation; failing that, the first complete citation of any
/// reporter. Returns an empty string when no usable citation or year exists.
pub fn build_bluebook_citation(citations: &[CitationRecord], date: &str) -> String {
    let Some(year) = extract_year(date) else {
        return String::new();
    };

    let chosen = citations
        .iter()
        .find(|c| c.kind == Some(PRIMARY_CITATION_TYPE) && c.is_complete())
        .or_else(|| {
            citations
                .iter()
                .find(|c| c.reporter.as_deref() == Some("U.S.") && c.is_complete())
        })
        .or_else(|| citations.iter().find(|c| c.is_complete()));

    match chosen {
        Some(citation) => {
            let volume = citation.volume_str().expect("checked complete");
            let reporter = citation.reporter.as_deref().expect("checked complete");
            let page = citation.page_str().expect("checked complete");
            format!("{volume} {reporter} {page} ({year})")
        }
        None => String::new(),
    }
}

/// Pull a four-digit year from an ISO-8601 date or a bare year string.
pub fn extract_year(date: &str) -> Option<&str> {
    let candidate = date.split('-').next()?.trim();
    if candidate.len() == 4 && candidate.chars().all(|c| c.is_ascii_digit()) {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(volume: &str, reporter: &str, page: &str, kind: Option<i64>) -> CitationRecord {
        CitationRecord {
            volume: Some(serde_json::Value::String(volume.to_string())),
            reporter: Some(reporter.to_string()),
            page: Some(serde_json::Value::String(page.to_string())),
            kind,
        }
    }

    #[test]
    fn primary_citation_wins() {
        let citations = vec![
            citation("144", "S. Ct.", "100", Some(3)),
            citation("601", "U.S.", "416", Some(1)),
        ];
        assert_eq!(
            build_bluebook_citation(&citations, "2024-05-16"),
            "601 U.S. 416 (2024)"
        );
    }

    #[test]
    fn us_reporter_wins_without_primary() {
        let citations = vec![
            citation("144", "S. Ct.", "100", Some(3)),
            citation("601", "U.S.", "416", Some(2)),
        ];
        assert_eq!(
            build_bluebook_citation(&citations, "2024-05-16"),
            "601 U.S. 416 (2024)"
        );
    }

    #[test]
    fn first_complete_citation_is_the_last_resort() {
        let citations = vec![
            CitationRecord::default(),
            citation("144", "S. Ct.", "100", Some(3)),
        ];
        assert_eq!(
            build_bluebook_citation(&citations, "2024"),
            "144 S. Ct. 100 (2024)"
        );
    }

    #[test]
    fn missing_pieces_yield_empty_string() {
        assert_eq!(build_bluebook_citation(&[], "2024-05-16"), "");
        let incomplete = vec![CitationRecord {
            volume: Some(serde_json::Value::String("601".into())),
            reporter: None,
            page: Some(serde_json::Value::String("416".into())),
            kind: Some(1),
        }];
        assert_eq!(build_bluebook_citation(&incomplete, "2024-05-16"), "");
        let complete = vec![citation("601", "U.S.", "416", Some(1))];
        assert_eq!(build_bluebook_citation(&complete, "not a date"), "");
    }

    #[test]
    fn numeric_volume_and_page_are_accepted() {
        let citations = vec![CitationRecord {
            volume: Some(serde_json::json!(410)),
            reporter: Some("U.S.".to_string()),
            page: Some(serde_json::json!(113)),
            kind: Some(1),
        }];
        assert_eq!(
            build_bluebook_citation(&citations, "1973-01-22"),
            "410 U.S. 113 (1973)"
        );
    }

    #[test]
    fn year_extraction_handles_iso_and_bare_years() {
        assert_eq!(extract_year("2024-05-16"), Some("2024"));
        assert_eq!(extract_year("1973"), Some("1973"));
        assert_eq!(extract_year("16/05/2024"), None);
        assert_eq!(extract_year(""), None);
    }
}
