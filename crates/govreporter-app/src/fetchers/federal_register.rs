//! Federal Register client for presidential Executive Orders.
//!
//! Discovery pages the documents endpoint filtered to executive orders in a
//! signing-date range; fetching reads the order's metadata record and then
//! the raw-text URL it references for the body.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{
    DiscoveredDocument, Document, DocumentFetcher, DocumentKind, FetchError, SourceMetadata,
};
use crate::chunking::normalize_whitespace;

pub const DEFAULT_FEDERAL_REGISTER_URL: &str = "https://www.federalregister.gov/api/v1/";

const SOURCE_SLUG: &str = "federal_register";
/// Just over one second keeps the client under the documented 60 req/min.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1100);
const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 1000;

const LIST_FIELDS: &[&str] = &["document_number", "signing_date", "publication_date"];
const DETAIL_FIELDS: &[&str] = &[
    "document_number",
    "executive_order_number",
    "title",
    "signing_date",
    "publication_date",
    "president",
    "citation",
    "raw_text_url",
    "html_url",
    "agencies",
];

type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Deserialize)]
struct DocumentsPage {
    #[serde(default)]
    next_page_url: Option<String>,
    #[serde(default)]
    results: Vec<OrderSummary>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderSummary {
    document_number: String,
    #[serde(default)]
    signing_date: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderDetail {
    document_number: String,
    #[serde(default)]
    executive_order_number: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    signing_date: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    president: Option<PresidentField>,
    #[serde(default)]
    citation: Option<String>,
    #[serde(default)]
    raw_text_url: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    agencies: Vec<AgencyField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PresidentField {
    Structured { name: Option<String> },
    Plain(String),
}

impl PresidentField {
    fn name(&self) -> String {
        match self {
            PresidentField::Structured { name } => name.clone().unwrap_or_default(),
            PresidentField::Plain(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AgencyField {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    raw_name: Option<String>,
}

#[derive(Clone)]
pub struct FederalRegisterFetcher {
    base_url: Url,
    http: Client,
    rate_limiter: Arc<GenericRateLimiter>,
    backoff: ExponentialBuilder,
}

impl FederalRegisterFetcher {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let parsed = Url::parse(base_url)
            .map_err(|_| FetchError::InvalidBaseUrl(base_url.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("govreporter/0.1")
            .build()
            .map_err(|err| FetchError::request("build_client", err))?;

        let quota = Quota::with_period(MIN_REQUEST_INTERVAL)
            .unwrap_or_else(|| Quota::per_minute(std::num::NonZeroU32::new(54).expect("non-zero")));
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
            .with_max_times(5)
            .with_jitter();

        Ok(Self {
            base_url: parsed,
            http,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            backoff,
        })
    }

    fn join(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url.join(path).map_err(|err| FetchError::UrlJoin {
            path: path.to_string(),
            source: Arc::new(err),
        })
    }

    async fn get_with_retry(
        &self,
        url: Url,
        stage: &'static str,
    ) -> Result<reqwest::Response, FetchError> {
        let limiter = self.rate_limiter.clone();
        let client = self.http.clone();

        let attempt = move || {
            let limiter = limiter.clone();
            let client = client.clone();
            let url = url.clone();
            async move {
                limiter.until_ready().await;
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|err| FetchError::request(stage, err))?;

                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(FetchError::NotFound(response.url().to_string()));
                }
                if !status.is_success() {
                    return Err(FetchError::status(stage, status));
                }
                Ok(response)
            }
        };

        attempt
            .retry(self.backoff.clone())
            .sleep(sleep)
            .when(FetchError::is_transient)
            .notify(|err: &FetchError, delay: Duration| {
                warn!(
                    source = SOURCE_SLUG,
                    stage,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "retrying Federal Register request"
                );
            })
            .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        stage: &'static str,
    ) -> Result<T, FetchError> {
        let response = self.get_with_retry(url, stage).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| FetchError::body(stage, err))
    }

    fn list_url(&self, start: NaiveDate, end: NaiveDate, page: usize) -> Result<Url, FetchError> {
        let mut url = self.join("documents.json")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("conditions[type][]", "PRESDOCU")
                .append_pair("conditions[presidential_document_type][]", "executive_order")
                .append_pair("conditions[signing_date][gte]", &start.to_string())
                .append_pair("conditions[signing_date][lte]", &end.to_string())
                .append_pair("order", "oldest")
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());
            for field in LIST_FIELDS {
                pairs.append_pair("fields[]", field);
            }
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for FederalRegisterFetcher {
    fn kind(&self) -> DocumentKind {
        DocumentKind::ExecutiveOrder
    }

    fn rate_limit(&self) -> Duration {
        MIN_REQUEST_INTERVAL
    }

    async fn list_ids(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DiscoveredDocument>, FetchError> {
        let mut discovered = Vec::new();
        let mut page = 1usize;

        loop {
            let url = self.list_url(start_date, end_date, page)?;
            let parsed: DocumentsPage = self.get_json(url, "order_list").await?;
            let has_next = parsed.next_page_url.is_some();
            if parsed.results.is_empty() {
                break;
            }

            for order in parsed.results {
                let date = order
                    .signing_date
                    .or(order.publication_date)
                    .unwrap_or_default();
                discovered.push(DiscoveredDocument {
                    id: order.document_number,
                    date,
                });
            }

            if !has_next || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }

        discovered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        debug!(
            source = SOURCE_SLUG,
            stage = "discover",
            count = discovered.len(),
            "discovered executive orders"
        );
        Ok(discovered)
    }

    async fn fetch(&self, id: &str) -> Result<Document, FetchError> {
        let mut url = self.join(&format!("documents/{id}.json"))?;
        {
            let mut pairs = url.query_pairs_mut();
            for field in DETAIL_FIELDS {
                pairs.append_pair("fields[]", field);
            }
        }
        let detail: OrderDetail = self.get_json(url, "order_detail").await?;

        let raw_text_url = detail
            .raw_text_url
            .clone()
            .ok_or_else(|| FetchError::parse("order_text", format!("order {id} has no raw text URL")))?;
        let text_url = Url::parse(&raw_text_url).map_err(|err| FetchError::UrlJoin {
            path: raw_text_url.clone(),
            source: Arc::new(err),
        })?;
        let response = self.get_with_retry(text_url, "order_text").await?;
        let raw_text = response
            .text()
            .await
            .map_err(|err| FetchError::body("order_text", err))?;
        let text = normalize_whitespace(&raw_text);

        let order_number = detail
            .executive_order_number
            .as_ref()
            .map(|value| match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let signing_date = detail.signing_date.clone().unwrap_or_default();
        let publication_date = detail
            .publication_date
            .clone()
            .or_else(|| detail.signing_date.clone())
            .unwrap_or_default();
        let title = detail
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Executive Order {order_number}"));

        Ok(Document {
            id: detail.document_number.clone(),
            title,
            date: publication_date,
            kind: DocumentKind::ExecutiveOrder,
            source: "Federal Register".to_string(),
            url: detail.html_url.clone().unwrap_or_default(),
            text,
            metadata: SourceMetadata::Order {
                order_number,
                president: detail
                    .president
                    .as_ref()
                    .map(PresidentField::name)
                    .unwrap_or_default(),
                signing_date,
                citation: detail.citation.clone().unwrap_or_default(),
                agencies: detail
                    .agencies
                    .iter()
                    .filter_map(|a| a.name.clone().or_else(|| a.raw_name.clone()))
                    .collect(),
                raw_text_url: Some(raw_text_url),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_url_carries_date_conditions_and_fields() {
        let fetcher = FederalRegisterFetcher::new(DEFAULT_FEDERAL_REGISTER_URL).expect("fetcher");
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");
        let end = NaiveDate::from_ymd_opt(2025, 1, 31).expect("valid date");
        let url = fetcher.list_url(start, end, 2).expect("url");
        let query = url.query().expect("query string");
        assert!(query.contains("conditions%5Bsigning_date%5D%5Bgte%5D=2025-01-01"));
        assert!(query.contains("conditions%5Bsigning_date%5D%5Blte%5D=2025-01-31"));
        assert!(query.contains("page=2"));
        assert!(query.contains("executive_order"));
    }

    #[test]
    fn president_field_accepts_both_shapes() {
        let structured: PresidentField =
            serde_json::from_str(r#"{"name": "Joseph R. Biden Jr."}"#).expect("parse");
        assert_eq!(structured.name(), "Joseph R. Biden Jr.");
        let plain: PresidentField = serde_json::from_str(r#""Biden""#).expect("parse");
        assert_eq!(plain.name(), "Biden");
    }

    #[test]
    fn rate_limit_stays_under_sixty_per_minute() {
        let fetcher = FederalRegisterFetcher::new(DEFAULT_FEDERAL_REGISTER_URL).expect("fetcher");
        assert!(fetcher.rate_limit() >= Duration::from_millis(1000));
    }
}
