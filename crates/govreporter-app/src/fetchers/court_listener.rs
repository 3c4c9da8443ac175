//! CourtListener client for Supreme Court opinions.
//!
//! Discovery pages the clusters endpoint (filtered to SCOTUS dockets) and
//! expands each cluster's sub-opinions; fetching joins the opinion detail
//! with its cluster record to build the Bluebook citation, then strips the
//! HTML-with-citations body down to plain text for the chunker.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header, Client, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{
    ClusterData, DiscoveredDocument, Document, DocumentFetcher, DocumentKind, FetchError,
    SourceMetadata,
};
use crate::chunking::normalize_whitespace;
use crate::citations::build_bluebook_citation;

pub const DEFAULT_COURT_LISTENER_URL: &str = "https://www.courtlistener.com/api/rest/v4/";

const SOURCE_SLUG: &str = "court_listener";
const SCOTUS_COURT_ID: &str = "scotus";
/// 10 requests per second, the authenticated CourtListener budget.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
/// Hard stop for runaway pagination.
const MAX_PAGES: usize = 1000;

type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Deserialize)]
struct ClusterPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<ClusterResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClusterResult {
    id: serde_json::Value,
    #[serde(default)]
    case_name: String,
    #[serde(default)]
    date_filed: String,
    #[serde(default)]
    citations: Vec<crate::citations::CitationRecord>,
    #[serde(default)]
    docket: Option<String>,
    #[serde(default)]
    sub_opinions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpinionDetail {
    #[serde(default)]
    cluster: Option<String>,
    #[serde(default)]
    html_with_citations: Option<String>,
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    author_str: Option<String>,
    #[serde(default)]
    per_curiam: bool,
    #[serde(default)]
    joined_by_str: Option<String>,
    #[serde(default)]
    absolute_url: Option<String>,
}

#[derive(Clone)]
pub struct CourtListenerFetcher {
    base_url: Url,
    http: Client,
    rate_limiter: Arc<GenericRateLimiter>,
    backoff: ExponentialBuilder,
    /// Cluster records keyed by cluster id, filled during discovery so a
    /// later fetch of any of the cluster's opinions skips one round trip.
    cluster_cache: Arc<Mutex<HashMap<String, ClusterData>>>,
    /// opinion id -> cluster id, filled during discovery.
    opinion_clusters: Arc<Mutex<HashMap<String, String>>>,
}

impl CourtListenerFetcher {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, FetchError> {
        let parsed = Url::parse(base_url)
            .map_err(|_| FetchError::InvalidBaseUrl(base_url.to_string()))?;

        let mut headers = header::HeaderMap::new();
        let auth = format!("Token {}", api_token.trim());
        let mut auth_value = header::HeaderValue::from_str(&auth)
            .map_err(|_| FetchError::parse("build_client", "API token is not a valid header"))?;
        auth_value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth_value);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .user_agent("govreporter/0.1")
            .build()
            .map_err(|err| FetchError::request("build_client", err))?;

        let quota = Quota::with_period(MIN_REQUEST_INTERVAL)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(10).expect("non-zero")));
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(5)
            .with_jitter();

        Ok(Self {
            base_url: parsed,
            http,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            backoff,
            cluster_cache: Arc::new(Mutex::new(HashMap::new())),
            opinion_clusters: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn join(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url.join(path).map_err(|err| FetchError::UrlJoin {
            path: path.to_string(),
            source: Arc::new(err),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        stage: &'static str,
    ) -> Result<T, FetchError> {
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
                if !status.is_success() {
                    return Err(FetchError::status(stage, status));
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|err| FetchError::body(stage, err))
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
                    "retrying CourtListener request"
                );
            })
            .await
    }

    async fn cluster_for_opinion(
        &self,
        opinion_id: &str,
        detail: &OpinionDetail,
    ) -> Result<ClusterData, FetchError> {
        let cached_cluster_id = {
            let map = self.opinion_clusters.lock().await;
            map.get(opinion_id).cloned()
        };
        let cluster_id = match cached_cluster_id {
            Some(id) => Some(id),
            None => detail
                .cluster
                .as_deref()
                .and_then(|url| trailing_segment(url).map(str::to_string)),
        };

        if let Some(ref id) = cluster_id {
            let cache = self.cluster_cache.lock().await;
            if let Some(found) = cache.get(id) {
                return Ok(found.clone());
            }
        }

        let cluster_url = match (&detail.cluster, &cluster_id) {
            (Some(url), _) => Url::parse(url).map_err(|err| FetchError::UrlJoin {
                path: url.clone(),
                source: Arc::new(err),
            })?,
            (None, Some(id)) => self.join(&format!("clusters/{id}/"))?,
            (None, None) => {
                return Err(FetchError::parse(
                    "cluster_join",
                    format!("opinion {opinion_id} carries no cluster reference"),
                ));
            }
        };

        let fetched: ClusterResult = self.get_json(cluster_url, "cluster_detail").await?;
        let data = ClusterData {
            case_name: fetched.case_name,
            date_filed: fetched.date_filed,
            citations: fetched.citations,
            docket: fetched.docket,
            sub_opinions: fetched.sub_opinions,
        };
        if let Some(id) = cluster_id {
            let mut cache = self.cluster_cache.lock().await;
            cache.insert(id, data.clone());
        }
        Ok(data)
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for CourtListenerFetcher {
    fn kind(&self) -> DocumentKind {
        DocumentKind::CourtOpinion
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
            let mut url = self.join("clusters/")?;
            url.query_pairs_mut()
                .append_pair("date_filed__gte", &start_date.to_string())
                .append_pair("date_filed__lte", &end_date.to_string())
                .append_pair("docket__court", SCOTUS_COURT_ID)
                .append_pair("page", &page.to_string());

            let parsed: ClusterPage = self.get_json(url, "cluster_list").await?;
            let has_next = parsed.next.is_some();

            for cluster in parsed.results {
                let cluster_id = json_id(&cluster.id);
                let data = ClusterData {
                    case_name: cluster.case_name,
                    date_filed: cluster.date_filed.clone(),
                    citations: cluster.citations,
                    docket: cluster.docket,
                    sub_opinions: cluster.sub_opinions.clone(),
                };
                {
                    let mut cache = self.cluster_cache.lock().await;
                    cache.insert(cluster_id.clone(), data);
                }
                for opinion_url in &cluster.sub_opinions {
                    let Some(opinion_id) = trailing_segment(opinion_url) else {
                        warn!(
                            source = SOURCE_SLUG,
                            stage = "discover",
                            cluster = %cluster_id,
                            url = %opinion_url,
                            "sub-opinion URL missing identifier"
                        );
                        continue;
                    };
                    {
                        let mut map = self.opinion_clusters.lock().await;
                        map.insert(opinion_id.to_string(), cluster_id.clone());
                    }
                    discovered.push(DiscoveredDocument {
                        id: opinion_id.to_string(),
                        date: cluster.date_filed.clone(),
                    });
                }
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
            "discovered Supreme Court opinions"
        );
        Ok(discovered)
    }

    async fn fetch(&self, id: &str) -> Result<Document, FetchError> {
        let url = self.join(&format!("opinions/{id}/"))?;
        let detail: OpinionDetail = self.get_json(url, "opinion_detail").await?;
        let cluster = self.cluster_for_opinion(id, &detail).await?;

        let text = match detail.html_with_citations.as_deref() {
            Some(html) if !html.trim().is_empty() => strip_html(html),
            _ => normalize_whitespace(detail.plain_text.as_deref().unwrap_or("")),
        };

        let citation = build_bluebook_citation(&cluster.citations, &cluster.date_filed);
        let case_name = if cluster.case_name.is_empty() {
            format!("Supreme Court opinion {id}")
        } else {
            cluster.case_name.clone()
        };
        let url = detail
            .absolute_url
            .as_deref()
            .map(|path| {
                if path.starts_with("http") {
                    path.to_string()
                } else {
                    format!("https://www.courtlistener.com{path}")
                }
            })
            .unwrap_or_default();

        Ok(Document {
            id: id.to_string(),
            title: case_name.clone(),
            date: cluster.date_filed.clone(),
            kind: DocumentKind::CourtOpinion,
            source: "CourtListener".to_string(),
            url,
            text,
            metadata: SourceMetadata::Opinion {
                case_name,
                citation,
                cluster_id: detail
                    .cluster
                    .as_deref()
                    .and_then(trailing_segment)
                    .map(str::to_string),
                authoring_justice: detail.author_str.filter(|s| !s.is_empty()),
                per_curiam: detail.per_curiam,
                joined_by: detail.joined_by_str.filter(|s| !s.is_empty()),
                docket_number: cluster.docket.as_deref().and_then(trailing_segment).map(str::to_string),
            },
        })
    }
}

/// Reduce CourtListener's HTML-with-citations body to plain text with
/// decoded entities and normalized whitespace.
pub fn strip_html(html: &str) -> String {
    let fragment = scraper::Html::parse_document(html);
    let mut text = String::new();
    for piece in fragment.root_element().text() {
        if !text.is_empty() && !text.ends_with(char::is_whitespace) {
            text.push(' ');
        }
        text.push_str(piece);
    }
    normalize_whitespace(&text)
}

fn trailing_segment(url: &str) -> Option<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

fn json_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
