//! Enricher and embedder behavior against a simulated OpenAI endpoint.

use std::time::Duration;

use backon::ExponentialBuilder;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use govreporter_app::embed::{Embedder, OpenAiEmbedder};
use govreporter_app::enrich::{Enricher, EnrichmentRecord, OpenAiEnricher};
use govreporter_app::fetchers::{Document, DocumentKind, SourceMetadata};

fn order_document(text: &str) -> Document {
    Document {
        id: "2025-01234".to_string(),
        title: "Improving Coverage".to_string(),
        date: "2025-01-17".to_string(),
        kind: DocumentKind::ExecutiveOrder,
        source: "Federal Register".to_string(),
        url: String::new(),
        text: text.to_string(),
        metadata: SourceMetadata::Order {
            order_number: "14250".to_string(),
            president: "Example".to_string(),
            signing_date: "2025-01-15".to_string(),
            citation: String::new(),
            agencies: Vec::new(),
            raw_text_url: None,
        },
    }
}

fn chat_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"content": content}}]
    })
}

#[tokio::test]
async fn enricher_drops_values_missing_from_the_source() {
    let server = MockServer::start().await;
    let extraction = serde_json::json!({
        "summary": "Requires agencies to measure coverage.",
        "policy_topics": ["testing", "reporting"],
        "agencies_impacted": ["Environmental Protection Agency", "Department of Made-Up Affairs"],
        "legal_authorities": ["5 U.S.C. § 301", "99 U.S.C. § 1"],
        "related_orders": [],
        "economic_sectors": []
    })
    .to_string();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(&extraction)))
        .expect(1)
        .mount(&server)
        .await;

    let enricher = OpenAiEnricher::with_base_url("test-key", server.uri()).expect("enricher");
    let document = order_document(
        "Under 5 U.S.C. § 301, the Environmental Protection Agency shall measure coverage.",
    );
    let record = enricher.enrich(&document, None).await;

    let EnrichmentRecord::Order(order) = record else {
        panic!("wrong record kind");
    };
    assert_eq!(order.summary, "Requires agencies to measure coverage.");
    assert_eq!(
        order.agencies_impacted,
        vec!["Environmental Protection Agency"]
    );
    assert_eq!(order.legal_authorities, vec!["5 U.S.C. § 301"]);
}

#[tokio::test]
async fn enricher_falls_back_to_empty_record_after_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("this is not json")))
        .expect(2)
        .mount(&server)
        .await;

    let enricher = OpenAiEnricher::with_base_url("test-key", server.uri()).expect("enricher");
    let document = order_document("Sec. 1. Purpose. Some text.");
    let record = enricher.enrich(&document, None).await;

    assert_eq!(
        record,
        EnrichmentRecord::empty_for(DocumentKind::ExecutiveOrder)
    );
}

fn fast_retry() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_max_times(1)
}

#[tokio::test]
async fn embedder_returns_vectors_in_input_order() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ]
    });
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::with_base_url("test-key", server.uri())
        .expect("embedder")
        .with_retry_policy(fast_retry());
    let batch = embedder
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .expect("embed");

    assert!(batch.failed.is_empty());
    assert_eq!(batch.vectors[0], vec![1.0, 0.0]);
    assert_eq!(batch.vectors[1], vec![0.0, 1.0]);
}

#[tokio::test]
async fn embedder_degrades_to_zero_vectors_on_persistent_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::with_base_url("test-key", server.uri())
        .expect("embedder")
        .with_retry_policy(fast_retry());
    let batch = embedder
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .expect("degraded batch still returns");

    assert_eq!(batch.vectors.len(), 2);
    assert_eq!(batch.failed, vec![0, 1]);
    for vector in &batch.vectors {
        assert!(vector.iter().all(|v| *v == 0.0));
        assert_eq!(vector.len(), embedder.dimension());
    }
}
