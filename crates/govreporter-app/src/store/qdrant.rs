//! Qdrant-backed implementation of the vector-store adapter.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, value::Kind, vectors_config,
    Condition, CreateCollectionBuilder, Distance, FieldCondition, Filter as QdrantFilter,
    GetPointsBuilder, ListValue, Match, PointId, PointStruct, Range, RepeatedStrings,
    SearchPointsBuilder, Struct, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info, warn};

use super::{
    point_uuid, ChunkPayload, CollectionInfo, EmbeddedChunk, FilterExpr, FilterPredicate,
    ScoredChunk, StoreError, UpsertOutcome, UpsertProgress, VectorStore,
};

/// Points per upsert RPC; the adapter's atomicity unit stays the point.
const UPSERT_BATCH: usize = 100;

pub struct QdrantStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore").finish_non_exhaustive()
    }
}

impl QdrantStore {
    pub fn connect(url: &str, api_key: Option<&str>) -> Result<Self, StoreError> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { client })
    }

    async fn existing_ids(
        &self,
        collection: &str,
        chunk_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let point_ids: Vec<PointId> = chunk_ids
            .iter()
            .map(|id| PointId::from(point_uuid(id).to_string()))
            .collect();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(collection, point_ids).with_payload(true))
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut found = HashSet::new();
        for point in response.result {
            if let Some(Value {
                kind: Some(Kind::StringValue(chunk_id)),
            }) = point.payload.get("chunk_id")
            {
                found.insert(chunk_id.clone());
            }
        }
        Ok(found)
    }

    fn collection_dimension(info: &qdrant_client::qdrant::CollectionInfo) -> Option<u64> {
        let params = info.config.as_ref()?.params.as_ref()?;
        match params.vectors_config.as_ref()?.config.as_ref()? {
            vectors_config::Config::Params(p) => Some(p.size),
            vectors_config::Config::ParamsMap(map) => {
                map.map.values().next().map(|p| p.size)
            }
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, name: &str, dimension: u64) -> Result<(), StoreError> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        if exists {
            let info = self
                .client
                .collection_info(name)
                .await
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            if let Some(actual) = info.result.as_ref().and_then(Self::collection_dimension) {
                if actual != dimension {
                    return Err(StoreError::DimensionMismatch {
                        collection: name.to_string(),
                        expected: dimension,
                        actual,
                    });
                }
            }
            debug!(collection = name, "collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
            )
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        info!(collection = name, dimension, "created collection");
        Ok(())
    }

    async fn exists(&self, collection: &str, chunk_id: &str) -> Result<bool, StoreError> {
        let collection_present = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if !collection_present {
            return Ok(false);
        }
        let found = self
            .existing_ids(collection, std::slice::from_ref(&chunk_id.to_string()))
            .await?;
        Ok(found.contains(chunk_id))
    }

    async fn batch_upsert(
        &self,
        collection: &str,
        chunks: Vec<EmbeddedChunk>,
        progress: Option<UpsertProgress<'_>>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();
        if chunks.is_empty() {
            return Ok(outcome);
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.payload.chunk_id.clone()).collect();
        let existing = self.existing_ids(collection, &ids).await?;

        let mut pending = Vec::new();
        for chunk in chunks {
            if existing.contains(&chunk.payload.chunk_id) {
                outcome.skipped += 1;
            } else {
                pending.push(chunk);
            }
        }

        let total = pending.len();
        let mut done = 0usize;
        for batch in pending.chunks(UPSERT_BATCH) {
            let mut points = Vec::with_capacity(batch.len());
            for chunk in batch {
                points.push(to_point(chunk)?);
            }
            match self
                .client
                .upsert_points(qdrant_client::qdrant::UpsertPointsBuilder::new(
                    collection,
                    points,
                ))
                .await
            {
                Ok(_) => outcome.written += batch.len(),
                Err(err) => {
                    warn!(
                        collection,
                        batch_len = batch.len(),
                        error = %err,
                        "upsert batch failed"
                    );
                    for chunk in batch {
                        outcome
                            .errors
                            .push(format!("{}: {err}", chunk.payload.chunk_id));
                    }
                }
            }
            done += batch.len();
            if let Some(report) = progress {
                report(done, total);
            }
        }

        Ok(outcome)
    }

    async fn semantic_search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<FilterExpr>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let mut builder =
            SearchPointsBuilder::new(collection, vector, limit as u64).with_payload(true);
        if let Some(expr) = filter {
            if !expr.is_empty() {
                builder = builder.filter(translate_filter(&expr));
            }
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let json = payload_to_json(&point.payload);
            match serde_json::from_value::<ChunkPayload>(json) {
                Ok(payload) => hits.push(ScoredChunk {
                    id: payload.chunk_id.clone(),
                    score: point.score,
                    payload,
                }),
                Err(err) => {
                    warn!(collection, error = %err, "skipping hit with undecodable payload");
                }
            }
        }
        Ok(hits)
    }

    async fn get_by_id(
        &self,
        collection: &str,
        chunk_id: &str,
    ) -> Result<Option<ChunkPayload>, StoreError> {
        let point_id = PointId::from(point_uuid(chunk_id).to_string());
        let response = self
            .client
            .get_points(GetPointsBuilder::new(collection, vec![point_id]).with_payload(true))
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        match response.result.into_iter().next() {
            Some(point) => {
                let json = payload_to_json(&point.payload);
                Ok(Some(serde_json::from_value(json)?))
            }
            None => Ok(None),
        }
    }

    async fn sample(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<ChunkPayload>, StoreError> {
        let response = self
            .client
            .scroll(
                qdrant_client::qdrant::ScrollPointsBuilder::new(collection)
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut payloads = Vec::with_capacity(response.result.len());
        for point in response.result {
            let json = payload_to_json(&point.payload);
            match serde_json::from_value::<ChunkPayload>(json) {
                Ok(payload) => payloads.push(payload),
                Err(err) => warn!(collection, error = %err, "skipping undecodable payload"),
            }
        }
        Ok(payloads)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let listed = self
            .client
            .list_collections()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut out = Vec::new();
        for description in listed.collections {
            let name = description.name;
            let info = self
                .client
                .collection_info(&name)
                .await
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            let (count, dimension) = info
                .result
                .as_ref()
                .map(|r| {
                    (
                        r.points_count.unwrap_or_default(),
                        Self::collection_dimension(r).unwrap_or_default(),
                    )
                })
                .unwrap_or_default();
            out.push(CollectionInfo {
                name,
                count,
                dimension,
                metric: "cosine".to_string(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.client
            .delete_collection(name)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        info!(collection = name, "deleted collection");
        Ok(())
    }
}

fn to_point(chunk: &EmbeddedChunk) -> Result<PointStruct, StoreError> {
    let value = serde_json::to_value(&chunk.payload)?;
    let serde_json::Value::Object(map) = value else {
        return Err(StoreError::Backend(
            "chunk payload did not serialize to an object".to_string(),
        ));
    };
    let payload: HashMap<String, Value> = map
        .into_iter()
        .map(|(key, value)| (key, json_to_qdrant(value)))
        .collect();
    Ok(PointStruct::new(
        point_uuid(&chunk.payload.chunk_id).to_string(),
        chunk.vector.clone(),
        payload,
    ))
}

/// Translate the filter AST into Qdrant's query language. Date ranges are
/// applied to the numeric `<field>_int` companion stored in each payload.
pub fn translate_filter(expr: &FilterExpr) -> QdrantFilter {
    let mut conditions = Vec::with_capacity(expr.predicates.len());
    for predicate in &expr.predicates {
        let condition = match predicate {
            FilterPredicate::Eq { field, value } => {
                Condition::matches(field.clone(), value.clone())
            }
            FilterPredicate::AnyOf { field, values } => Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: field.clone(),
                    r#match: Some(Match {
                        match_value: Some(MatchValue::Keywords(RepeatedStrings {
                            strings: values.clone(),
                        })),
                    }),
                    ..Default::default()
                })),
            },
            FilterPredicate::DateRange { field, from, to } => Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: format!("{field}_int"),
                    range: Some(Range {
                        gte: from.map(|d| super::date_int(&d.to_string()) as f64),
                        lte: to.map(|d| super::date_int(&d.to_string()) as f64),
                        ..Default::default()
                    }),
                    ..Default::default()
                })),
            },
        };
        conditions.push(condition);
    }
    QdrantFilter::must(conditions)
}

fn json_to_qdrant(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(key, value)| (key, json_to_qdrant(value)))
                .collect(),
        }),
    };
    Value { kind: Some(kind) }
}

fn qdrant_to_json(value: &Value) -> serde_json::Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(*i),
        Some(Kind::DoubleValue(d)) => serde_json::Value::from(*d),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(
            fields
                .fields
                .iter()
                .map(|(key, value)| (key.clone(), qdrant_to_json(value)))
                .collect(),
        ),
    }
}

fn payload_to_json(payload: &HashMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(
        payload
            .iter()
            .map(|(key, value)| (key.clone(), qdrant_to_json(value)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn filter_translation_covers_all_predicates() {
        let expr = FilterExpr::default()
            .eq("opinion_type", "majority")
            .any_of(
                "agencies_impacted",
                vec!["EPA".to_string(), "DOJ".to_string()],
            )
            .date_range(
                "publication_date",
                NaiveDate::from_ymd_opt(2024, 1, 1),
                NaiveDate::from_ymd_opt(2024, 12, 31),
            );
        let filter = translate_filter(&expr);
        assert_eq!(filter.must.len(), 3);

        let range_condition = &filter.must[2];
        let Some(ConditionOneOf::Field(field)) = &range_condition.condition_one_of else {
            panic!("expected field condition");
        };
        assert_eq!(field.key, "publication_date_int");
        let range = field.range.as_ref().expect("range present");
        assert_eq!(range.gte, Some(20_240_101.0));
        assert_eq!(range.lte, Some(20_241_231.0));
    }

    #[test]
    fn json_qdrant_round_trip() {
        let original = serde_json::json!({
            "chunk_id": "abc",
            "chunk_index": 3,
            "score_like": 0.5,
            "flags": [true, false],
            "nested": {"k": "v"},
            "missing": null,
        });
        let qdrant = json_to_qdrant(original.clone());
        let back = qdrant_to_json(&qdrant);
        assert_eq!(back, original);
    }
}
