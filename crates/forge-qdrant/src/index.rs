//! [`VectorIndex`] backed by a remote Qdrant collection per [`Collection`].

use std::collections::BTreeMap;

use qdrant_client::qdrant::{
    self, value::Kind, vectors_config, Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    Distance, FieldCondition, FieldType, Filter, Match, PointId, PointStruct, QueryPointsBuilder,
    ScrollPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use forge_core::constants::DEFAULT_VECTOR_DIMENSIONALITY;
use forge_core::error::Result;
use forge_core::vector_index::{Collection, Point, ScoredPoint, SearchParams, VectorIndex};

use crate::error::QdrantError;

/// A [`VectorIndex`] that stores every [`Collection`] as its own Qdrant
/// collection on a remote Qdrant server, reached over gRPC.
pub struct QdrantVectorIndex {
    client: Qdrant,
}

impl QdrantVectorIndex {
    /// Connects to Qdrant at `url` (e.g. `http://localhost:6334`) and
    /// creates any of the five fixed collections that don't already exist.
    pub async fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(QdrantError::Client)?;
        let index = Self { client };
        index.ensure_collections().await?;
        Ok(index)
    }

    /// Wraps an already-configured client, skipping URL parsing. Useful for
    /// tests that need a custom timeout or API key.
    pub async fn from_client(client: Qdrant) -> Result<Self> {
        let index = Self { client };
        index.ensure_collections().await?;
        Ok(index)
    }

    async fn ensure_collections(&self) -> Result<()> {
        for collection in Collection::ALL {
            let name = collection.name();
            let exists = self
                .client
                .collection_exists(name)
                .await
                .map_err(QdrantError::Client)?;
            if !exists {
                let vector_params =
                    VectorParamsBuilder::new(DEFAULT_VECTOR_DIMENSIONALITY as u64, Distance::Cosine).build();
                let vectors_config = VectorsConfig {
                    config: Some(vectors_config::Config::Params(vector_params)),
                };
                let create_collection = CreateCollectionBuilder::new(name).vectors_config(vectors_config);
                self.client
                    .create_collection(create_collection)
                    .await
                    .map_err(QdrantError::Client)?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert(&self, collection: Collection, point: Point) -> Result<()> {
        if point.vector.len() != DEFAULT_VECTOR_DIMENSIONALITY {
            return Err(QdrantError::DimensionMismatch {
                expected: DEFAULT_VECTOR_DIMENSIONALITY,
                actual: point.vector.len(),
            }
            .into());
        }

        let point_struct = PointStruct {
            id: Some(PointId::from(point.id.to_string())),
            vectors: Some(point.vector.clone().into()),
            payload: json_to_payload(point.payload).into(),
        };

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection.name(), vec![point_struct]).wait(true))
            .await
            .map_err(QdrantError::Client)?;
        Ok(())
    }

    async fn search(&self, collection: Collection, params: SearchParams) -> Result<Vec<ScoredPoint>> {
        if params.vector.len() != DEFAULT_VECTOR_DIMENSIONALITY {
            return Err(QdrantError::DimensionMismatch {
                expected: DEFAULT_VECTOR_DIMENSIONALITY,
                actual: params.vector.len(),
            }
            .into());
        }

        let filter = build_filter(&params.filter);
        let query_result = self
            .client
            .query(
                QueryPointsBuilder::new(collection.name())
                    .query(params.vector)
                    .limit(params.limit as u64)
                    .filter(filter)
                    .with_payload(true)
                    .with_vectors(true)
                    .score_threshold(params.min_score),
            )
            .await
            .map_err(QdrantError::Client)?;

        Ok(query_result
            .result
            .into_iter()
            .map(|scored_point| {
                let id = point_id_to_uuid(scored_point.id.as_ref());
                let vector = scored_point
                    .vectors
                    .and_then(|v| v.vectors_options)
                    .map(dense_vector_from_options)
                    .unwrap_or_default();
                let payload = payload_to_json(&scored_point.payload);
                ScoredPoint {
                    point: Point { id, vector, payload },
                    score: scored_point.score,
                }
            })
            .collect())
    }

    async fn scroll(&self, collection: Collection, filter: BTreeMap<String, JsonValue>) -> Result<Vec<Point>> {
        let qdrant_filter = build_filter(&filter);
        let mut points = Vec::new();
        let mut offset = None;

        loop {
            let mut request = ScrollPointsBuilder::new(collection.name())
                .filter(qdrant_filter.clone())
                .with_payload(true)
                .with_vectors(true)
                .limit(256);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }

            let response = self.client.scroll(request).await.map_err(QdrantError::Client)?;
            for retrieved in &response.result {
                let id = point_id_to_uuid(retrieved.id.as_ref());
                let vector = retrieved
                    .vectors
                    .clone()
                    .and_then(|v| v.vectors_options)
                    .map(dense_vector_from_options)
                    .unwrap_or_default();
                let payload = payload_to_json(&retrieved.payload);
                points.push(Point { id, vector, payload });
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(points)
    }

    async fn create_payload_index(&self, collection: Collection, field: &str) -> Result<()> {
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                collection.name(),
                field,
                FieldType::Keyword,
            ))
            .await
            .map_err(QdrantError::Client)?;
        Ok(())
    }
}

fn json_to_payload(value: JsonValue) -> Payload {
    let mut payload = Payload::new();
    match value {
        JsonValue::Object(map) => {
            for (key, value) in map {
                payload.insert(key, value);
            }
        }
        other => payload.insert("value", other),
    }
    payload
}

fn payload_to_json(payload: &std::collections::HashMap<String, qdrant::Value>) -> JsonValue {
    let map: serde_json::Map<String, JsonValue> = payload
        .iter()
        .filter_map(|(k, v)| qdrant_value_to_json(v).map(|json_v| (k.clone(), json_v)))
        .collect();
    JsonValue::Object(map)
}

fn qdrant_value_to_json(value: &qdrant::Value) -> Option<JsonValue> {
    match &value.kind {
        Some(Kind::NullValue(_)) => Some(JsonValue::Null),
        Some(Kind::BoolValue(b)) => Some(JsonValue::Bool(*b)),
        Some(Kind::IntegerValue(i)) => Some(JsonValue::Number(serde_json::Number::from(*i))),
        Some(Kind::DoubleValue(f)) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
        Some(Kind::StringValue(s)) => Some(JsonValue::String(s.clone())),
        Some(Kind::ListValue(list)) => {
            let values: Vec<JsonValue> = list.values.iter().filter_map(qdrant_value_to_json).collect();
            Some(JsonValue::Array(values))
        }
        Some(Kind::StructValue(struct_val)) => {
            let map: serde_json::Map<String, JsonValue> = struct_val
                .fields
                .iter()
                .filter_map(|(k, v)| qdrant_value_to_json(v).map(|json_v| (k.clone(), json_v)))
                .collect();
            Some(JsonValue::Object(map))
        }
        None => None,
    }
}

fn point_id_to_uuid(id: Option<&PointId>) -> Uuid {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(qdrant::point_id::PointIdOptions::Uuid(s)) => Uuid::parse_str(s).unwrap_or_else(|e| {
            warn!("point id {s} is not a valid uuid: {e}");
            Uuid::nil()
        }),
        Some(qdrant::point_id::PointIdOptions::Num(n)) => {
            warn!("point id {n} is numeric, expected a uuid");
            Uuid::nil()
        }
        None => Uuid::nil(),
    }
}

fn dense_vector_from_options(options: qdrant::vectors::VectorsOptions) -> Vec<f32> {
    match options {
        qdrant::vectors::VectorsOptions::Vector(vector) => vector.data,
        qdrant::vectors::VectorsOptions::Vectors(_) => Vec::new(),
    }
}

fn build_filter(filter: &BTreeMap<String, JsonValue>) -> Filter {
    let mut must = Vec::new();

    for (key, value) in filter {
        let match_value = match value {
            JsonValue::String(s) => Some(qdrant::r#match::MatchValue::Keyword(s.clone())),
            JsonValue::Number(n) => n.as_i64().map(qdrant::r#match::MatchValue::Integer),
            JsonValue::Bool(b) => Some(qdrant::r#match::MatchValue::Boolean(*b)),
            JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
        };

        if let Some(match_value) = match_value {
            must.push(Condition {
                condition_one_of: Some(qdrant::condition::ConditionOneOf::Field(FieldCondition {
                    key: key.clone(),
                    r#match: Some(Match {
                        match_value: Some(match_value),
                    }),
                    ..Default::default()
                })),
            });
        }
    }

    Filter {
        must,
        ..Default::default()
    }
}
