use crate::traits::{check_dimensions, VectorIndex};
use crate::{IndexError, SearchResult, TextChunk};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url("")).send().await?;
        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response));
        }

        let response = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        check_status(response)?;

        info!(collection = %self.collection, size = self.vector_size, "qdrant collection created");
        Ok(())
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }
}

// qdrant ids must be integers or UUIDs
pub fn point_id(key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

fn point(key: &str, chunk: &TextChunk, vector: &[f32]) -> Value {
    json!({
        "id": point_id(key).to_string(),
        "vector": vector,
        "payload": {
            "key": key,
            "chunk_id": chunk.chunk_id,
            "content": chunk.content,
            "source": chunk.source,
            "ordinal": chunk.ordinal,
        },
    })
}

fn parse_hit(hit: &Value) -> SearchResult {
    let text = |pointer: &str| {
        hit.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    SearchResult {
        key: text("/payload/key"),
        content: text("/payload/content"),
        source: text("/payload/source"),
        ordinal: hit
            .pointer("/payload/ordinal")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize,
        similarity: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
    }
}

fn backend_error(response: Response) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: response.status().to_string(),
    }
}

fn check_status(response: Response) -> Result<Response, IndexError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(backend_error(response))
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn dimensions(&self) -> usize {
        self.vector_size
    }

    async fn upsert(&self, key: &str, chunk: &TextChunk, vector: &[f32]) -> Result<(), IndexError> {
        check_dimensions(self.vector_size, vector)?;

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": [point(key, chunk, vector)] }))
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        check_dimensions(self.vector_size, query_vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed: Value = check_status(response)?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().map(parse_hit).collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, IndexError> {
        let id = point_id(key).to_string();

        let response = self
            .client
            .post(self.collection_url("/points"))
            .json(&json!({ "ids": [&id], "with_payload": false, "with_vector": false }))
            .send()
            .await?;
        let parsed: Value = check_status(response)?.json().await?;
        let exists = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .is_some_and(|points| !points.is_empty());
        if !exists {
            return Ok(false);
        }

        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .json(&json!({ "points": [id] }))
            .send()
            .await?;
        check_status(response)?;
        Ok(true)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(self.collection_url("/points/count"))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        let parsed: Value = check_status(response)?.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count missing from response".to_string(),
            })
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.collection_url("")).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response)?;
        }
        self.ensure_collection().await
    }
}
