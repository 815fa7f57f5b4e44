//! Networked backend over the Qdrant REST API.
//!
//! All videos share one collection per embedding dimension, named
//! `{base}_d{dims}`, so switching embedding models never writes vectors of
//! a new size into a collection created for another. Searches are scoped to
//! one video with a `video_id` payload filter, backed by a keyword payload
//! index that is created on connect.
//!
//! Point ids must be unsigned integers or UUIDs. Anything else the caller
//! supplies is mapped to a deterministic UUIDv5 (see [`normalize_point_id`]),
//! so re-ingesting the same segment overwrites its previous point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use super::{check_batch, check_dims, ScoredPoint, VectorStore};
use crate::error::{StoreError, StoreResult};
use crate::models::Chunk;

/// Qdrant point id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{}", n),
            PointId::Uuid(u) => f.write_str(u),
        }
    }
}

/// Map a chunk to an id Qdrant accepts.
///
/// - all-digit strings become unsigned integers
/// - valid UUIDs are kept
/// - anything else (including no id) becomes a UUIDv5 of
///   `"{video_id}:{start}:{end}:{index}"` in the URL namespace
pub fn normalize_point_id(chunk: &Chunk, index: usize) -> PointId {
    if let Some(raw) = chunk.point_id.as_deref().map(str::trim) {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<u64>() {
                return PointId::Num(n);
            }
        }
        if let Ok(u) = Uuid::parse_str(raw) {
            return PointId::Uuid(u.to_string());
        }
    }
    let name = format!("{}:{}:{}:{}", chunk.video_id, chunk.start, chunk.end, index);
    PointId::Uuid(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
}

/// Dimension-namespaced collection name.
pub fn collection_name(base: &str, dims: usize) -> String {
    format!("{}_d{}", base, dims)
}

pub struct QdrantStore {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    collection: String,
    dims: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: PointId,
    score: f64,
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantStore {
    /// Connect, then make sure the collection and its `video_id` index exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unreachable`] when the service does not answer a
    /// collection listing. [`StoreError::Backend`] when collection creation is
    /// rejected for a reason other than "already exists".
    pub async fn connect(
        url: &str,
        api_key: Option<String>,
        base_collection: &str,
        dims: usize,
        timeout_secs: u64,
    ) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let store = Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            collection: collection_name(base_collection, dims),
            dims,
        };

        let existing = store.list_collections().await?;
        if existing.iter().any(|c| c == &store.collection) {
            tracing::debug!(collection = %store.collection, "using existing collection");
        } else {
            store.create_collection().await?;
        }
        store.ensure_payload_index().await;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.url, path));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let unreachable = |reason: String| StoreError::Unreachable {
            endpoint: self.url.clone(),
            reason,
        };
        let response = self
            .request(reqwest::Method::GET, "/collections")
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {}", status)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        Ok(body["result"]["collections"]
            .as_array()
            .map(|cols| {
                cols.iter()
                    .filter_map(|c| c["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_collection(&self) -> StoreResult<()> {
        let body = json!({ "vectors": { "size": self.dims, "distance": "Cosine" } });
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(backend_err)?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(collection = %self.collection, dims = self.dims, "created collection");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        // Another process may have created it between the listing and now.
        if status.as_u16() == 409 || text.contains("already exists") {
            return Ok(());
        }
        Err(StoreError::Backend(format!(
            "create collection {} failed: HTTP {}: {}",
            self.collection, status, text
        )))
    }

    async fn ensure_payload_index(&self) {
        let body = json!({ "field_name": "video_id", "field_schema": "keyword" });
        let result = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/index?wait=true", self.collection),
            )
            .json(&body)
            .send()
            .await;
        match result {
            Ok(r) if r.status().is_success() => {}
            Ok(r) => tracing::warn!(
                collection = %self.collection,
                status = %r.status(),
                "could not create video_id payload index; filtered search will be slower"
            ),
            Err(e) => tracing::warn!(
                collection = %self.collection,
                error = %e,
                "could not create video_id payload index; filtered search will be slower"
            ),
        }
    }

    async fn send_checked(&self, req: reqwest::RequestBuilder, what: &str) -> StoreResult<Value> {
        let response = req.send().await.map_err(backend_err)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "{} on {} failed: HTTP {}: {}",
                what, self.collection, status, text
            )));
        }
        response.json().await.map_err(backend_err)
    }
}

fn backend_err(e: reqwest::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn build_points(vectors: &[Vec<f32>], metadata: &[Chunk]) -> StoreResult<Vec<Value>> {
    vectors
        .iter()
        .zip(metadata)
        .enumerate()
        .map(|(i, (vector, chunk))| {
            let id = normalize_point_id(chunk, i);
            let mut payload = chunk.clone();
            payload.point_id = Some(id.to_string());
            Ok(json!({
                "id": id,
                "vector": vector,
                "payload": serde_json::to_value(&payload)?,
            }))
        })
        .collect()
}

fn parse_search_response(body: Value) -> StoreResult<Vec<ScoredPoint>> {
    let parsed: SearchResponse = serde_json::from_value(body)?;
    let mut points = Vec::with_capacity(parsed.result.len());
    for hit in parsed.result {
        let Some(payload) = hit.payload else {
            tracing::warn!(id = %hit.id, "search hit without payload skipped");
            continue;
        };
        let mut chunk: Chunk = serde_json::from_value(payload)?;
        if chunk.point_id.is_none() {
            chunk.point_id = Some(hit.id.to_string());
        }
        points.push(ScoredPoint {
            score: hit.score,
            chunk,
        });
    }
    Ok(points)
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "networked"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn add_or_upsert(&self, vectors: &[Vec<f32>], metadata: &[Chunk]) -> StoreResult<()> {
        check_batch(self.dims, vectors, metadata)?;
        if vectors.is_empty() {
            return Ok(());
        }
        let points = build_points(vectors, metadata)?;
        let req = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&json!({ "points": points }));
        self.send_checked(req, "upsert").await?;
        tracing::debug!(collection = %self.collection, points = vectors.len(), "upserted points");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        video_id: Option<&str>,
    ) -> StoreResult<Vec<ScoredPoint>> {
        check_dims(self.dims, [query])?;
        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(id) = video_id {
            body["filter"] = json!({
                "must": [{ "key": "video_id", "match": { "value": id } }]
            });
        }
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body);
        let response = self.send_checked(req, "search").await?;
        parse_search_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_id(id: Option<&str>) -> Chunk {
        let mut c = Chunk::new("vid", 1.5, 3.0, "hello", String::new(), None);
        c.point_id = id.map(str::to_string);
        c
    }

    #[test]
    fn digit_ids_become_integers() {
        assert_eq!(
            normalize_point_id(&chunk_with_id(Some("42")), 0),
            PointId::Num(42)
        );
    }

    #[test]
    fn uuid_ids_are_kept() {
        let raw = "0b7e1f6a-3c7f-4a53-9d1e-4f2b8a6c9d10";
        assert_eq!(
            normalize_point_id(&chunk_with_id(Some(raw)), 3),
            PointId::Uuid(raw.to_string())
        );
    }

    #[test]
    fn other_ids_are_deterministic_uuids() {
        let a = normalize_point_id(&chunk_with_id(Some("seg-7")), 7);
        let b = normalize_point_id(&chunk_with_id(None), 7);
        let c = normalize_point_id(&chunk_with_id(Some("")), 7);
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"vid:1.5:3:7").to_string();
        assert_eq!(a, PointId::Uuid(expected));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_ne!(a, normalize_point_id(&chunk_with_id(None), 8));
    }

    #[test]
    fn collection_is_namespaced_by_dimension() {
        assert_eq!(collection_name("video_chunks", 768), "video_chunks_d768");
        assert_ne!(collection_name("c", 384), collection_name("c", 1024));
    }

    #[test]
    fn points_carry_payload_and_normalized_id() {
        let points = build_points(&[vec![0.5, 0.5]], &[chunk_with_id(Some("9"))]).unwrap();
        assert_eq!(points[0]["id"], json!(9));
        assert_eq!(points[0]["payload"]["video_id"], json!("vid"));
        assert_eq!(points[0]["payload"]["point_id"], json!("9"));
    }

    #[test]
    fn parses_search_results() {
        let chunk = chunk_with_id(None);
        let body = json!({
            "status": "ok",
            "result": [
                { "id": 5, "score": 0.91, "payload": serde_json::to_value(&chunk).unwrap() },
                { "id": 6, "score": 0.42 }
            ]
        });
        let points = parse_search_response(body).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].score, 0.91);
        assert_eq!(points[0].chunk.point_id.as_deref(), Some("5"));
        assert_eq!(points[0].chunk.transcript, "hello");
    }
}
