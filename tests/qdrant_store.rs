//! Networked backend against an in-process stand-in for the Qdrant REST API.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use video_harness::error::StoreError;
use video_harness::models::Chunk;
use video_harness::store::{QdrantStore, VectorStore};

#[derive(Default)]
struct FakeQdrant {
    /// collection -> point id (as JSON text) -> point
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    api_keys: Vec<String>,
    payload_indexes: Vec<String>,
}

type Shared = Arc<Mutex<FakeQdrant>>;

fn record_key(state: &Shared, headers: &HeaderMap) {
    if let Some(key) = headers.get("api-key").and_then(|v| v.to_str().ok()) {
        state.lock().unwrap().api_keys.push(key.to_string());
    }
}

async fn list_collections(State(state): State<Shared>, headers: HeaderMap) -> Json<Value> {
    record_key(&state, &headers);
    let names: Vec<Value> = state
        .lock()
        .unwrap()
        .collections
        .keys()
        .map(|name| json!({ "name": name }))
        .collect();
    Json(json!({ "result": { "collections": names }, "status": "ok" }))
}

async fn create_collection(
    State(state): State<Shared>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    if s.collections.contains_key(&name) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "status": { "error": format!("Collection `{}` already exists!", name) } })),
        );
    }
    s.collections.insert(name, BTreeMap::new());
    (StatusCode::OK, Json(json!({ "result": true })))
}

async fn create_index(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let field = body["field_name"].as_str().unwrap_or_default();
    state
        .lock()
        .unwrap()
        .payload_indexes
        .push(format!("{}.{}", name, field));
    Json(json!({ "result": { "status": "completed" } }))
}

async fn upsert_points(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut s = state.lock().unwrap();
    let Some(collection) = s.collections.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "status": "not found" })));
    };
    for point in body["points"].as_array().cloned().unwrap_or_default() {
        collection.insert(point["id"].to_string(), point);
    }
    (StatusCode::OK, Json(json!({ "result": { "status": "completed" } })))
}

async fn search_points(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let s = state.lock().unwrap();
    let query: Vec<f64> = serde_json::from_value(body["vector"].clone()).unwrap_or_default();
    let wanted = body["filter"]["must"][0]["match"]["value"].as_str();
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;

    let mut hits: Vec<Value> = s
        .collections
        .get(&name)
        .map(|c| c.values().cloned().collect::<Vec<Value>>())
        .unwrap_or_default()
        .into_iter()
        .filter(|p: &Value| wanted.map_or(true, |w| p["payload"]["video_id"] == w))
        .map(|p| {
            let v: Vec<f64> = serde_json::from_value(p["vector"].clone()).unwrap_or_default();
            let score: f64 = v.iter().zip(&query).map(|(a, b)| a * b).sum();
            json!({ "id": p["id"], "score": score, "payload": p["payload"] })
        })
        .collect();
    hits.sort_by(|a, b| b["score"].as_f64().partial_cmp(&a["score"].as_f64()).unwrap());
    hits.truncate(limit);
    Json(json!({ "result": hits }))
}

async fn spawn_fake() -> (String, Shared) {
    let state: Shared = Arc::default();
    let app = Router::new()
        .route("/collections", get(list_collections))
        .route("/collections/{name}", put(create_collection))
        .route("/collections/{name}/index", put(create_index))
        .route("/collections/{name}/points", put(upsert_points))
        .route("/collections/{name}/points/search", post(search_points))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn chunk(video_id: &str, start: f64, text: &str) -> Chunk {
    Chunk::new(video_id, start, start + 2.0, text, String::new(), None)
}

#[tokio::test]
async fn collections_are_namespaced_by_dimension() {
    let (url, state) = spawn_fake().await;

    let small = QdrantStore::connect(&url, None, "videos", 4, 5).await.unwrap();
    let large = QdrantStore::connect(&url, None, "videos", 8, 5).await.unwrap();
    // Reconnecting reuses the existing collection.
    QdrantStore::connect(&url, None, "videos", 4, 5).await.unwrap();

    assert_eq!(small.collection(), "videos_d4");
    assert_eq!(large.collection(), "videos_d8");
    let s = state.lock().unwrap();
    assert_eq!(
        s.collections.keys().cloned().collect::<Vec<_>>(),
        vec!["videos_d4".to_string(), "videos_d8".to_string()]
    );
    assert!(s.payload_indexes.contains(&"videos_d4.video_id".to_string()));
}

#[tokio::test]
async fn search_is_scoped_to_one_video() {
    let (url, _state) = spawn_fake().await;
    let store = QdrantStore::connect(&url, None, "videos", 2, 5).await.unwrap();

    store
        .add_or_upsert(
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[chunk("a", 0.0, "first"), chunk("a", 2.0, "second")],
        )
        .await
        .unwrap();
    store
        .add_or_upsert(&[vec![1.0, 0.0]], &[chunk("b", 0.0, "other video")])
        .await
        .unwrap();

    let hits = store.search(&[1.0, 0.0], 10, Some("a")).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.transcript, "first");
    assert!(hits.iter().all(|h| h.chunk.video_id == "a"));
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn non_conforming_ids_are_normalized_and_stable() {
    let (url, state) = spawn_fake().await;
    let store = QdrantStore::connect(&url, None, "videos", 2, 5).await.unwrap();

    let mut named = chunk("a", 0.0, "first");
    named.point_id = Some("a-0".to_string());
    let mut numeric = chunk("a", 2.0, "second");
    numeric.point_id = Some("42".to_string());
    let batch = [named, numeric];
    let vectors = [vec![1.0, 0.0], vec![0.0, 1.0]];

    store.add_or_upsert(&vectors, &batch).await.unwrap();
    store.add_or_upsert(&vectors, &batch).await.unwrap();

    {
        let s = state.lock().unwrap();
        let points = &s.collections["videos_d2"];
        // Same ids both times, so the second upsert overwrote the first.
        assert_eq!(points.len(), 2);
        assert!(points.contains_key("42"));
        let uuid_key = points.keys().find(|k| k.as_str() != "42").unwrap();
        let raw = uuid_key.trim_matches('"');
        assert!(uuid::Uuid::parse_str(raw).is_ok());
    }

    let hits = store.search(&[0.0, 1.0], 1, Some("a")).await.unwrap();
    assert_eq!(hits[0].chunk.point_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn api_key_is_sent_as_header() {
    let (url, state) = spawn_fake().await;
    QdrantStore::connect(&url, Some("secret".to_string()), "videos", 2, 5)
        .await
        .unwrap();
    assert!(state.lock().unwrap().api_keys.iter().any(|k| k == "secret"));
}

#[tokio::test]
async fn wrong_query_dimension_is_rejected_locally() {
    let (url, _state) = spawn_fake().await;
    let store = QdrantStore::connect(&url, None, "videos", 2, 5).await.unwrap();
    let err = store.search(&[1.0, 0.0, 0.0], 3, Some("a")).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    ));
}

#[tokio::test]
async fn unreachable_service_is_an_error_not_a_fallback() {
    let err = QdrantStore::connect("http://127.0.0.1:9", None, "videos", 2, 2)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Unreachable { .. }));
}
