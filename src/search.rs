//! Retrieval and ranking.
//!
//! A search runs in three steps:
//!
//! 1. **Over-retrieve** `retrieve_k` candidates (default `max(top_k, 50)`)
//!    from the vector store, scoped to one video.
//! 2. **Rerank** the pool with the cross-encoder when it is
//!    [`Ready`](crate::models::Capability::Ready). If it is disabled,
//!    unavailable, or fails, the pool keeps its similarity order. Either way
//!    the pool is then truncated to `top_k`.
//! 3. **Adaptive cutoff** ([`apply_cutoff`]) trims the tail based on the
//!    shape of the score distribution.
//!
//! # Adaptive cutoff
//!
//! With `best` the first score:
//!
//! - `best <= 0`: return the first `min(top_k, min_return_hits)` candidates.
//! - otherwise keep candidates in order while `score >= min_score`,
//!   `score >= best * relative_min` and `prev - score < dropoff_gap`,
//!   stopping at the first violation or at `top_k`.
//! - if fewer than `min_return_hits` survive, return the first
//!   `min(top_k, min_return_hits)` raw candidates instead.
//!
//! A tight cluster of near-equal scores returns few hits; a gradual slope
//! returns up to `top_k`.
//!
//! Rerank scores need not share the [0, 1] scale of cosine similarity, so
//! when they are in play the optional `[retrieval.rerank_cutoff]` thresholds
//! replace the defaults.

use anyhow::Result;
use std::sync::Arc;

use crate::config::{CutoffConfig, RetrievalConfig};
use crate::embedding::EmbeddingGateway;
use crate::models::SearchHit;
use crate::rerank::Reranker;
use crate::store::{ScoredPoint, VectorStore};

/// Default size of the candidate pool when `retrieve_k` is unset.
pub const DEFAULT_POOL: usize = 50;

/// A candidate in the ranking pipeline.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub point: ScoredPoint,
    pub rerank_score: Option<f64>,
}

impl Candidate {
    /// Ranking key: the rerank score when present, otherwise raw similarity.
    pub fn score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.point.score)
    }
}

/// Apply the adaptive cutoff to candidates already in ranking order.
pub fn apply_cutoff<T: Clone>(
    candidates: &[T],
    score: impl Fn(&T) -> f64,
    top_k: usize,
    policy: &CutoffConfig,
) -> Vec<T> {
    let fallback = |c: &[T]| -> Vec<T> {
        let n = top_k.min(policy.min_return_hits).min(c.len());
        c[..n].to_vec()
    };

    let Some(first) = candidates.first() else {
        return Vec::new();
    };
    let best = score(first);
    if best <= 0.0 {
        return fallback(candidates);
    }

    let floor = best * policy.relative_min;
    let mut kept = Vec::new();
    let mut prev = best;
    for c in candidates {
        if kept.len() >= top_k {
            break;
        }
        let s = score(c);
        if s < policy.min_score || s < floor || prev - s >= policy.dropoff_gap {
            break;
        }
        kept.push(c.clone());
        prev = s;
    }

    if kept.len() < policy.min_return_hits {
        return fallback(candidates);
    }
    kept
}

/// URL path under which a frame thumbnail is served.
pub fn thumbnail_path(video_id: &str, frame_file: &str) -> String {
    format!("/videos/{}/frames/{}", video_id, frame_file)
}

/// Query-time pipeline over one vector store.
#[derive(Clone)]
pub struct RetrievalEngine {
    gateway: EmbeddingGateway,
    store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        gateway: EmbeddingGateway,
        store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            reranker,
            config,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.default_top_k
    }

    fn pool_size(&self, top_k: usize) -> usize {
        self.config
            .retrieve_k
            .unwrap_or(DEFAULT_POOL)
            .max(top_k)
    }

    /// Search one video. A blank query yields no hits.
    ///
    /// # Errors
    ///
    /// Embedding failures and store errors (including
    /// [`StoreError::NotFound`](crate::error::StoreError::NotFound) for an
    /// unindexed video) are returned as-is; no partial result is invented.
    pub async fn search(
        &self,
        video_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.gateway.embed_query(query).await?;
        let points = self
            .store
            .search(&query_vec, self.pool_size(top_k), Some(video_id))
            .await?;
        let pool_len = points.len();

        let mut candidates: Vec<Candidate> = points
            .into_iter()
            .map(|point| Candidate {
                point,
                rerank_score: None,
            })
            .collect();
        let reranked = self.rerank(query, &mut candidates).await;
        candidates.truncate(top_k);

        let policy = match (reranked, self.config.rerank_cutoff) {
            (true, Some(policy)) => policy,
            (true, None) => {
                tracing::debug!("rerank scores active; applying similarity cutoff thresholds");
                self.config.cutoff
            }
            (false, _) => self.config.cutoff,
        };
        let kept = apply_cutoff(&candidates, Candidate::score, top_k, &policy);
        tracing::debug!(
            video_id,
            pool = pool_len,
            kept = kept.len(),
            reranked,
            "search complete"
        );

        Ok(kept.into_iter().map(to_hit).collect())
    }

    /// Rerank in place. Returns whether rerank scores were applied.
    async fn rerank(&self, query: &str, candidates: &mut [Candidate]) -> bool {
        if candidates.is_empty() {
            return false;
        }
        match self.reranker.availability() {
            crate::models::Capability::Ready => {}
            crate::models::Capability::Disabled => return false,
            crate::models::Capability::Unavailable(reason) => {
                tracing::warn!(%reason, "reranker unavailable; keeping similarity order");
                return false;
            }
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.point.chunk.text.clone()).collect();
        match self.reranker.score(query, &texts).await {
            Ok(scores) if scores.len() == candidates.len() => {
                for (c, s) in candidates.iter_mut().zip(scores) {
                    c.rerank_score = Some(s);
                }
                candidates.sort_by(|a, b| {
                    b.score()
                        .partial_cmp(&a.score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                true
            }
            Ok(scores) => {
                tracing::warn!(
                    expected = candidates.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores; keeping similarity order"
                );
                false
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "rerank failed; keeping similarity order");
                false
            }
        }
    }
}

fn to_hit(c: Candidate) -> SearchHit {
    let score = c.score();
    let chunk = c.point.chunk;
    SearchHit {
        thumbnail_path: chunk
            .frame_file
            .as_deref()
            .map(|f| thumbnail_path(&chunk.video_id, f)),
        video_id: chunk.video_id,
        start: chunk.start,
        end: chunk.end,
        score,
        transcript: chunk.transcript,
        caption: chunk.caption,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::error::StoreResult;
    use crate::models::{Capability, Chunk};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn cut(scores: &[f64], top_k: usize, policy: &CutoffConfig) -> Vec<f64> {
        apply_cutoff(scores, |s| *s, top_k, policy)
    }

    #[test]
    fn steep_drop_halts_inclusion() {
        let out = cut(&[0.95, 0.94, 0.93, 0.60, 0.55], 5, &CutoffConfig::default());
        assert_eq!(out, vec![0.95, 0.94, 0.93]);
    }

    #[test]
    fn gradual_slope_returns_up_to_top_k() {
        let scores = [0.90, 0.88, 0.86, 0.84, 0.83, 0.82];
        assert_eq!(cut(&scores, 4, &CutoffConfig::default()).len(), 4);
    }

    #[test]
    fn relative_floor_applies() {
        // 0.80 < 0.95 * 0.90 even though every step is under the gap
        let scores = [0.95, 0.90, 0.86, 0.80];
        assert_eq!(cut(&scores, 5, &CutoffConfig::default()), vec![0.95, 0.90, 0.86]);
    }

    #[test]
    fn min_hits_falls_back_to_raw_candidates() {
        let policy = CutoffConfig {
            min_return_hits: 2,
            ..CutoffConfig::default()
        };
        let out = cut(&[0.95, 0.50, 0.40], 5, &policy);
        assert_eq!(out, vec![0.95, 0.50]);
    }

    #[test]
    fn min_hits_capped_by_top_k() {
        let policy = CutoffConfig {
            min_return_hits: 3,
            ..CutoffConfig::default()
        };
        assert_eq!(cut(&[0.9, 0.1, 0.05], 2, &policy), vec![0.9, 0.1]);
    }

    #[test]
    fn non_positive_best_returns_min_hits() {
        let out = cut(&[-0.1, -0.2, -0.3], 5, &CutoffConfig::default());
        assert_eq!(out, vec![-0.1]);
    }

    #[test]
    fn absolute_floor_stops_walk() {
        let policy = CutoffConfig {
            min_score: 0.5,
            ..CutoffConfig::default()
        };
        assert_eq!(cut(&[0.52, 0.49, 0.48], 5, &policy), vec![0.52]);
    }

    #[test]
    fn empty_pool_stays_empty() {
        assert!(cut(&[], 5, &CutoffConfig::default()).is_empty());
    }

    #[test]
    fn thumbnail_is_pure_string_construction() {
        assert_eq!(
            thumbnail_path("abc123", "frame_000004.jpg"),
            "/videos/abc123/frames/frame_000004.jpg"
        );
    }

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Six candidates with similarity `0.90, 0.89, ..`; `start` is the position.
    struct FixedStore {
        requested: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        fn backend(&self) -> &'static str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn add_or_upsert(&self, _: &[Vec<f32>], _: &[Chunk]) -> StoreResult<()> {
            Ok(())
        }
        async fn search(
            &self,
            _query: &[f32],
            top_k: usize,
            video_id: Option<&str>,
        ) -> StoreResult<Vec<ScoredPoint>> {
            self.requested.lock().unwrap().push(top_k);
            let video_id = video_id.unwrap_or("v");
            Ok((0..6)
                .take(top_k)
                .map(|i| ScoredPoint {
                    score: 0.90 - 0.01 * i as f64,
                    chunk: Chunk::new(
                        video_id,
                        i as f64,
                        i as f64 + 1.0,
                        &format!("text {}", i),
                        String::new(),
                        None,
                    ),
                })
                .collect())
        }
    }

    enum Behavior {
        Scores(Vec<f64>),
        Fail,
        Unavailable,
    }

    struct FakeReranker(Behavior);

    #[async_trait]
    impl Reranker for FakeReranker {
        fn availability(&self) -> Capability {
            match self.0 {
                Behavior::Unavailable => Capability::Unavailable("model not loaded".into()),
                _ => Capability::Ready,
            }
        }
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f64>> {
            match &self.0 {
                Behavior::Scores(s) => Ok(s.clone()),
                Behavior::Fail => anyhow::bail!("rerank service returned HTTP 503"),
                Behavior::Unavailable => anyhow::bail!("not loaded"),
            }
        }
    }

    fn engine(behavior: Behavior, config: RetrievalConfig) -> (RetrievalEngine, Arc<FixedStore>) {
        let store = Arc::new(FixedStore {
            requested: Mutex::new(Vec::new()),
        });
        let engine = RetrievalEngine::new(
            EmbeddingGateway::new(Arc::new(AxisEmbedder), 8),
            store.clone(),
            Arc::new(FakeReranker(behavior)),
            config,
        );
        (engine, store)
    }

    async fn ranked(engine: &RetrievalEngine, top_k: usize) -> Vec<(f64, f64)> {
        engine
            .search("v", "query", Some(top_k))
            .await
            .unwrap()
            .into_iter()
            .map(|h| (h.start, h.score))
            .collect()
    }

    #[tokio::test]
    async fn rerank_score_supersedes_similarity() {
        let (engine, store) = engine(
            Behavior::Scores(vec![0.0, 0.0, 0.0, 0.0, 0.0, 9.0]),
            RetrievalConfig::default(),
        );
        assert_eq!(ranked(&engine, 3).await, vec![(5.0, 9.0)]);
        // Over-retrieves the default pool, not just top_k.
        assert_eq!(*store.requested.lock().unwrap(), vec![DEFAULT_POOL]);
    }

    #[tokio::test]
    async fn rerank_failure_keeps_similarity_order() {
        let expected = vec![(0.0, 0.90), (1.0, 0.89), (2.0, 0.88)];
        for behavior in [
            Behavior::Fail,
            Behavior::Unavailable,
            Behavior::Scores(vec![1.0, 2.0]),
        ] {
            let (engine, _) = engine(behavior, RetrievalConfig::default());
            let hits = ranked(&engine, 3).await;
            assert_eq!(hits.len(), 3);
            for ((start, score), (want_start, want_score)) in hits.iter().zip(&expected) {
                assert_eq!(start, want_start);
                assert!((score - want_score).abs() < 1e-9);
            }
        }
    }

    #[tokio::test]
    async fn rerank_cutoff_replaces_defaults_when_reranked() {
        let rerank_scores = vec![5.0, 4.0, 3.0, 2.0, 1.0, 0.5];

        let (plain, _) = engine(Behavior::Scores(rerank_scores.clone()), RetrievalConfig::default());
        // 4.0 < 5.0 * 0.90 under the similarity thresholds.
        assert_eq!(ranked(&plain, 3).await, vec![(0.0, 5.0)]);

        let config = RetrievalConfig {
            rerank_cutoff: Some(CutoffConfig {
                min_score: 0.0,
                relative_min: 0.0,
                dropoff_gap: 2.0,
                min_return_hits: 1,
            }),
            ..RetrievalConfig::default()
        };
        let (tuned, _) = engine(Behavior::Scores(rerank_scores), config);
        assert_eq!(
            ranked(&tuned, 3).await,
            vec![(0.0, 5.0), (1.0, 4.0), (2.0, 3.0)]
        );
    }

    #[tokio::test]
    async fn blank_query_skips_the_store() {
        let (engine, store) = engine(Behavior::Fail, RetrievalConfig::default());
        assert!(engine.search("v", "   ", None).await.unwrap().is_empty());
        assert!(store.requested.lock().unwrap().is_empty());
    }
}
