//! Retrieval ranking
//!
//! Fetches candidate chunks for a query embedding, attaches each chunk's
//! parent document, and orders them by norm-boosted similarity.

mod norm_boost;

pub use norm_boost::NormBoost;

use futures::future::try_join_all;
use lexforge_common::{
    corpus::{CorpusStore, SearchFilter},
    embeddings::Embedding,
    errors::{AppError, Result},
    metrics,
    models::{Chunk, NormLevel, NormalizedDocument, ScoredChunk},
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Candidate chunk after boosting
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Similarity as returned by the store
    pub similarity: f32,
    /// Boosted score used for ordering
    pub score: f32,
    #[serde(skip)]
    pub document: Arc<NormalizedDocument>,
}

impl RankedChunk {
    pub fn norm_level(&self) -> NormLevel {
        self.chunk.norm_level
    }
}

/// Canonical ordering: score desc, authority rank asc, effective date desc,
/// chunk id asc.
pub fn compare_ranked(a: &RankedChunk, b: &RankedChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.norm_level().rank().cmp(&b.norm_level().rank()))
        .then_with(|| b.document.effective_date.cmp(&a.document.effective_date))
        .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
}

pub fn sort_ranked(ranked: &mut [RankedChunk]) {
    ranked.sort_by(compare_ranked);
}

/// Scores and orders corpus candidates
pub struct RetrievalRanker {
    store: Arc<dyn CorpusStore>,
    boost: NormBoost,
    corpus_model: String,
    dimension: Option<usize>,
    call_timeout: Option<Duration>,
}

impl RetrievalRanker {
    pub fn new(store: Arc<dyn CorpusStore>, boost: NormBoost, corpus_model: impl Into<String>) -> Self {
        Self {
            store,
            boost,
            corpus_model: corpus_model.into(),
            dimension: None,
            call_timeout: None,
        }
    }

    /// Require query vectors to have exactly `dimension` components
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Bound every store call by `timeout`
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn corpus_model(&self) -> &str {
        &self.corpus_model
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                AppError::StoreUnavailable {
                    message: format!("corpus store call exceeded {}ms", limit.as_millis()),
                }
            })?,
            None => call.await,
        }
    }

    /// Top `k` candidates for `query`, boosted and sorted
    pub async fn rank(
        &self,
        query: &Embedding,
        norm_level: Option<NormLevel>,
        k: usize,
    ) -> Result<Vec<RankedChunk>> {
        if query.model_id != self.corpus_model {
            return Err(AppError::EmbeddingMismatch {
                expected: self.corpus_model.clone(),
                actual: query.model_id.clone(),
            });
        }
        let width = query.vector.len();
        if width == 0 || self.dimension.is_some_and(|d| d != width) {
            return Err(AppError::EmbeddingMismatch {
                expected: match self.dimension {
                    Some(d) => format!("{} ({} dimensions)", self.corpus_model, d),
                    None => self.corpus_model.clone(),
                },
                actual: format!("{} ({} dimensions)", query.model_id, width),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let filter = SearchFilter {
            norm_level,
            embedding_model: query.model_id.clone(),
        };

        let started = Instant::now();
        let searched = self.bounded(self.store.search(&query.vector, &filter, k)).await;
        metrics::record_store_search(started.elapsed().as_secs_f64(), searched.is_ok());
        let mut hits = searched?;
        hits.truncate(k);

        if let Some(foreign) = hits.iter().find(|h| h.chunk.embedding_model != query.model_id) {
            return Err(AppError::EmbeddingMismatch {
                expected: query.model_id.clone(),
                actual: foreign.chunk.embedding_model.clone(),
            });
        }

        let documents = self.fetch_documents(&hits).await?;

        let mut ranked = hits
            .into_iter()
            .map(|hit| {
                let document = documents.get(&hit.chunk.doc_id).cloned().ok_or_else(|| {
                    AppError::CorpusIntegrity {
                        chunk_id: hit.chunk.chunk_id.clone(),
                        doc_id: hit.chunk.doc_id.clone(),
                        reason: "parent document is missing".to_string(),
                    }
                })?;
                Ok(self.score(hit, document))
            })
            .collect::<Result<Vec<_>>>()?;

        sort_ranked(&mut ranked);

        debug!(
            candidates = ranked.len(),
            documents = documents.len(),
            "Ranked retrieval candidates"
        );

        Ok(ranked)
    }

    fn score(&self, hit: ScoredChunk, document: Arc<NormalizedDocument>) -> RankedChunk {
        let score = self.boost.apply(hit.similarity, hit.chunk.norm_level);
        RankedChunk {
            chunk: hit.chunk,
            similarity: hit.similarity,
            score,
            document,
        }
    }

    /// Fetch each distinct parent document once, concurrently
    async fn fetch_documents(
        &self,
        hits: &[ScoredChunk],
    ) -> Result<HashMap<String, Arc<NormalizedDocument>>> {
        let doc_ids: BTreeSet<&str> = hits.iter().map(|h| h.chunk.doc_id.as_str()).collect();

        let fetched = try_join_all(doc_ids.into_iter().map(|doc_id| async move {
            let doc = self.bounded(self.store.get(doc_id)).await?;
            Ok::<_, AppError>((doc_id, doc))
        }))
        .await?;

        let mut documents = HashMap::with_capacity(fetched.len());
        for (doc_id, doc) in fetched {
            match doc {
                Some(doc) => {
                    documents.insert(doc_id.to_string(), Arc::new(doc));
                }
                None => {
                    let chunk_id = hits
                        .iter()
                        .find(|h| h.chunk.doc_id == doc_id)
                        .map(|h| h.chunk.chunk_id.clone())
                        .unwrap_or_default();
                    return Err(AppError::CorpusIntegrity {
                        chunk_id,
                        doc_id: doc_id.to_string(),
                        reason: "parent document is missing".to_string(),
                    });
                }
            }
        }
        Ok(documents)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use lexforge_common::models::{ConsolidationSource, Document, DocumentKind};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    pub const MODEL: &str = "test-model";

    pub fn document(id: &str, kind: DocumentKind, level: NormLevel, date: (i32, u32, u32)) -> NormalizedDocument {
        NormalizedDocument {
            document: Document {
                id: id.into(),
                kind,
                source_url: format!("https://example.org/{}", id),
                content_hash: "00".into(),
                fetched_at: Utc::now(),
            },
            norm_level: level,
            effective_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            consolidation_source: ConsolidationSource::AuthoritativeRegister,
            doctrine: None,
        }
    }

    pub fn chunk(id: &str, doc_id: &str, level: NormLevel) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            doc_id: doc_id.into(),
            embedding_model: MODEL.into(),
            norm_level: level,
            statute_reference: None,
            chapter: None,
            section: None,
            page: None,
            text: String::new(),
        }
    }

    /// Store returning canned hits, counting calls
    #[derive(Default)]
    pub struct FixedStore {
        pub hits: Vec<ScoredChunk>,
        pub documents: HashMap<String, NormalizedDocument>,
        pub searches: AtomicUsize,
        pub gets: AtomicUsize,
    }

    impl FixedStore {
        pub fn with(hits: Vec<(Chunk, f32)>, documents: Vec<NormalizedDocument>) -> Self {
            Self {
                hits: hits
                    .into_iter()
                    .map(|(chunk, similarity)| ScoredChunk { chunk, similarity })
                    .collect(),
                documents: documents.into_iter().map(|d| (d.id().to_string(), d)).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CorpusStore for FixedStore {
        async fn get(&self, doc_id: &str) -> Result<Option<NormalizedDocument>> {
            self.gets.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.documents.get(doc_id).cloned())
        }

        async fn search(&self, _vector: &[f32], filter: &SearchFilter, k: usize) -> Result<Vec<ScoredChunk>> {
            self.searches.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self
                .hits
                .iter()
                .filter(|h| filter.norm_level.map_or(true, |l| h.chunk.norm_level == l))
                .take(k)
                .cloned()
                .collect())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn query(model: &str) -> Embedding {
        Embedding {
            vector: vec![1.0, 0.0],
            model_id: model.into(),
        }
    }

    fn ranker(store: Arc<FixedStore>) -> RetrievalRanker {
        RetrievalRanker::new(store, NormBoost::default(), MODEL)
    }

    fn ids(ranked: &[RankedChunk]) -> Vec<&str> {
        ranked.iter().map(|r| r.chunk.chunk_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_statute_outranks_doctrine_at_equal_similarity() {
        let store = Arc::new(FixedStore::with(
            vec![
                (chunk("doctrine-1", "doc-d", NormLevel::Doctrine), 0.80),
                (chunk("statute-1", "doc-s", NormLevel::Statute), 0.80),
            ],
            vec![
                document("doc-d", DocumentKind::Doctrine, NormLevel::Doctrine, (2020, 1, 1)),
                document("doc-s", DocumentKind::Statute, NormLevel::Statute, (1970, 1, 1)),
            ],
        ));
        let ranked = ranker(store).rank(&query(MODEL), None, 10).await.unwrap();
        assert_eq!(ids(&ranked), vec!["statute-1", "doctrine-1"]);
        assert!((ranked[0].score - 0.96).abs() < 1e-6);
        assert!((ranked[1].score - 0.68).abs() < 1e-6);
        assert_eq!(ranked[0].similarity, 0.80);
    }

    #[tokio::test]
    async fn test_wrong_width_query_fails_before_store_call() {
        let store = Arc::new(FixedStore::with(
            vec![(chunk("statute-1", "doc-s", NormLevel::Statute), 0.80)],
            vec![document("doc-s", DocumentKind::Statute, NormLevel::Statute, (1970, 1, 1))],
        ));
        let ranker = ranker(store.clone()).with_dimension(3);

        let err = ranker.rank(&query(MODEL), None, 10).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingMismatch { .. }));
        assert!(err.to_string().contains("2 dimensions"));

        let empty = Embedding { vector: vec![], model_id: MODEL.into() };
        let err = ranker.rank(&empty, None, 10).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingMismatch { .. }));
        assert_eq!(store.searches.load(AtomicOrdering::SeqCst), 0);

        let ranked = ranker.with_dimension(2).rank(&query(MODEL), None, 10).await.unwrap();
        assert_eq!(ids(&ranked), vec!["statute-1"]);
    }

    #[tokio::test]
    async fn test_mismatched_query_model_fails_before_store_call() {
        let store = Arc::new(FixedStore::default());
        let err = ranker(store.clone()).rank(&query("other-model"), None, 10).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingMismatch { .. }));
        assert_eq!(store.searches.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_foreign_model_chunk_is_rejected() {
        let mut foreign = chunk("c2", "d1", NormLevel::Statute);
        foreign.embedding_model = "legacy-model".into();
        let store = Arc::new(FixedStore::with(
            vec![(chunk("c1", "d1", NormLevel::Statute), 0.9), (foreign, 0.8)],
            vec![document("d1", DocumentKind::Statute, NormLevel::Statute, (2000, 1, 1))],
        ));
        let err = ranker(store).rank(&query(MODEL), None, 10).await.unwrap_err();
        match err {
            AppError::EmbeddingMismatch { actual, .. } => assert_eq!(actual, "legacy-model"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_document_is_integrity_failure() {
        let store = Arc::new(FixedStore::with(
            vec![(chunk("orphan", "gone", NormLevel::Statute), 0.9)],
            vec![],
        ));
        let err = ranker(store).rank(&query(MODEL), None, 10).await.unwrap_err();
        match err {
            AppError::CorpusIntegrity { chunk_id, doc_id, .. } => {
                assert_eq!(chunk_id, "orphan");
                assert_eq!(doc_id, "gone");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_each_document_fetched_once() {
        let store = Arc::new(FixedStore::with(
            vec![
                (chunk("a", "d1", NormLevel::Statute), 0.9),
                (chunk("b", "d1", NormLevel::Statute), 0.8),
                (chunk("c", "d2", NormLevel::Precedent), 0.7),
            ],
            vec![
                document("d1", DocumentKind::Statute, NormLevel::Statute, (2000, 1, 1)),
                document("d2", DocumentKind::CaseLaw, NormLevel::Precedent, (2010, 1, 1)),
            ],
        ));
        let ranked = ranker(store.clone()).rank(&query(MODEL), None, 10).await.unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(store.gets.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cardinality_and_empty_results() {
        let store = Arc::new(FixedStore::with(
            vec![(chunk("a", "d1", NormLevel::Doctrine), -0.3)],
            vec![document("d1", DocumentKind::Doctrine, NormLevel::Doctrine, (2000, 1, 1))],
        ));
        let ranked = ranker(store).rank(&query(MODEL), None, 10).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 0.0);

        let empty = ranker(Arc::new(FixedStore::default()))
            .rank(&query(MODEL), None, 10)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_norm_level_filter_is_forwarded() {
        let store = Arc::new(FixedStore::with(
            vec![
                (chunk("s", "d1", NormLevel::Statute), 0.9),
                (chunk("p", "d2", NormLevel::Precedent), 0.95),
            ],
            vec![
                document("d1", DocumentKind::Statute, NormLevel::Statute, (2000, 1, 1)),
                document("d2", DocumentKind::CaseLaw, NormLevel::Precedent, (2010, 1, 1)),
            ],
        ));
        let ranked = ranker(store)
            .rank(&query(MODEL), Some(NormLevel::Precedent), 10)
            .await
            .unwrap();
        assert_eq!(ids(&ranked), vec!["p"]);
    }

    #[test]
    fn test_tie_breaks_and_idempotent_ordering() {
        let newer = Arc::new(document("new", DocumentKind::Statute, NormLevel::Statute, (2022, 1, 1)));
        let older = Arc::new(document("old", DocumentKind::Statute, NormLevel::Statute, (1999, 1, 1)));
        let make = |id: &str, doc: &Arc<NormalizedDocument>, level: NormLevel, score: f32| RankedChunk {
            chunk: chunk(id, doc.id(), level),
            similarity: score,
            score,
            document: doc.clone(),
        };

        let mut ranked = vec![
            make("z", &older, NormLevel::Statute, 0.5),
            make("b", &newer, NormLevel::Statute, 0.5),
            make("a", &newer, NormLevel::Statute, 0.5),
            make("reg", &newer, NormLevel::Regulation, 0.5),
            make("top", &older, NormLevel::Doctrine, 0.9),
        ];
        sort_ranked(&mut ranked);
        let first: Vec<String> = ranked.iter().map(|r| r.chunk.chunk_id.clone()).collect();
        assert_eq!(first, vec!["top", "a", "b", "z", "reg"]);

        ranked.reverse();
        sort_ranked(&mut ranked);
        let second: Vec<String> = ranked.iter().map(|r| r.chunk.chunk_id.clone()).collect();
        assert_eq!(first, second);
    }
}
