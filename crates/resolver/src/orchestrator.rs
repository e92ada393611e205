//! Resolution orchestrator
//!
//! Runs one query through classification, gating, retrieval and provenance
//! validation. Holds no per-query state between calls; the only shared
//! pieces are the rule registry and a concurrency limit.

use lexforge_common::{
    config::ResolutionConfig,
    corpus::CorpusStore,
    embeddings::{Embedding, EmbeddingProvider},
    errors::{AppError, Result},
    metrics,
    models::NormLevel,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::guard::{check_query, filter_candidates, AreaClassifier, QueryDecision};
use crate::provenance::{validate, Confidence, SourceReference, ValidationPolicy};
use crate::retrieval::{NormBoost, RankedChunk, RetrievalRanker};
use crate::rules::RuleRegistry;

/// One query to resolve
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub query: String,
    pub norm_level: Option<NormLevel>,
    pub top_k: Option<usize>,
}

impl ResolveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            norm_level: None,
            top_k: None,
        }
    }
}

/// Result handed to answer generation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    Blocked {
        area_id: String,
        referral_message: String,
    },
    Resolved {
        ranked_chunks: Vec<RankedChunk>,
        confidence: Confidence,
        warnings: BTreeSet<String>,
        sources: Vec<SourceReference>,
    },
}

impl ResolutionResult {
    pub fn outcome(&self) -> &'static str {
        match self {
            ResolutionResult::Blocked { .. } => "blocked",
            ResolutionResult::Resolved { .. } => "resolved",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, ResolutionResult::Blocked { .. })
    }
}

/// Sequences the pipeline for each query
pub struct Orchestrator {
    rules: Arc<RuleRegistry>,
    classifier: Arc<dyn AreaClassifier>,
    embedder: Arc<dyn EmbeddingProvider>,
    ranker: RetrievalRanker,
    policy: ValidationPolicy,
    permits: Semaphore,
    embedding_model: String,
    top_k: usize,
    max_query_chars: usize,
    classifier_timeout: Duration,
    collaborator_timeout: Duration,
}

impl Orchestrator {
    /// Wire the pipeline; fails when the boost table is invalid
    pub fn new(
        config: &ResolutionConfig,
        embedding_model: impl Into<String>,
        rules: Arc<RuleRegistry>,
        classifier: Arc<dyn AreaClassifier>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn CorpusStore>,
    ) -> Result<Self> {
        let embedding_model = embedding_model.into();
        let boost = NormBoost::from_config(&config.norm_level_boosts)?;
        let ranker = RetrievalRanker::new(store, boost, embedding_model.clone())
            .with_call_timeout(config.collaborator_timeout());

        Ok(Self {
            rules,
            classifier,
            embedder,
            ranker,
            policy: ValidationPolicy::from(config),
            permits: Semaphore::new(config.max_concurrent.max(1)),
            embedding_model,
            top_k: config.top_k,
            max_query_chars: config.max_query_chars,
            classifier_timeout: config.classifier_timeout(),
            collaborator_timeout: config.collaborator_timeout(),
        })
    }

    /// Reject query embeddings whose width differs from the corpus vectors
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.ranker = self.ranker.with_dimension(dimension);
        self
    }

    pub fn rules(&self) -> &Arc<RuleRegistry> {
        &self.rules
    }

    /// Resolve a query, recording its outcome
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<ResolutionResult> {
        self.resolve_versioned(request).await.map(|(result, _)| result)
    }

    /// Resolve a query, also returning the version of the rule set it was
    /// decided under. Reloads published while the query runs do not change it.
    pub async fn resolve_versioned(&self, request: &ResolveRequest) -> Result<(ResolutionResult, u64)> {
        let started = Instant::now();
        let result = self.run(request).await;
        let elapsed = started.elapsed();

        match &result {
            Ok((resolution, rule_version)) => {
                let sources = match resolution {
                    ResolutionResult::Blocked { area_id, .. } => {
                        metrics::record_blocked(area_id);
                        0
                    }
                    ResolutionResult::Resolved { sources, warnings, .. } => {
                        for warning in warnings {
                            metrics::record_warning(warning);
                        }
                        sources.len()
                    }
                };
                metrics::record_resolution(elapsed.as_secs_f64(), resolution.outcome(), sources);
                info!(
                    outcome = resolution.outcome(),
                    sources,
                    rule_version,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query resolved"
                );
            }
            Err(e) => {
                metrics::record_resolution(elapsed.as_secs_f64(), e.code().as_str(), 0);
                warn!(
                    error = %e,
                    code = e.code().as_str(),
                    retryable = e.is_retryable(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query resolution failed"
                );
            }
        }

        result
    }

    /// Resolve unless `cancel` completes first.
    ///
    /// Cancellation drops every in-flight collaborator call and yields
    /// [`AppError::Cancelled`], never a partial result.
    pub async fn resolve_until<F>(&self, request: &ResolveRequest, cancel: F) -> Result<ResolutionResult>
    where
        F: Future<Output = ()>,
    {
        self.resolve_until_versioned(request, cancel)
            .await
            .map(|(result, _)| result)
    }

    /// [`Self::resolve_until`] together with the rule set version used
    pub async fn resolve_until_versioned<F>(
        &self,
        request: &ResolveRequest,
        cancel: F,
    ) -> Result<(ResolutionResult, u64)>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel => {
                metrics::record_resolution(started.elapsed().as_secs_f64(), "cancelled", 0);
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Query resolution cancelled");
                Err(AppError::Cancelled)
            }
            result = self.resolve_versioned(request) => result,
        }
    }

    async fn run(&self, request: &ResolveRequest) -> Result<(ResolutionResult, u64)> {
        let query = self.validate_query(&request.query)?;
        let top_k = request.top_k.unwrap_or(self.top_k);

        let rules = self.rules.snapshot();

        let _permit = self.permits.acquire().await.map_err(|e| AppError::Internal {
            message: format!("resolution semaphore closed: {}", e),
        })?;

        let area = tokio::time::timeout(self.classifier_timeout, self.classifier.classify(query, &rules))
            .await
            .map_err(|_| AppError::ClassificationFailure {
                message: format!(
                    "classifier did not answer within {}ms",
                    self.classifier_timeout.as_millis()
                ),
            })?
            .map_err(|e| match e {
                AppError::ClassificationFailure { .. } => e,
                other => AppError::ClassificationFailure {
                    message: other.to_string(),
                },
            })?;

        if let QueryDecision::Blocked { area_id, referral_message } =
            check_query(area.as_deref(), &rules)?
        {
            debug!(area_id = %area_id, rule_version = rules.version(), "Query blocked");
            return Ok((
                ResolutionResult::Blocked { area_id, referral_message },
                rules.version(),
            ));
        }

        let embedding = self.embed(query).await?;
        let ranked = self.ranker.rank(&embedding, request.norm_level, top_k).await?;
        let candidates = ranked.len();

        let gated = filter_candidates(ranked, &rules);
        let validation = validate(gated.kept, &self.policy);
        metrics::record_rejections("doctrine-citation-missing", validation.rejected.len());

        debug!(
            candidates,
            excluded = gated.warnings.len(),
            accepted = validation.accepted.len(),
            rejected = validation.rejected.len(),
            confidence = ?validation.confidence,
            "Evidence validated"
        );

        let mut warnings = validation.warnings;
        warnings.extend(gated.warnings);

        let resolved = ResolutionResult::Resolved {
            ranked_chunks: validation.accepted,
            confidence: validation.confidence,
            warnings,
            sources: validation.sources,
        };
        Ok((resolved, rules.version()))
    }

    fn validate_query<'a>(&self, query: &'a str) -> Result<&'a str> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation {
                message: "query is empty".to_string(),
                field: Some("query".to_string()),
            });
        }
        let chars = trimmed.chars().count();
        if chars > self.max_query_chars {
            return Err(AppError::Validation {
                message: format!(
                    "query is {} characters, the limit is {}",
                    chars, self.max_query_chars
                ),
                field: Some("query".to_string()),
            });
        }
        Ok(trimmed)
    }

    async fn embed(&self, query: &str) -> Result<Embedding> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.collaborator_timeout,
            self.embedder.embed(query, &self.embedding_model),
        )
        .await
        .map_err(|_| AppError::EmbeddingTimeout {
            timeout_ms: self.collaborator_timeout.as_millis() as u64,
        })
        .and_then(|r| r);

        metrics::record_embedding(
            started.elapsed().as_secs_f64(),
            &self.embedding_model,
            result.is_ok(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::KeywordClassifier;
    use crate::retrieval::tests::{chunk, document, FixedStore, MODEL};
    use crate::rules::RuleSet;
    use async_trait::async_trait;
    use lexforge_common::corpus::SearchFilter;
    use lexforge_common::models::{
        Author, DoctrineMetadata, DocumentKind, ExclusionRule, NormalizedDocument, ScoredChunk,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAMILY_REFERRAL: &str =
        "Frågor om vårdnad, boende och umgänge besvaras inte här. Kontakta familjerätten i din kommun.";

    /// Embedder returning a fixed vector, counting calls
    struct CountingEmbedder {
        model: String,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl CountingEmbedder {
        fn new(model: &str) -> Self {
            Self {
                model: model.into(),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, _text: &str, _model_id: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Embedding {
                vector: vec![1.0, 0.0],
                model_id: self.model.clone(),
            })
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl AreaClassifier for FailingClassifier {
        async fn classify(&self, _query: &str, _rules: &RuleSet) -> Result<Option<String>> {
            Err(AppError::Internal {
                message: "model server unreachable".into(),
            })
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl AreaClassifier for SlowClassifier {
        async fn classify(&self, _query: &str, _rules: &RuleSet) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    struct FixedClassifier(&'static str);

    #[async_trait]
    impl AreaClassifier for FixedClassifier {
        async fn classify(&self, _query: &str, _rules: &RuleSet) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    /// Publishes a new rule set while the query is being classified
    struct ReloadingClassifier(Arc<RuleRegistry>);

    #[async_trait]
    impl AreaClassifier for ReloadingClassifier {
        async fn classify(&self, _query: &str, _rules: &RuleSet) -> Result<Option<String>> {
            self.0.replace(vec![])?;
            Ok(None)
        }
    }

    struct DownStore {
        searches: AtomicUsize,
    }

    #[async_trait]
    impl CorpusStore for DownStore {
        async fn get(&self, _doc_id: &str) -> Result<Option<NormalizedDocument>> {
            Err(AppError::StoreUnavailable { message: "connection refused".into() })
        }

        async fn search(&self, _v: &[f32], _f: &SearchFilter, _k: usize) -> Result<Vec<ScoredChunk>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Err(AppError::StoreUnavailable { message: "connection refused".into() })
        }

        async fn ping(&self) -> Result<()> {
            Err(AppError::StoreUnavailable { message: "connection refused".into() })
        }
    }

    fn exclusion_rules() -> Arc<RuleRegistry> {
        let rules = vec![
            ExclusionRule {
                area_id: "straffrätt".into(),
                label: "Straffrätt".into(),
                statute_patterns: vec!["1962:700".into()],
                referral_message: "Kontakta en advokat eller rättshjälpen.".into(),
                keywords: vec!["brott".into(), "åtal".into()],
                aliases: vec![],
                query_patterns: vec![],
            },
            ExclusionRule {
                area_id: "vbu".into(),
                label: "Vårdnad, boende och umgänge".into(),
                statute_patterns: vec!["1949:381_kap6".into()],
                referral_message: FAMILY_REFERRAL.into(),
                keywords: vec!["vårdnad".into(), "custody dispute".into()],
                aliases: vec![],
                query_patterns: vec![],
            },
        ];
        Arc::new(RuleRegistry::new(RuleSet::new(1, rules).unwrap()))
    }

    fn statute_chunk(id: &str, doc_id: &str, reference: &str) -> lexforge_common::models::Chunk {
        let mut c = chunk(id, doc_id, NormLevel::Statute);
        c.statute_reference = Some(reference.into());
        c
    }

    fn tenancy_store() -> FixedStore {
        let mut doctrine = document("holmqvist", DocumentKind::Doctrine, NormLevel::Doctrine, (2019, 1, 1));
        doctrine.doctrine = Some(DoctrineMetadata {
            author: Author { name: String::new() },
            work_title: "Hyreslagen".into(),
            citation_format: "{author}, {work}".into(),
        });

        FixedStore::with(
            vec![
                (statute_chunk("jb-12-4", "sfs-1970-994", "1970:994"), 0.82),
                (chunk("nja-2019", "nja-2019-s-1", NormLevel::Precedent), 0.80),
                (chunk("holmqvist-112", "holmqvist", NormLevel::Doctrine), 0.90),
            ],
            vec![
                document("sfs-1970-994", DocumentKind::Statute, NormLevel::Statute, (1971, 1, 1)),
                document("nja-2019-s-1", DocumentKind::CaseLaw, NormLevel::Precedent, (2019, 5, 1)),
                doctrine,
            ],
        )
    }

    fn orchestrator(
        classifier: Arc<dyn AreaClassifier>,
        embedder: Arc<CountingEmbedder>,
        store: Arc<dyn CorpusStore>,
        config: ResolutionConfig,
    ) -> Orchestrator {
        Orchestrator::new(&config, MODEL, exclusion_rules(), classifier, embedder, store)
            .unwrap()
            .with_embedding_dimension(2)
    }

    fn keyword() -> Arc<dyn AreaClassifier> {
        Arc::new(KeywordClassifier::new())
    }

    #[tokio::test]
    async fn test_custody_dispute_is_blocked_without_retrieval() {
        let embedder = Arc::new(CountingEmbedder::new(MODEL));
        let store = Arc::new(tenancy_store());
        let orch = orchestrator(keyword(), embedder.clone(), store.clone(), ResolutionConfig::default());

        let result = orch
            .resolve(&ResolveRequest::new("Who wins a custody dispute after divorce?"))
            .await
            .unwrap();

        match result {
            ResolutionResult::Blocked { area_id, referral_message } => {
                assert_eq!(area_id, "vbu");
                assert_eq!(referral_message, FAMILY_REFERRAL);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_excluded_area_blocks_without_collaborator_calls() {
        for query in ["Kan jag bli åtalad?", "vårdnad om barn", "brott och vårdnad och vårdnad"] {
            let embedder = Arc::new(CountingEmbedder::new(MODEL));
            let store = Arc::new(tenancy_store());
            let orch = orchestrator(keyword(), embedder.clone(), store.clone(), ResolutionConfig::default());
            let result = orch.resolve(&ResolveRequest::new(query)).await.unwrap();
            assert!(result.is_blocked(), "{query} should be blocked");
            assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
            assert_eq!(store.searches.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_tenancy_query_resolves_with_sources() {
        let embedder = Arc::new(CountingEmbedder::new(MODEL));
        let store = Arc::new(tenancy_store());
        let orch = orchestrator(keyword(), embedder.clone(), store, ResolutionConfig::default());

        let result = orch
            .resolve(&ResolveRequest::new("Får hyresvärden säga upp mitt hyresavtal?"))
            .await
            .unwrap();

        match result {
            ResolutionResult::Resolved { ranked_chunks, confidence, warnings, sources } => {
                let ids: Vec<_> = ranked_chunks.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
                // statute 0.82*1.20 > precedent 0.80*1.00; doctrine lacks an author
                assert_eq!(ids, vec!["jb-12-4", "nja-2019"]);
                assert_eq!(confidence, Confidence::Sufficient);
                assert!(warnings.contains("doctrine-citation-missing:holmqvist-112"));
                assert_eq!(sources.len(), 2);
                assert_eq!(sources[0].citation, "SFS 1970:994");
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_matching_document_is_insufficient() {
        let store = Arc::new(FixedStore::with(
            vec![
                (statute_chunk("a", "sfs-1970-994", "1970:994"), 0.9),
                (statute_chunk("b", "sfs-1970-994", "1970:994"), 0.8),
            ],
            vec![document("sfs-1970-994", DocumentKind::Statute, NormLevel::Statute, (1971, 1, 1))],
        ));
        let orch = orchestrator(
            keyword(),
            Arc::new(CountingEmbedder::new(MODEL)),
            store,
            ResolutionConfig::default(),
        );

        let result = orch.resolve(&ResolveRequest::new("besittningsskydd")).await.unwrap();
        match result {
            ResolutionResult::Resolved { confidence, warnings, .. } => {
                assert_eq!(confidence, Confidence::Insufficient);
                assert!(warnings.contains("insufficient-source-count"));
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_excluded_candidate_is_dropped_even_when_top_scoring() {
        let store = Arc::new(FixedStore::with(
            vec![
                (statute_chunk("fb-6-2", "sfs-1949-381", "1949:381_kap6"), 0.99),
                (statute_chunk("jb-12-4", "sfs-1970-994", "1970:994"), 0.70),
                (statute_chunk("jb-12-5", "sfs-1970-995", "1970:995"), 0.60),
            ],
            vec![
                document("sfs-1949-381", DocumentKind::Statute, NormLevel::Statute, (1950, 1, 1)),
                document("sfs-1970-994", DocumentKind::Statute, NormLevel::Statute, (1971, 1, 1)),
                document("sfs-1970-995", DocumentKind::Statute, NormLevel::Statute, (1971, 1, 1)),
            ],
        ));
        let orch = orchestrator(
            keyword(),
            Arc::new(CountingEmbedder::new(MODEL)),
            store,
            ResolutionConfig::default(),
        );

        let result = orch.resolve(&ResolveRequest::new("föräldrabalken")).await.unwrap();
        match result {
            ResolutionResult::Resolved { ranked_chunks, warnings, confidence, .. } => {
                assert!(ranked_chunks.iter().all(|r| r.chunk.chunk_id != "fb-6-2"));
                assert!(warnings.contains("excluded-candidate:vbu:fb-6-2"));
                assert_eq!(confidence, Confidence::Sufficient);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_store_unavailable() {
        let store = Arc::new(DownStore { searches: AtomicUsize::new(0) });
        let orch = orchestrator(
            keyword(),
            Arc::new(CountingEmbedder::new(MODEL)),
            store.clone(),
            ResolutionConfig::default(),
        );

        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classifier_failures_are_never_treated_as_clear() {
        let embedder = Arc::new(CountingEmbedder::new(MODEL));
        let orch = orchestrator(
            Arc::new(FailingClassifier),
            embedder.clone(),
            Arc::new(tenancy_store()),
            ResolutionConfig::default(),
        );
        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::ClassificationFailure { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

        let orch = orchestrator(
            Arc::new(FixedClassifier("arvsrätt")),
            Arc::new(CountingEmbedder::new(MODEL)),
            Arc::new(tenancy_store()),
            ResolutionConfig::default(),
        );
        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::ClassificationFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_timeout() {
        let orch = orchestrator(
            Arc::new(SlowClassifier),
            Arc::new(CountingEmbedder::new(MODEL)),
            Arc::new(tenancy_store()),
            ResolutionConfig::default(),
        );
        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::ClassificationFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_yields_cancelled() {
        let embedder = Arc::new(CountingEmbedder {
            delay: Some(Duration::from_secs(5)),
            ..CountingEmbedder::new(MODEL)
        });
        let store = Arc::new(tenancy_store());
        let orch = orchestrator(keyword(), embedder.clone(), store.clone(), ResolutionConfig::default());

        let err = orch
            .resolve_until(
                &ResolveRequest::new("hyresavtal"),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout() {
        let embedder = Arc::new(CountingEmbedder {
            delay: Some(Duration::from_secs(60)),
            ..CountingEmbedder::new(MODEL)
        });
        let orch = orchestrator(keyword(), embedder, Arc::new(tenancy_store()), ResolutionConfig::default());
        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingTimeout { .. }));
    }

    #[tokio::test]
    async fn test_embedding_model_mismatch() {
        let store = Arc::new(tenancy_store());
        let orch = orchestrator(
            keyword(),
            Arc::new(CountingEmbedder::new("another-model")),
            store.clone(),
            ResolutionConfig::default(),
        );
        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingMismatch { .. }));
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_dimension_mismatch() {
        let embedder = Arc::new(CountingEmbedder::new(MODEL));
        let store = Arc::new(tenancy_store());
        let orch = orchestrator(keyword(), embedder.clone(), store.clone(), ResolutionConfig::default())
            .with_embedding_dimension(1024);

        let err = orch.resolve(&ResolveRequest::new("hyresavtal")).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingMismatch { .. }));
        assert!(!err.is_retryable());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fixture_corpus_rejects_narrower_query_vectors() {
        use lexforge_common::corpus::InMemoryCorpusStore;
        use lexforge_common::embeddings::HashEmbeddingProvider;

        let model = "lexforge-hash-64";
        let store = InMemoryCorpusStore::load(workspace_file("fixtures/corpus.json"))
            .unwrap()
            .into_shared();
        let orch = Orchestrator::new(
            &ResolutionConfig::default(),
            model,
            exclusion_rules(),
            keyword(),
            Arc::new(HashEmbeddingProvider::new(model, 32)),
            store,
        )
        .unwrap()
        .with_embedding_dimension(64);

        let err = orch
            .resolve(&ResolveRequest::new("Hur lång är uppsägningstiden för mitt hyresavtal?"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmbeddingMismatch { .. }));
    }

    #[tokio::test]
    async fn test_query_validation() {
        let config = ResolutionConfig {
            max_query_chars: 10,
            ..ResolutionConfig::default()
        };
        let orch = orchestrator(
            keyword(),
            Arc::new(CountingEmbedder::new(MODEL)),
            Arc::new(tenancy_store()),
            config,
        );
        for query in ["", "   ", "ett alldeles för långt frågeunderlag"] {
            let err = orch.resolve(&ResolveRequest::new(query)).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn test_invalid_boost_table_is_rejected_at_construction() {
        let mut config = ResolutionConfig::default();
        config.norm_level_boosts.insert("doctrine".into(), 2.0);
        let result = Orchestrator::new(
            &config,
            MODEL,
            exclusion_rules(),
            keyword(),
            Arc::new(CountingEmbedder::new(MODEL)),
            Arc::new(tenancy_store()),
        );
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    fn workspace_file(relative: &str) -> String {
        format!("{}/../../{}", env!("CARGO_MANIFEST_DIR"), relative)
    }

    #[tokio::test]
    async fn test_bundled_rules_and_fixture_corpus() {
        use lexforge_common::corpus::InMemoryCorpusStore;
        use lexforge_common::embeddings::HashEmbeddingProvider;

        let model = "lexforge-hash-64";
        let rules =
            Arc::new(RuleRegistry::from_path(workspace_file("config/excluded_areas.yaml")).unwrap());
        let store = InMemoryCorpusStore::load(workspace_file("fixtures/corpus.json"))
            .unwrap()
            .into_shared();
        let orch = Orchestrator::new(
            &ResolutionConfig::default(),
            model,
            rules,
            keyword(),
            Arc::new(HashEmbeddingProvider::new(model, 64)),
            store,
        )
        .unwrap()
        .with_embedding_dimension(64);

        let blocked = orch
            .resolve(&ResolveRequest::new("Vem får vårdnad om barnen efter skilsmässan?"))
            .await
            .unwrap();
        match blocked {
            ResolutionResult::Blocked { area_id, .. } => assert_eq!(area_id, "vbu"),
            other => panic!("expected Blocked, got {other:?}"),
        }

        let result = orch
            .resolve(&ResolveRequest::new("Hur lång är uppsägningstiden för mitt hyresavtal?"))
            .await
            .unwrap();
        match result {
            ResolutionResult::Resolved { ranked_chunks, warnings, sources, .. } => {
                assert!(ranked_chunks.iter().all(|r| r.chunk.doc_id != "sfs-1949-381"));
                assert!(warnings.contains("excluded-candidate:vbu:sfs-1949-381-6-2a"));
                assert!(sources.iter().any(|s| s.citation.starts_with("SFS 1970:994 12 kap.")));
                assert!(sources
                    .iter()
                    .any(|s| s.citation == "Holmqvist, Hyreslagen - en kommentar, s. 112"));
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rule_reload_applies_to_next_query() {
        let rules = exclusion_rules();
        let orch = Orchestrator::new(
            &ResolutionConfig::default(),
            MODEL,
            rules.clone(),
            keyword(),
            Arc::new(CountingEmbedder::new(MODEL)),
            Arc::new(tenancy_store()),
        )
        .unwrap();

        let before = orch.resolve(&ResolveRequest::new("skattetillägg")).await.unwrap();
        assert!(!before.is_blocked());

        rules
            .replace(vec![ExclusionRule {
                area_id: "skatterätt".into(),
                label: "Skatterätt".into(),
                statute_patterns: vec!["2011:1244".into()],
                referral_message: "Kontakta Skatteverket.".into(),
                keywords: vec!["skatt".into()],
                aliases: vec![],
                query_patterns: vec![],
            }])
            .unwrap();

        let after = orch.resolve(&ResolveRequest::new("skattetillägg")).await.unwrap();
        assert!(after.is_blocked());
    }

    #[tokio::test]
    async fn test_reported_rule_version_is_the_one_used() {
        let rules = exclusion_rules();
        let orch = Orchestrator::new(
            &ResolutionConfig::default(),
            MODEL,
            rules.clone(),
            Arc::new(ReloadingClassifier(rules.clone())),
            Arc::new(CountingEmbedder::new(MODEL)),
            Arc::new(tenancy_store()),
        )
        .unwrap();

        let (result, rule_version) = orch
            .resolve_versioned(&ResolveRequest::new("uppsägning av hyresavtal"))
            .await
            .unwrap();
        assert!(!result.is_blocked());
        assert_eq!(rule_version, 1);
        assert_eq!(rules.version(), 2);

        let (_, rule_version) = orch
            .resolve_until_versioned(
                &ResolveRequest::new("uppsägning av hyresavtal"),
                std::future::pending(),
            )
            .await
            .unwrap();
        assert_eq!(rule_version, 2);
        assert_eq!(rules.version(), 3);
    }
}
