//! Read-only access to the normalized corpus
//!
//! The resolver only ever reads documents and chunks. Two adapters exist:
//! an in-memory store loaded from a JSON fixture, and the Postgres store in
//! [`crate::db`].

use crate::errors::{AppError, Result};
use crate::models::{Chunk, NormLevel, NormalizedDocument, ScoredChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Restricts a similarity search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only chunks of this level
    pub norm_level: Option<NormLevel>,
    /// Only chunks embedded with this model
    pub embedding_model: String,
}

/// Corpus store collaborator
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Fetch a normalized document by id
    async fn get(&self, doc_id: &str) -> Result<Option<NormalizedDocument>>;

    /// Up to `k` chunks matching `filter`, most similar first
    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// Stored chunk with its vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// On-disk fixture layout
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CorpusFixture {
    #[serde(default)]
    pub documents: Vec<NormalizedDocument>,
    #[serde(default)]
    pub chunks: Vec<StoredChunk>,
}

/// In-memory corpus with brute-force cosine search
#[derive(Default)]
pub struct InMemoryCorpusStore {
    documents: HashMap<String, NormalizedDocument>,
    chunks: Vec<StoredChunk>,
}

impl InMemoryCorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: CorpusFixture) -> Self {
        let mut store = Self::new();
        for doc in fixture.documents {
            store.insert_document(doc);
        }
        for chunk in fixture.chunks {
            store.insert_chunk(chunk.chunk, chunk.embedding);
        }
        store
    }

    /// Load a JSON fixture from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| AppError::Configuration {
            message: format!("Failed to read corpus fixture {}: {}", path.display(), e),
        })?;
        let fixture: CorpusFixture = serde_json::from_str(&raw)?;

        info!(
            path = %path.display(),
            documents = fixture.documents.len(),
            chunks = fixture.chunks.len(),
            "Loaded corpus fixture"
        );

        Ok(Self::from_fixture(fixture))
    }

    pub fn insert_document(&mut self, doc: NormalizedDocument) {
        self.documents.insert(doc.id().to_string(), doc);
    }

    pub fn insert_chunk(&mut self, chunk: Chunk, embedding: Vec<f32>) {
        self.chunks.push(StoredChunk { chunk, embedding });
    }

    pub fn into_shared(self) -> Arc<dyn CorpusStore> {
        Arc::new(self)
    }
}

/// Cosine similarity; zero for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl CorpusStore for InMemoryCorpusStore {
    async fn get(&self, doc_id: &str) -> Result<Option<NormalizedDocument>> {
        Ok(self.documents.get(doc_id).cloned())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut hits: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .filter(|c| c.chunk.embedding_model == filter.embedding_model)
            .filter(|c| filter.norm_level.map_or(true, |level| c.chunk.norm_level == level))
            .map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                similarity: cosine_similarity(vector, &c.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
