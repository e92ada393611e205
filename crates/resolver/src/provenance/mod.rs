//! Provenance validation
//!
//! Decides which ranked chunks may be released as evidence, attaches a
//! citation to each, and grades the evidence set. Pure computation.

use chrono::NaiveDate;
use lexforge_common::{
    config::ResolutionConfig,
    models::{CitationError, Chunk, ConsolidationSource, DocumentKind, NormLevel, NormalizedDocument},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::retrieval::RankedChunk;

pub const WARN_DOCTRINE_CITATION_MISSING: &str = "doctrine-citation-missing";
pub const WARN_BASE_TEXT: &str = "base-text-amendments-not-merged";
pub const WARN_INSUFFICIENT_SOURCES: &str = "insufficient-source-count";
pub const WARN_INSUFFICIENT_CHUNKS: &str = "insufficient-surviving-chunks";
pub const WARN_STRICT_DOWNGRADE: &str = "strict-rejection-downgrade";
pub const WARN_NO_RESULTS: &str = "no-results";
pub const WARN_ONLY_PERSUASIVE: &str = "only-persuasive-sources";
pub const WARN_SPARSE_RESULTS: &str = "sparse-results";

/// Whether the evidence meets the sourcing guarantees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Sufficient,
    Insufficient,
}

/// Presentation metadata for one accepted chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    pub chunk_id: String,
    pub doc_id: String,
    pub citation: String,
    pub effective_date: NaiveDate,
    pub consolidation_source: ConsolidationSource,
    pub base_text_only: bool,
}

/// Thresholds applied to the accepted chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub validation_window: usize,
    pub min_distinct_sources: usize,
    pub min_surviving_chunks: usize,
    pub sparse_threshold: usize,
    pub strict: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&ResolutionConfig::default())
    }
}

impl From<&ResolutionConfig> for ValidationPolicy {
    fn from(config: &ResolutionConfig) -> Self {
        Self {
            validation_window: config.effective_validation_window(),
            min_distinct_sources: config.min_distinct_sources,
            min_surviving_chunks: config.min_surviving_chunks,
            sparse_threshold: config.sparse_result_threshold,
            strict: config.strict_confidence,
        }
    }
}

/// A chunk withheld from the evidence set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub chunk_id: String,
    pub reason: CitationError,
}

/// Validated evidence set
#[derive(Debug, Clone)]
pub struct Validation {
    /// Accepted chunks in ranked order
    pub accepted: Vec<RankedChunk>,
    /// One entry per accepted chunk, same order
    pub sources: Vec<SourceReference>,
    pub rejected: Vec<Rejection>,
    pub confidence: Confidence,
    pub warnings: BTreeSet<String>,
}

fn is_doctrine(chunk: &Chunk, doc: &NormalizedDocument) -> bool {
    doc.is_doctrine() || chunk.norm_level == NormLevel::Doctrine
}

/// Citation shown next to a passage.
///
/// Doctrine renders its template and fails when it cannot. Statutes and
/// regulations cite `SFS <ref> [<chapter> kap.] [<section> §]`; anything
/// else cites its statute reference or, lacking one, the document id.
pub fn citation_for(chunk: &Chunk, doc: &NormalizedDocument) -> Result<String, CitationError> {
    if is_doctrine(chunk, doc) {
        let meta = doc.doctrine.as_ref().ok_or(CitationError::MissingAuthor)?;
        return meta.render_citation(chunk.page.as_deref());
    }

    let statutory = matches!(doc.kind(), DocumentKind::Statute | DocumentKind::Regulation);
    if statutory {
        if let Some(citation) = chunk.statute_citation() {
            return Ok(citation);
        }
    }

    Ok(chunk
        .statute_reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| doc.id())
        .to_string())
}

/// Apply provenance rules to ranked (and already gated) candidates
pub fn validate(ranked: Vec<RankedChunk>, policy: &ValidationPolicy) -> Validation {
    let mut warnings = BTreeSet::new();
    let mut accepted = Vec::with_capacity(ranked.len());
    let mut sources = Vec::with_capacity(ranked.len());
    let mut rejected = Vec::new();

    if ranked.is_empty() {
        warnings.insert(WARN_NO_RESULTS.to_string());
    }

    for candidate in ranked {
        let doc = candidate.document.clone();
        let citation = match citation_for(&candidate.chunk, &doc) {
            Ok(citation) => citation,
            Err(reason) => {
                debug!(
                    chunk_id = %candidate.chunk.chunk_id,
                    doc_id = %doc.id(),
                    reason = %reason,
                    "Rejected doctrine chunk without renderable citation"
                );
                warnings.insert(format!(
                    "{}:{}",
                    WARN_DOCTRINE_CITATION_MISSING, candidate.chunk.chunk_id
                ));
                rejected.push(Rejection {
                    chunk_id: candidate.chunk.chunk_id.clone(),
                    reason,
                });
                continue;
            }
        };

        if doc.is_base_text() && !is_doctrine(&candidate.chunk, &doc) {
            warnings.insert(format!("{}:{}", WARN_BASE_TEXT, doc.id()));
        }

        sources.push(SourceReference {
            chunk_id: candidate.chunk.chunk_id.clone(),
            doc_id: candidate.chunk.doc_id.clone(),
            citation,
            effective_date: doc.effective_date,
            consolidation_source: doc.consolidation_source,
            base_text_only: doc.is_base_text(),
        });
        accepted.push(candidate);
    }

    let mut confidence = Confidence::Sufficient;

    let distinct_sources = accepted
        .iter()
        .take(policy.validation_window)
        .map(|c| c.chunk.doc_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    if distinct_sources < policy.min_distinct_sources {
        confidence = Confidence::Insufficient;
        warnings.insert(WARN_INSUFFICIENT_SOURCES.to_string());
    }

    if accepted.len() < policy.min_surviving_chunks {
        confidence = Confidence::Insufficient;
        warnings.insert(WARN_INSUFFICIENT_CHUNKS.to_string());
    }

    if policy.strict && !rejected.is_empty() {
        confidence = Confidence::Insufficient;
        warnings.insert(WARN_STRICT_DOWNGRADE.to_string());
    }

    if !accepted.is_empty() && accepted.len() < policy.sparse_threshold {
        warnings.insert(WARN_SPARSE_RESULTS.to_string());
    }

    if !accepted.is_empty() && accepted.iter().all(|c| c.norm_level().is_persuasive()) {
        warnings.insert(WARN_ONLY_PERSUASIVE.to_string());
    }

    Validation {
        accepted,
        sources,
        rejected,
        confidence,
        warnings,
    }
}
