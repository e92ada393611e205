//! Domain model for the legal corpus
//!
//! Documents and chunks are written by the ingestion stage and only read
//! here; exclusion rules come from configuration.

mod chunk;
mod document;
mod exclusion;
mod norm;

pub use chunk::{Chunk, ScoredChunk};
pub use document::{
    content_digest, Author, CitationError, ConsolidationSource, DoctrineMetadata, Document,
    DocumentKind, NormalizedDocument,
};
pub use exclusion::ExclusionRule;
pub use norm::{NormLevel, UnknownNormLevel};
