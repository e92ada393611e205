//! LexForge Common Library
//!
//! Shared code for the LexForge resolver including:
//! - Legal corpus domain model
//! - Corpus store and embedding provider abstractions
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod corpus;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use config::AppConfig;
pub use corpus::{CorpusStore, InMemoryCorpusStore, SearchFilter};
pub use db::{DbPool, PgCorpusStore};
pub use embeddings::{Embedding, EmbeddingProvider};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model for corpus and queries
pub const DEFAULT_EMBEDDING_MODEL: &str = "multilingual-e5-large";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;
