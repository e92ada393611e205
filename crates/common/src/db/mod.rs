//! Postgres corpus backend
//!
//! Provides:
//! - Connection pool management
//! - pgvector similarity search over the `chunks` table
//! - Document lookup joined with doctrine metadata
//!
//! Tables are owned by the ingestion pipeline; this module never writes.

use crate::config::DatabaseConfig;
use crate::corpus::{CorpusStore, SearchFilter};
use crate::errors::{AppError, Result};
use crate::models::{
    Author, Chunk, ConsolidationSource, DoctrineMetadata, Document, DocumentKind, NormLevel,
    NormalizedDocument, ScoredChunk,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult,
    Statement,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to corpus database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::StoreUnavailable {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::StoreUnavailable {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Convert a vector to pgvector text format "[1.0,2.0,...]"
pub fn vector_literal(vector: &[f32]) -> String {
    format!(
        "[{}]",
        vector
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Similarity search statement; `$4` is bound only when a level filter is set
fn search_statement(vector: &[f32], filter: &SearchFilter, k: usize) -> Statement {
    let level_filter = filter
        .norm_level
        .map(|_| "AND c.norm_level = $4")
        .unwrap_or("");

    let sql = format!(
        r#"
        SELECT
            c.chunk_id,
            c.doc_id,
            c.embedding_model,
            c.norm_level,
            c.statute_reference,
            c.chapter,
            c.section,
            c.page,
            c.text,
            1 - (c.embedding <=> $1::vector) as similarity
        FROM chunks c
        WHERE c.embedding IS NOT NULL
          AND c.embedding_model = $3
        {}
        ORDER BY c.embedding <=> $1::vector, c.chunk_id
        LIMIT $2
        "#,
        level_filter
    );

    let mut values: Vec<sea_orm::Value> = vec![
        vector_literal(vector).into(),
        (k as i64).into(),
        filter.embedding_model.clone().into(),
    ];
    if let Some(level) = filter.norm_level {
        values.push(level.as_str().into());
    }

    Statement::from_sql_and_values(DbBackend::Postgres, &sql, values)
}

fn document_statement(doc_id: &str) -> Statement {
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        SELECT
            d.id,
            d.kind,
            d.source_url,
            d.content_hash,
            d.fetched_at,
            d.norm_level,
            d.effective_date,
            d.consolidation_source,
            m.author_name,
            m.work_title,
            m.citation_format
        FROM documents d
        LEFT JOIN doctrine_metadata m ON m.doc_id = d.id
        WHERE d.id = $1
        "#,
        vec![doc_id.into()],
    )
}

fn row_error(message: String) -> AppError {
    AppError::StoreUnavailable { message }
}

fn parse_level(raw: &str) -> Result<NormLevel> {
    NormLevel::from_str(raw).map_err(|e| row_error(e.to_string()))
}

fn parse_kind(raw: &str) -> Result<DocumentKind> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| row_error(format!("unknown document kind '{}'", raw)))
}

fn parse_consolidation(raw: &str) -> ConsolidationSource {
    match raw {
        "authoritative-register" | "authoritative_register" => {
            ConsolidationSource::AuthoritativeRegister
        }
        _ => ConsolidationSource::None,
    }
}

/// Column values of one search hit, before domain validation
#[derive(Debug, Clone)]
struct ChunkRow {
    chunk_id: String,
    doc_id: String,
    embedding_model: String,
    norm_level: String,
    statute_reference: Option<String>,
    chapter: Option<String>,
    section: Option<String>,
    page: Option<String>,
    text: String,
    similarity: f64,
}

impl ChunkRow {
    fn read(row: &QueryResult) -> Result<Self> {
        Ok(Self {
            chunk_id: row.try_get("", "chunk_id")?,
            doc_id: row.try_get("", "doc_id")?,
            embedding_model: row.try_get("", "embedding_model")?,
            norm_level: row.try_get("", "norm_level")?,
            statute_reference: row.try_get("", "statute_reference")?,
            chapter: row.try_get("", "chapter")?,
            section: row.try_get("", "section")?,
            page: row.try_get("", "page")?,
            text: row.try_get("", "text")?,
            similarity: row.try_get("", "similarity")?,
        })
    }

    /// A row that cannot become a chunk fails the whole search
    fn into_scored(self) -> Result<ScoredChunk> {
        let norm_level =
            NormLevel::from_str(&self.norm_level).map_err(|e| AppError::CorpusIntegrity {
                chunk_id: self.chunk_id.clone(),
                doc_id: self.doc_id.clone(),
                reason: e.to_string(),
            })?;

        Ok(ScoredChunk {
            chunk: Chunk {
                chunk_id: self.chunk_id,
                doc_id: self.doc_id,
                embedding_model: self.embedding_model,
                norm_level,
                statute_reference: self.statute_reference,
                chapter: self.chapter,
                section: self.section,
                page: self.page,
                text: self.text,
            },
            similarity: self.similarity as f32,
        })
    }
}

fn row_to_document(row: &QueryResult) -> Result<NormalizedDocument> {
    let kind: String = row.try_get("", "kind")?;
    let level: String = row.try_get("", "norm_level")?;
    let consolidation: String = row.try_get("", "consolidation_source")?;
    let fetched_at: DateTime<Utc> = row.try_get("", "fetched_at")?;
    let effective_date: NaiveDate = row.try_get("", "effective_date")?;

    let author_name: Option<String> = row.try_get("", "author_name")?;
    let work_title: Option<String> = row.try_get("", "work_title")?;
    let citation_format: Option<String> = row.try_get("", "citation_format")?;

    let doctrine = if author_name.is_some() || work_title.is_some() || citation_format.is_some() {
        Some(DoctrineMetadata {
            author: Author {
                name: author_name.unwrap_or_default(),
            },
            work_title: work_title.unwrap_or_default(),
            citation_format: citation_format.unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(NormalizedDocument {
        document: Document {
            id: row.try_get("", "id")?,
            kind: parse_kind(&kind)?,
            source_url: row.try_get("", "source_url")?,
            content_hash: row.try_get("", "content_hash")?,
            fetched_at,
        },
        norm_level: parse_level(&level)?,
        effective_date,
        consolidation_source: parse_consolidation(&consolidation),
        doctrine,
    })
}

/// Corpus store backed by Postgres + pgvector
#[derive(Clone)]
pub struct PgCorpusStore {
    pool: DbPool,
}

impl PgCorpusStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorpusStore for PgCorpusStore {
    async fn get(&self, doc_id: &str) -> Result<Option<NormalizedDocument>> {
        let row = self.pool.conn().query_one(document_statement(doc_id)).await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = self
            .pool
            .conn()
            .query_all(search_statement(vector, filter, k))
            .await?;

        rows.iter()
            .map(|row| ChunkRow::read(row)?.into_scored())
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
