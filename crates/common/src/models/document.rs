//! Source documents as produced by the normalization stage

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::NormLevel;

/// Kind of legal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    Statute,
    CaseLaw,
    PreparatoryWork,
    Regulation,
    Doctrine,
}

/// Where a statute's consolidated text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsolidationSource {
    /// Merged text from the authoritative register
    AuthoritativeRegister,
    /// Base text; amendments are listed separately and not merged
    None,
}

impl ConsolidationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationSource::AuthoritativeRegister => "authoritative-register",
            ConsolidationSource::None => "none",
        }
    }
}

/// Immutable fetched document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kind: DocumentKind,
    pub source_url: String,
    /// Hex SHA-256 of the raw content
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    /// True when `raw` no longer hashes to the stored digest. Stored digests
    /// may be upper-case hex.
    pub fn has_drifted(&self, raw: &[u8]) -> bool {
        !content_digest(raw).eq_ignore_ascii_case(self.content_hash.trim())
    }
}

/// Lowercase hex SHA-256 digest of raw document content
pub fn content_digest(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// Author of a doctrinal work
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
}

/// Bibliographic metadata required for doctrine sources
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoctrineMetadata {
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub work_title: String,
    /// Template over `{author}`, `{work}` and `{page}`
    #[serde(default)]
    pub citation_format: String,
}

/// Reasons a doctrine citation cannot be rendered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CitationError {
    #[error("author name is empty")]
    MissingAuthor,
    #[error("work title is empty")]
    MissingWorkTitle,
    #[error("citation template is empty")]
    EmptyTemplate,
    #[error("citation template must reference {{author}} and {{work}}")]
    IncompleteTemplate,
    #[error("citation template references {{page}} but no page is known")]
    MissingPage,
    #[error("unknown placeholder {{{0}}} in citation template")]
    UnknownPlaceholder(String),
    #[error("unbalanced braces in citation template")]
    Malformed,
}

impl DoctrineMetadata {
    /// Fill the citation template for a passage located at `page`
    pub fn render_citation(&self, page: Option<&str>) -> Result<String, CitationError> {
        let author = self.author.name.trim();
        let work = self.work_title.trim();
        let template = self.citation_format.trim();

        if author.is_empty() {
            return Err(CitationError::MissingAuthor);
        }
        if work.is_empty() {
            return Err(CitationError::MissingWorkTitle);
        }
        if template.is_empty() {
            return Err(CitationError::EmptyTemplate);
        }
        if !template.contains("{author}") || !template.contains("{work}") {
            return Err(CitationError::IncompleteTemplate);
        }

        let mut out = String::with_capacity(template.len() + author.len() + work.len());
        let mut rest = template;

        while let Some(open) = rest.find(['{', '}']) {
            if rest.as_bytes()[open] == b'}' {
                return Err(CitationError::Malformed);
            }
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or(CitationError::Malformed)?;
            let name = &after[..close];
            match name {
                "author" => out.push_str(author),
                "work" => out.push_str(work),
                "page" => {
                    let page = page
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .ok_or(CitationError::MissingPage)?;
                    out.push_str(page);
                }
                other if other.contains('{') => return Err(CitationError::Malformed),
                other => return Err(CitationError::UnknownPlaceholder(other.to_string())),
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// Document after normalization into the canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub norm_level: NormLevel,
    pub effective_date: NaiveDate,
    pub consolidation_source: ConsolidationSource,
    /// Present for doctrine documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctrine: Option<DoctrineMetadata>,
}

impl NormalizedDocument {
    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn kind(&self) -> DocumentKind {
        self.document.kind
    }

    pub fn is_doctrine(&self) -> bool {
        self.document.kind == DocumentKind::Doctrine || self.norm_level == NormLevel::Doctrine
    }

    /// Base text whose amendments have not been merged
    pub fn is_base_text(&self) -> bool {
        self.consolidation_source == ConsolidationSource::None
    }
}
