//! Retrievable passages with embedding provenance

use serde::{Deserialize, Serialize};

use super::NormLevel;

/// A stored passage of a document.
///
/// Chunks reference their document by id and are stored separately from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,

    pub doc_id: String,

    /// Model that produced this chunk's vector
    pub embedding_model: String,

    /// Copied from the parent document for filter locality
    pub norm_level: NormLevel,

    /// Statute number, e.g. `1970:994` or `1949:381_kap6`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statute_reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Page locator, used by doctrine citations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,

    #[serde(default)]
    pub text: String,
}

impl Chunk {
    /// Human-readable statute citation, e.g. `SFS 1970:994 12 kap. 4 §`
    pub fn statute_citation(&self) -> Option<String> {
        let reference = self.statute_reference.as_deref()?.trim();
        if reference.is_empty() {
            return None;
        }
        let mut out = format!("SFS {}", reference);
        if let Some(chapter) = self.chapter.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!(" {} kap.", chapter));
        }
        if let Some(section) = self.section.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(&format!(" {} §", section));
        }
        Some(out)
    }
}

/// Chunk paired with its raw similarity from the corpus store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}
