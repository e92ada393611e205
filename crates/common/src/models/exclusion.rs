//! Excluded legal areas

use serde::{Deserialize, Serialize};

/// A legal area the service refuses to answer, with its referral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    #[serde(alias = "id")]
    pub area_id: String,

    pub label: String,

    /// Statute-reference prefixes belonging to the area
    #[serde(default, alias = "sfs_patterns")]
    pub statute_patterns: Vec<String>,

    /// Shown verbatim to blocked users
    #[serde(alias = "message")]
    pub referral_message: String,

    /// Lowercase substrings that place a query in the area
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Alternative names of the area
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Regular expressions matched against the lowercased query
    #[serde(default)]
    pub query_patterns: Vec<String>,
}

impl ExclusionRule {
    /// First statute pattern that `reference` falls under, if any.
    ///
    /// Patterns are prefixes: `1949:381_kap6` covers `1949:381_kap6_3§`
    /// but not the bare act `1949:381`.
    pub fn matching_statute_pattern(&self, reference: &str) -> Option<&str> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        self.statute_patterns
            .iter()
            .map(|p| p.trim())
            .find(|p| !p.is_empty() && reference.starts_with(p))
    }

    pub fn matches_statute(&self, reference: &str) -> bool {
        self.matching_statute_pattern(reference).is_some()
    }
}
