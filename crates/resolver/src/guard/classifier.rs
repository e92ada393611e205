//! Area classification
//!
//! Decides whether a query belongs to an excluded legal area. Any strategy
//! (rule-based or learned) plugs in behind [`AreaClassifier`].

use async_trait::async_trait;
use lexforge_common::errors::Result;
use tracing::debug;

use crate::rules::{CompiledRule, RuleSet};

/// Maps a query to the excluded area it belongs to, if any
#[async_trait]
pub trait AreaClassifier: Send + Sync {
    /// `Ok(None)` means the query is outside every excluded area.
    async fn classify(&self, query: &str, rules: &RuleSet) -> Result<Option<String>>;
}

/// Rule-based classifier over keywords, aliases and query patterns.
///
/// Fail-closed: permitted vocabulary in the query never cancels a hit on an
/// excluded area.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Number of vocabulary hits of `rule` in an already lowercased query
    pub fn hits(rule: &CompiledRule, lowered: &str) -> usize {
        let keyword_hits = rule.keywords().iter().filter(|k| lowered.contains(k.as_str())).count();
        let alias_hits = rule.aliases().iter().filter(|a| lowered.contains(a.as_str())).count();
        let pattern_hits = rule.patterns().iter().filter(|p| p.is_match(lowered)).count();
        keyword_hits + alias_hits + pattern_hits
    }

    /// Best-matching area; ties go to the rule listed first
    pub fn best_match<'a>(query: &str, rules: &'a RuleSet) -> Option<&'a CompiledRule> {
        let lowered = query.to_lowercase();
        let mut best: Option<(&CompiledRule, usize)> = None;

        for rule in rules.rules() {
            let hits = Self::hits(rule, &lowered);
            if hits == 0 {
                continue;
            }
            match best {
                Some((_, top)) if top >= hits => {}
                _ => best = Some((rule, hits)),
            }
        }

        if let Some((rule, hits)) = best {
            debug!(area_id = rule.area_id(), hits, "Query matched excluded area");
        }
        best.map(|(rule, _)| rule)
    }
}

#[async_trait]
impl AreaClassifier for KeywordClassifier {
    async fn classify(&self, query: &str, rules: &RuleSet) -> Result<Option<String>> {
        Ok(Self::best_match(query, rules).map(|r| r.area_id().to_string()))
    }
}
