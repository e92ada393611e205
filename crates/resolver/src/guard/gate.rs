//! Exclusion gate
//!
//! Exclusion is a hard ceiling, never a ranking penalty: a blocked query gets
//! its referral and nothing else, and an excluded candidate never reaches the
//! evidence set whatever its score.

use lexforge_common::{
    errors::{AppError, Result},
    metrics,
};
use std::collections::BTreeMap;
use tracing::warn;

use crate::retrieval::RankedChunk;
use crate::rules::RuleSet;

/// Outcome of the query-level check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryDecision {
    Clear,
    Blocked {
        area_id: String,
        referral_message: String,
    },
}

/// Map a classifier verdict to a decision using the same rule snapshot.
///
/// An area id missing from the snapshot has no referral to give and is
/// reported as a classification failure.
pub fn check_query(area_id: Option<&str>, rules: &RuleSet) -> Result<QueryDecision> {
    let Some(area_id) = area_id else {
        return Ok(QueryDecision::Clear);
    };

    let rule = rules.get(area_id).ok_or_else(|| AppError::ClassificationFailure {
        message: format!(
            "classifier returned unknown area '{}' (rule set v{})",
            area_id,
            rules.version()
        ),
    })?;

    Ok(QueryDecision::Blocked {
        area_id: rule.area_id.clone(),
        referral_message: rule.referral_message.clone(),
    })
}

/// Candidates left after the candidate-level check
#[derive(Debug, Default)]
pub struct CandidateFilter {
    pub kept: Vec<RankedChunk>,
    pub warnings: Vec<String>,
}

/// Drop every candidate whose statute reference falls under an excluded
/// area. Order of the kept candidates is preserved.
pub fn filter_candidates(ranked: Vec<RankedChunk>, rules: &RuleSet) -> CandidateFilter {
    let mut outcome = CandidateFilter::default();
    let mut per_area: BTreeMap<&str, usize> = BTreeMap::new();

    for candidate in ranked {
        let excluded_by = candidate.chunk.statute_reference.as_deref().and_then(|reference| {
            rules.rules().iter().find_map(|rule| {
                rule.rule()
                    .matching_statute_pattern(reference)
                    .map(|pattern| (rule.area_id(), pattern))
            })
        });

        match excluded_by {
            Some((area_id, pattern)) => {
                warn!(
                    area_id,
                    pattern,
                    chunk_id = %candidate.chunk.chunk_id,
                    score = candidate.score,
                    "Dropped candidate from excluded area"
                );
                outcome
                    .warnings
                    .push(format!("excluded-candidate:{}:{}", area_id, candidate.chunk.chunk_id));
                *per_area.entry(area_id).or_default() += 1;
            }
            None => outcome.kept.push(candidate),
        }
    }

    for (area_id, count) in per_area {
        metrics::record_candidates_excluded(area_id, count);
    }

    outcome
}
