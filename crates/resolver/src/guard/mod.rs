//! Excluded-area guard: query classification and candidate gating

mod classifier;
mod gate;

pub use classifier::{AreaClassifier, KeywordClassifier};
pub use gate::{check_query, filter_candidates, CandidateFilter, QueryDecision};
