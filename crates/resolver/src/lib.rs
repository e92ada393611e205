//! LexForge Resolver
//!
//! Turns a legal question into a ranked, provenance-checked evidence set:
//! - Excluded-area classification and referral
//! - Norm-hierarchy boosted retrieval
//! - Candidate-level exclusion gating
//! - Provenance validation and confidence grading

pub mod guard;
pub mod orchestrator;
pub mod provenance;
pub mod retrieval;
pub mod rules;

pub use orchestrator::{Orchestrator, ResolutionResult, ResolveRequest};
pub use provenance::{Confidence, SourceReference};
pub use rules::{RuleRegistry, RuleSet};
