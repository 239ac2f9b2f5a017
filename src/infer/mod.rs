//! Inference: rule engine and traversal orchestrator.

pub mod orchestrator;
pub mod rules;

use serde::Serialize;

use crate::relation::{DerivationStep, RelationType};

pub use orchestrator::{infer, reinfer_all, revalidate, InferOptions, ReinferReport, RevalidationReport};
pub use rules::{apply_rules, Candidate, PathArena, Rule};

/// A fully-materialized inference candidate, as returned to callers and
/// written to the provisional queue.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateRelation {
    pub source_term_id: String,
    pub target_term_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    /// Ordered proof chain over persisted relations.
    pub derivation_path: Vec<DerivationStep>,
}

impl CandidateRelation {
    /// Human-readable rule chain, e.g. `transitive -> transitive`.
    pub fn rule_chain(&self) -> String {
        self.derivation_path
            .iter()
            .map(|s| s.rule.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
