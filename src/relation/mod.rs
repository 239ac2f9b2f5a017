//! Relation record model: typed, weighted, directed edges between terms.
//!
//! Terms are opaque identifiers owned by the vocabulary subsystem; this
//! module never inspects term content. Each relation type declares its
//! algebraic properties (symmetric, transitive, reflexive), which the rule
//! engine and the store consult for traversal and deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TermGraphError;

/// Relation type vocabulary.
///
/// Closed enumeration: adding a type is a compile-time extension here plus
/// a row in the property methods below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    IsA,
    PartOf,
    RelatedTo,
    EquivalentTo,
}

impl RelationType {
    /// All known types, in declaration order.
    pub const ALL: [RelationType; 4] = [
        RelationType::IsA,
        RelationType::PartOf,
        RelationType::RelatedTo,
        RelationType::EquivalentTo,
    ];

    /// Wire/storage name (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::IsA => "is_a",
            RelationType::PartOf => "part_of",
            RelationType::RelatedTo => "related_to",
            RelationType::EquivalentTo => "equivalent_to",
        }
    }

    /// A symmetric edge is traversable from both ends but persisted once.
    pub fn symmetric(&self) -> bool {
        matches!(self, RelationType::RelatedTo | RelationType::EquivalentTo)
    }

    /// Transitive types participate in chain composition (A→B, B→C ⇒ A→C).
    pub fn transitive(&self) -> bool {
        matches!(
            self,
            RelationType::IsA | RelationType::PartOf | RelationType::EquivalentTo
        )
    }

    /// Reflexive types tolerate source == target; all others reject self-loops.
    pub fn reflexive(&self) -> bool {
        matches!(self, RelationType::EquivalentTo)
    }
}

impl FromStr for RelationType {
    type Err = TermGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "is_a" => Ok(RelationType::IsA),
            "part_of" => Ok(RelationType::PartOf),
            "related_to" => Ok(RelationType::RelatedTo),
            "equivalent_to" => Ok(RelationType::EquivalentTo),
            other => Err(TermGraphError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a relation came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Created directly by a user action (or a confirmed search suggestion).
    Asserted,
    /// Produced by the rule engine from existing edges.
    Inferred,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Asserted => "asserted",
            Provenance::Inferred => "inferred",
        }
    }
}

impl FromStr for Provenance {
    type Err = TermGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asserted" => Ok(Provenance::Asserted),
            "inferred" => Ok(Provenance::Inferred),
            other => Err(TermGraphError::InvalidInput(format!(
                "unknown provenance: {}",
                other
            ))),
        }
    }
}

/// Review status. Provisional edges are invisible to normal query consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Confirmed,
    Provisional,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Confirmed => "confirmed",
            Status::Provisional => "provisional",
        }
    }
}

impl FromStr for Status {
    type Err = TermGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Status::Confirmed),
            "provisional" => Ok(Status::Provisional),
            other => Err(TermGraphError::InvalidInput(format!(
                "unknown status: {}",
                other
            ))),
        }
    }
}

/// One hop of a derivation: the constituent edge and the rule applied there.
///
/// The ordered list of steps is persisted as JSON and is sufficient to
/// re-validate the derivation without re-running inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationStep {
    /// Id of the existing relation used at this hop.
    pub relation_id: String,
    /// Rule name applied at this hop, e.g. `transitive`.
    pub rule: String,
}

/// A single relation in the graph (source --relation_type--> target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Unique identifier (UUID v4), assigned at creation, immutable.
    pub relation_id: String,
    /// Source term id, e.g. `term:feline`.
    pub source_term_id: String,
    /// Target term id.
    pub target_term_id: String,
    pub relation_type: RelationType,
    /// Confidence in [0, 1]; 1.0 for human-asserted edges.
    pub confidence: f64,
    pub provenance: Provenance,
    /// Ordered proof chain; empty for asserted edges.
    pub derivation_path: Vec<DerivationStep>,
    pub status: Status,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// The far end of this edge as seen from `term_id`.
    ///
    /// For symmetric types both ends are valid entry points; returns `None`
    /// if `term_id` is on neither end.
    pub fn other_end<'a>(&'a self, term_id: &str) -> Option<&'a str> {
        if self.source_term_id == term_id {
            Some(&self.target_term_id)
        } else if self.target_term_id == term_id {
            Some(&self.source_term_id)
        } else {
            None
        }
    }
}

/// Input for asserting a new relation; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewRelation {
    pub source_term_id: String,
    pub target_term_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub created_by: String,
}

impl NewRelation {
    pub fn new(
        source_term_id: impl Into<String>,
        target_term_id: impl Into<String>,
        relation_type: RelationType,
        confidence: f64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            source_term_id: source_term_id.into(),
            target_term_id: target_term_id.into(),
            relation_type,
            confidence,
            created_by: created_by.into(),
        }
    }

    /// Structural validation applied at the store boundary.
    ///
    /// Rejects out-of-range confidence and self-loops on non-reflexive
    /// types; never silently clamps.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(TermGraphError::InvalidInput(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if self.source_term_id == self.target_term_id && !self.relation_type.reflexive() {
            return Err(TermGraphError::InvalidType(format!(
                "{} does not allow source == target ({})",
                self.relation_type, self.source_term_id
            )));
        }
        if self.source_term_id.is_empty() || self.target_term_id.is_empty() {
            return Err(TermGraphError::InvalidInput(
                "source and target term ids must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serialize a derivation path for the `derivation_path` column.
pub fn derivation_to_json(path: &[DerivationStep]) -> crate::error::Result<String> {
    serde_json::to_string(path)
        .map_err(|e| TermGraphError::InvalidInput(format!("derivation path encode: {}", e)))
}

/// Parse the `derivation_path` column back into an ordered step list.
pub fn derivation_from_json(raw: &str) -> crate::error::Result<Vec<DerivationStep>> {
    serde_json::from_str(raw)
        .map_err(|e| TermGraphError::InvalidInput(format!("derivation path decode: {}", e)))
}
