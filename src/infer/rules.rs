//! Rule engine: pure composition of relations into candidate relations.
//!
//! `apply_rules` maps an evidence set (persisted relations plus candidates
//! derived earlier in the same traversal) to new candidates. It never
//! touches storage; the orchestrator owns traversal, persistence, and
//! store-level dedup.
//!
//! Proof chains live in a [`PathArena`]: parent-linked segments referenced
//! by index, so extending a chain is one push and candidates share prefixes
//! instead of deep-copying path lists. Per-path visited checks walk the
//! parent links of that chain only; the same term may legitimately appear
//! in two independent derivations.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::TermGraphError;
use crate::relation::{DerivationStep, Relation, RelationType};

/// Inference rules. Closed enum: adding a rule is a compile-time extension,
/// not a string-keyed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// A→B, B→C (same transitive type) ⇒ A→C.
    Transitive,
    /// Symmetric-type edges are traversable from both ends. Enables reverse
    /// orientation for the other rules; emits no candidates itself and
    /// never materializes a reverse edge.
    Symmetric,
    /// A equivalent_to B, B→C (transitive-eligible type) ⇒ A→C.
    EquivalencePropagation,
}

impl Rule {
    pub const ALL: [Rule; 3] = [Rule::Transitive, Rule::Symmetric, Rule::EquivalencePropagation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Transitive => "transitive",
            Rule::Symmetric => "symmetric",
            Rule::EquivalencePropagation => "equivalence",
        }
    }
}

impl FromStr for Rule {
    type Err = TermGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transitive" => Ok(Rule::Transitive),
            "symmetric" => Ok(Rule::Symmetric),
            "equivalence" => Ok(Rule::EquivalencePropagation),
            other => Err(TermGraphError::InvalidInput(format!(
                "unknown rule: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arena of proof-path segments, shared across the hops of one traversal.
#[derive(Debug, Default)]
pub struct PathArena {
    segments: Vec<Segment>,
}

#[derive(Debug)]
struct Segment {
    relation_id: String,
    rule: Rule,
    /// Term on the far side of this constituent edge; consulted by the
    /// per-path cycle check.
    reached: String,
    parent: Option<usize>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, parent: Option<usize>, relation_id: &str, rule: Rule, reached: &str) -> usize {
        self.segments.push(Segment {
            relation_id: relation_id.to_string(),
            rule,
            reached: reached.to_string(),
            parent,
        });
        self.segments.len() - 1
    }

    /// Append a copy of the chain ending at `tail` onto `parent`.
    fn replay(&mut self, tail: usize, parent: Option<usize>) -> usize {
        let mut chain = Vec::new();
        let mut cursor = Some(tail);
        while let Some(idx) = cursor {
            chain.push(idx);
            cursor = self.segments[idx].parent;
        }
        let mut new_tail = parent;
        for idx in chain.into_iter().rev() {
            let (relation_id, rule, reached) = {
                let seg = &self.segments[idx];
                (seg.relation_id.clone(), seg.rule, seg.reached.clone())
            };
            new_tail = Some(self.push(new_tail, &relation_id, rule, &reached));
        }
        new_tail.expect("replayed chain is never empty")
    }

    /// Materialize the ordered derivation steps of the chain ending at `tail`.
    pub fn steps(&self, tail: usize) -> Vec<DerivationStep> {
        let mut steps = Vec::new();
        let mut cursor = Some(tail);
        while let Some(idx) = cursor {
            let seg = &self.segments[idx];
            steps.push(DerivationStep {
                relation_id: seg.relation_id.clone(),
                rule: seg.rule.as_str().to_string(),
            });
            cursor = seg.parent;
        }
        steps.reverse();
        steps
    }

    /// Number of constituent edges in the chain ending at `tail`.
    pub fn chain_len(&self, tail: usize) -> usize {
        let mut n = 0;
        let mut cursor = Some(tail);
        while let Some(idx) = cursor {
            n += 1;
            cursor = self.segments[idx].parent;
        }
        n
    }

    fn reached_terms(&self, tail: usize, out: &mut HashSet<String>) {
        let mut cursor = Some(tail);
        while let Some(idx) = cursor {
            let seg = &self.segments[idx];
            out.insert(seg.reached.clone());
            cursor = seg.parent;
        }
    }
}

/// A proposed relation: not persisted, proof chain referenced by arena index.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source_term_id: String,
    pub target_term_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    /// Tail segment of the proof chain in the traversal's [`PathArena`].
    pub tail: usize,
    /// Constituent-edge count (cached from the arena for tie-breaking).
    pub chain_len: usize,
    /// Earliest `created_at` among constituent edges (final tie-break).
    pub earliest_created: DateTime<Utc>,
}

impl Candidate {
    pub fn steps(&self, arena: &PathArena) -> Vec<DerivationStep> {
        arena.steps(self.tail)
    }
}

/// Dedup key: symmetric-type candidates are the same logical edge in either
/// direction, so their key is order-independent.
fn edge_key(source: &str, target: &str, ty: RelationType) -> (String, String, RelationType) {
    if ty.symmetric() && target < source {
        (target.to_string(), source.to_string(), ty)
    } else {
        (source.to_string(), target.to_string(), ty)
    }
}

#[derive(Clone, Copy)]
enum Kind<'a> {
    Base(&'a Relation),
    Derived(&'a Candidate),
}

/// One traversal orientation of an evidence edge.
struct Oriented<'a> {
    from: &'a str,
    to: &'a str,
    ty: RelationType,
    confidence: f64,
    kind: Kind<'a>,
    earliest: DateTime<Utc>,
}

impl<'a> Oriented<'a> {
    /// Every term the underlying proof chain touches (orientation-free).
    fn terms(&self, arena: &PathArena) -> HashSet<String> {
        let mut set = HashSet::new();
        match self.kind {
            Kind::Base(rel) => {
                set.insert(rel.source_term_id.clone());
                set.insert(rel.target_term_id.clone());
            }
            Kind::Derived(cand) => {
                set.insert(cand.source_term_id.clone());
                arena.reached_terms(cand.tail, &mut set);
            }
        }
        set
    }
}

fn compose(
    arena: &mut PathArena,
    left: &Oriented<'_>,
    right: &Oriented<'_>,
    left_terms: &HashSet<String>,
    right_terms: &HashSet<String>,
    rule: Rule,
    result_type: RelationType,
    decay: f64,
) -> Option<Candidate> {
    // Cycle guard: the two proof chains may meet only at the junction term.
    // This covers self-loops (source == target puts the term in both sets)
    // and any revisit of a term already on the path.
    let junction = left.to;
    if left_terms
        .intersection(right_terms)
        .any(|t| t != junction)
    {
        return None;
    }

    let confidence = left.confidence * right.confidence * decay;

    let left_tail = match left.kind {
        Kind::Base(rel) => arena.push(None, &rel.relation_id, rule, left.to),
        Kind::Derived(cand) => cand.tail,
    };
    let tail = match right.kind {
        Kind::Base(rel) => arena.push(Some(left_tail), &rel.relation_id, rule, right.to),
        Kind::Derived(cand) => arena.replay(cand.tail, Some(left_tail)),
    };

    Some(Candidate {
        source_term_id: left.from.to_string(),
        target_term_id: right.to.to_string(),
        relation_type: result_type,
        confidence,
        tail,
        chain_len: arena.chain_len(tail),
        earliest_created: left.earliest.min(right.earliest),
    })
}

/// Apply the given rules to the evidence set.
///
/// `frontier` is the persisted edges accumulated so far; `derived` the
/// candidates from earlier hops of the same traversal (composable but not
/// persisted). Returns the traversal's full candidate set: `derived` seeds
/// it, and among candidates for the same key the highest confidence wins,
/// ties broken by shortest chain, then earliest-created constituent.
/// Candidates duplicating a persisted edge are suppressed.
pub fn apply_rules(
    frontier: &[Relation],
    derived: &[Candidate],
    rules: &[Rule],
    decay: f64,
    arena: &mut PathArena,
) -> Vec<Candidate> {
    let symmetric_enabled = rules.contains(&Rule::Symmetric);

    // Orient the evidence: every edge forward, symmetric types backward too.
    let mut oriented: Vec<Oriented<'_>> = Vec::new();
    for rel in frontier {
        oriented.push(Oriented {
            from: &rel.source_term_id,
            to: &rel.target_term_id,
            ty: rel.relation_type,
            confidence: rel.confidence,
            kind: Kind::Base(rel),
            earliest: rel.created_at,
        });
        if symmetric_enabled
            && rel.relation_type.symmetric()
            && rel.source_term_id != rel.target_term_id
        {
            oriented.push(Oriented {
                from: &rel.target_term_id,
                to: &rel.source_term_id,
                ty: rel.relation_type,
                confidence: rel.confidence,
                kind: Kind::Base(rel),
                earliest: rel.created_at,
            });
        }
    }
    for cand in derived {
        oriented.push(Oriented {
            from: &cand.source_term_id,
            to: &cand.target_term_id,
            ty: cand.relation_type,
            confidence: cand.confidence,
            kind: Kind::Derived(cand),
            earliest: cand.earliest_created,
        });
        if symmetric_enabled && cand.relation_type.symmetric() {
            oriented.push(Oriented {
                from: &cand.target_term_id,
                to: &cand.source_term_id,
                ty: cand.relation_type,
                confidence: cand.confidence,
                kind: Kind::Derived(cand),
                earliest: cand.earliest_created,
            });
        }
    }

    let term_sets: Vec<HashSet<String>> = oriented.iter().map(|o| o.terms(arena)).collect();

    let mut by_from: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, fact) in oriented.iter().enumerate() {
        by_from.entry(fact.from).or_default().push(idx);
    }

    // Keys already persisted: proposing them again is wasted traversal
    // state. Derived candidates instead seed the best-map below, so a
    // better path found this hop replaces an earlier one for the same key.
    let existing: HashSet<(String, String, RelationType)> = oriented
        .iter()
        .filter(|o| matches!(o.kind, Kind::Base(_)))
        .map(|o| edge_key(o.from, o.to, o.ty))
        .collect();

    // Highest confidence wins; ties by shortest chain, then earliest
    // constituent.
    fn outranks(cand: &Candidate, held: &Candidate) -> bool {
        if cand.confidence != held.confidence {
            return cand.confidence > held.confidence;
        }
        if cand.chain_len != held.chain_len {
            return cand.chain_len < held.chain_len;
        }
        cand.earliest_created < held.earliest_created
    }

    let mut best: HashMap<(String, String, RelationType), Candidate> = derived
        .iter()
        .map(|c| {
            (
                edge_key(&c.source_term_id, &c.target_term_id, c.relation_type),
                c.clone(),
            )
        })
        .collect();
    let mut consider = |cand: Candidate| {
        let key = edge_key(&cand.source_term_id, &cand.target_term_id, cand.relation_type);
        if existing.contains(&key) {
            return;
        }
        match best.get(&key) {
            Some(held) if !outranks(&cand, held) => {}
            _ => {
                best.insert(key, cand);
            }
        }
    };

    for rule in rules {
        match rule {
            Rule::Symmetric => {}
            Rule::Transitive => {
                for (i, left) in oriented.iter().enumerate() {
                    if !left.ty.transitive() {
                        continue;
                    }
                    let Some(joins) = by_from.get(left.to) else {
                        continue;
                    };
                    for &j in joins {
                        if i == j {
                            continue;
                        }
                        let right = &oriented[j];
                        if right.ty != left.ty {
                            continue;
                        }
                        if let Some(cand) = compose(
                            arena,
                            left,
                            right,
                            &term_sets[i],
                            &term_sets[j],
                            Rule::Transitive,
                            left.ty,
                            decay,
                        ) {
                            consider(cand);
                        }
                    }
                }
            }
            Rule::EquivalencePropagation => {
                for (i, left) in oriented.iter().enumerate() {
                    if left.ty != RelationType::EquivalentTo {
                        continue;
                    }
                    let Some(joins) = by_from.get(left.to) else {
                        continue;
                    };
                    for &j in joins {
                        if i == j {
                            continue;
                        }
                        let right = &oriented[j];
                        // Equivalence chains themselves are covered by the
                        // transitive rule.
                        if !right.ty.transitive() || right.ty == RelationType::EquivalentTo {
                            continue;
                        }
                        if let Some(cand) = compose(
                            arena,
                            left,
                            right,
                            &term_sets[i],
                            &term_sets[j],
                            Rule::EquivalencePropagation,
                            right.ty,
                            decay,
                        ) {
                            consider(cand);
                        }
                    }
                }
            }
        }
    }

    let mut out: Vec<Candidate> = best
        .into_iter()
        .filter(|(key, _)| !existing.contains(key))
        .map(|(_, cand)| cand)
        .collect();
    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chain_len.cmp(&b.chain_len))
            .then(a.earliest_created.cmp(&b.earliest_created))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{Provenance, Status};
    use chrono::TimeZone;

    fn edge_at(
        id: &str,
        source: &str,
        target: &str,
        ty: RelationType,
        confidence: f64,
        created_secs: i64,
    ) -> Relation {
        Relation {
            relation_id: id.to_string(),
            source_term_id: source.to_string(),
            target_term_id: target.to_string(),
            relation_type: ty,
            confidence,
            provenance: Provenance::Asserted,
            derivation_path: vec![],
            status: Status::Confirmed,
            created_by: "user-1".to_string(),
            created_at: Utc.timestamp_opt(created_secs, 0).single().unwrap(),
        }
    }

    fn edge(id: &str, source: &str, target: &str, ty: RelationType, confidence: f64) -> Relation {
        edge_at(id, source, target, ty, confidence, 1_000)
    }

    #[test]
    fn test_rule_name_round_trip() {
        for rule in Rule::ALL {
            assert_eq!(rule.as_str().parse::<Rule>().unwrap(), rule);
        }
        assert!("osmosis".parse::<Rule>().is_err());
    }

    #[test]
    fn test_transitive_chain_confidence_decay() {
        let frontier = vec![
            edge("r1", "cat", "mammal", RelationType::IsA, 1.0),
            edge("r2", "mammal", "animal", RelationType::IsA, 1.0),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);

        assert_eq!(out.len(), 1);
        let cand = &out[0];
        assert_eq!(cand.source_term_id, "cat");
        assert_eq!(cand.target_term_id, "animal");
        assert_eq!(cand.relation_type, RelationType::IsA);
        assert!((cand.confidence - 0.9).abs() < 1e-9);

        let steps = cand.steps(&arena);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].relation_id, "r1");
        assert_eq!(steps[1].relation_id, "r2");
        assert!(steps.iter().all(|s| s.rule == "transitive"));
    }

    #[test]
    fn test_transitive_respects_type_and_flag() {
        // related_to is symmetric but not transitive: no chain
        let frontier = vec![
            edge("r1", "a", "b", RelationType::RelatedTo, 1.0),
            edge("r2", "b", "c", RelationType::RelatedTo, 1.0),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(
            &frontier,
            &[],
            &[Rule::Transitive, Rule::Symmetric],
            0.9,
            &mut arena,
        );
        assert!(out.is_empty());

        // Mixed types do not compose transitively
        let frontier = vec![
            edge("r1", "a", "b", RelationType::IsA, 1.0),
            edge("r2", "b", "c", RelationType::PartOf, 1.0),
        ];
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert!(out.is_empty());
    }

    #[test]
    fn test_symmetric_enables_reverse_traversal() {
        // equivalent_to is symmetric+transitive; only b->a is persisted,
        // so a->c is reachable only through the reverse orientation.
        let frontier = vec![
            edge("r1", "b", "a", RelationType::EquivalentTo, 1.0),
            edge("r2", "b", "c", RelationType::EquivalentTo, 1.0),
        ];
        let mut arena = PathArena::new();

        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert!(out.is_empty());

        let out = apply_rules(
            &frontier,
            &[],
            &[Rule::Transitive, Rule::Symmetric],
            0.9,
            &mut arena,
        );
        assert_eq!(out.len(), 1);
        let key = edge_key(&out[0].source_term_id, &out[0].target_term_id, out[0].relation_type);
        assert_eq!(key, ("a".to_string(), "c".to_string(), RelationType::EquivalentTo));
    }

    #[test]
    fn test_equivalence_propagation() {
        let frontier = vec![
            edge("r1", "car", "automobile", RelationType::EquivalentTo, 1.0),
            edge("r2", "automobile", "vehicle", RelationType::IsA, 0.8),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(
            &frontier,
            &[],
            &[Rule::EquivalencePropagation],
            0.9,
            &mut arena,
        );
        assert_eq!(out.len(), 1);
        let cand = &out[0];
        assert_eq!(cand.source_term_id, "car");
        assert_eq!(cand.target_term_id, "vehicle");
        assert_eq!(cand.relation_type, RelationType::IsA);
        assert!((cand.confidence - 1.0 * 0.8 * 0.9).abs() < 1e-9);
        let steps = cand.steps(&arena);
        assert!(steps.iter().all(|s| s.rule == "equivalence"));
    }

    #[test]
    fn test_cycle_rejected() {
        // a -> b -> c -> a: no candidate may close the loop into a self-loop
        let frontier = vec![
            edge("r1", "a", "b", RelationType::IsA, 1.0),
            edge("r2", "b", "c", RelationType::IsA, 1.0),
            edge("r3", "c", "a", RelationType::IsA, 1.0),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert!(!out.is_empty());
        for cand in &out {
            assert_ne!(cand.source_term_id, cand.target_term_id);
        }
    }

    #[test]
    fn test_path_revisit_rejected_via_derived() {
        // Derived a->c composed with c->a would revisit a; must be refused
        // even though a->a is also a self-loop. Check an indirect revisit:
        // a->b, b->c gives a->c; with c->b the chain a->c->b revisits b.
        let frontier = vec![
            edge("r1", "a", "b", RelationType::IsA, 1.0),
            edge("r2", "b", "c", RelationType::IsA, 1.0),
            edge("r3", "c", "b", RelationType::IsA, 1.0),
        ];
        let mut arena = PathArena::new();
        let first = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        // b->b and c->c are self-loops (rejected); a->c survives
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].target_term_id, "c");

        let second = apply_rules(&frontier, &first, &[Rule::Transitive], 0.9, &mut arena);
        // a->c (chain a,b,c) + c->b would revisit b: nothing beyond the
        // seeded candidate comes back
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].target_term_id, "c");
    }

    #[test]
    fn test_dedup_keeps_highest_confidence_path() {
        // Two routes from a to c: direct composition via b1 (strong) and
        // via b2 (weak). One candidate, the strong path's confidence.
        let frontier = vec![
            edge("r1", "a", "b1", RelationType::IsA, 1.0),
            edge("r2", "b1", "c", RelationType::IsA, 1.0),
            edge("r3", "a", "b2", RelationType::IsA, 0.5),
            edge("r4", "b2", "c", RelationType::IsA, 0.5),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.9).abs() < 1e-9);
        let steps = out[0].steps(&arena);
        assert_eq!(steps[0].relation_id, "r1");
        assert_eq!(steps[1].relation_id, "r2");
    }

    #[test]
    fn test_dedup_tie_break_earliest_constituent() {
        // Identical confidence and chain length; the path whose constituent
        // was created first wins.
        let frontier = vec![
            edge_at("r1", "a", "b1", RelationType::IsA, 1.0, 2_000),
            edge_at("r2", "b1", "c", RelationType::IsA, 1.0, 2_000),
            edge_at("r3", "a", "b2", RelationType::IsA, 1.0, 500),
            edge_at("r4", "b2", "c", RelationType::IsA, 1.0, 2_000),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert_eq!(out.len(), 1);
        let steps = out[0].steps(&arena);
        assert_eq!(steps[0].relation_id, "r3");
    }

    #[test]
    fn test_existing_edges_not_reproposed() {
        let frontier = vec![
            edge("r1", "a", "b", RelationType::IsA, 1.0),
            edge("r2", "b", "c", RelationType::IsA, 1.0),
            edge("r3", "a", "c", RelationType::IsA, 1.0),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert!(out.is_empty());
    }

    #[test]
    fn test_confidence_monotonicity() {
        let frontier = vec![
            edge("r1", "a", "b", RelationType::IsA, 0.7),
            edge("r2", "b", "c", RelationType::IsA, 0.9),
        ];
        let mut arena = PathArena::new();
        let out = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        assert_eq!(out.len(), 1);
        assert!(out[0].confidence <= 0.7);
    }

    #[test]
    fn test_multi_hop_through_derived_candidates() {
        let frontier = vec![
            edge("r1", "a", "b", RelationType::IsA, 1.0),
            edge("r2", "b", "c", RelationType::IsA, 1.0),
            edge("r3", "c", "d", RelationType::IsA, 1.0),
        ];
        let mut arena = PathArena::new();
        let first = apply_rules(&frontier, &[], &[Rule::Transitive], 0.9, &mut arena);
        // a->c, b->d from direct composition; a->d needs a derived hop
        assert_eq!(first.len(), 2);

        let second = apply_rules(&frontier, &first, &[Rule::Transitive], 0.9, &mut arena);
        let ad = second
            .iter()
            .find(|c| c.source_term_id == "a" && c.target_term_id == "d")
            .expect("a->d derived through candidate");
        // 0.9 (derived) * 1.0 * 0.9
        assert!((ad.confidence - 0.81).abs() < 1e-9);
        let steps = ad.steps(&arena);
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps.iter().map(|s| s.relation_id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2", "r3"]
        );
    }
}
