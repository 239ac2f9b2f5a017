//! In-memory adjacency index: the native graph read backend.
//!
//! A derived replica of the relational store, holding confirmed edges only.
//! It is never the source of truth: it is rebuilt from a full relational
//! export and kept in sync per write, and the facade disables it when sync
//! errors exceed the configured budget.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Result, TermGraphError};
use crate::relation::{Relation, RelationType, Status};

/// Adjacency over confirmed edges, keyed by term on both traversable ends.
#[derive(Debug, Default)]
pub struct GraphIndex {
    /// term -> ids of edges traversable from that term (symmetric edges
    /// appear under both ends, persisted once in `edges`).
    adjacency: HashMap<String, Vec<String>>,
    edges: HashMap<String, Relation>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a full export. Idempotent: two rebuilds from the
    /// same export produce the same index.
    pub fn rebuild(relations: &[Relation]) -> Self {
        let mut index = Self::new();
        for rel in relations {
            if rel.status == Status::Confirmed {
                // Export rows are unique by id, so insert cannot collide here.
                let _ = index.insert(rel.clone());
            }
        }
        log::info!("Graph index rebuilt: {} edges", index.len());
        index
    }

    /// Number of indexed edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Index a confirmed edge. Provisional edges are invisible to traversal
    /// and are ignored. A duplicate id means the replica has drifted from
    /// the relational store.
    pub fn insert(&mut self, rel: Relation) -> Result<()> {
        if rel.status != Status::Confirmed {
            return Ok(());
        }
        if self.edges.contains_key(&rel.relation_id) {
            return Err(TermGraphError::Duplicate(rel.relation_id));
        }
        self.adjacency
            .entry(rel.source_term_id.clone())
            .or_default()
            .push(rel.relation_id.clone());
        if rel.relation_type.symmetric() && rel.target_term_id != rel.source_term_id {
            self.adjacency
                .entry(rel.target_term_id.clone())
                .or_default()
                .push(rel.relation_id.clone());
        }
        self.edges.insert(rel.relation_id.clone(), rel);
        Ok(())
    }

    /// Drop an edge by id; true if it was present.
    pub fn remove(&mut self, relation_id: &str) -> bool {
        let Some(rel) = self.edges.remove(relation_id) else {
            return false;
        };
        if let Some(ids) = self.adjacency.get_mut(&rel.source_term_id) {
            ids.retain(|id| id != relation_id);
        }
        if let Some(ids) = self.adjacency.get_mut(&rel.target_term_id) {
            ids.retain(|id| id != relation_id);
        }
        true
    }

    /// Replace (or add) an edge, e.g. after a confidence merge or a
    /// provisional edge being approved.
    pub fn upsert(&mut self, rel: Relation) -> Result<()> {
        self.remove(&rel.relation_id);
        self.insert(rel)
    }

    /// Bounded-depth neighborhood expansion.
    ///
    /// Same contract as the relational recursive query: every confirmed
    /// edge within `max_depth` hops of `term_id`, following edge direction
    /// with symmetric types traversable both ways.
    pub fn neighborhood(
        &self,
        term_id: &str,
        max_depth: usize,
        relation_type: Option<RelationType>,
    ) -> Vec<Relation> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut seen_edges = HashSet::new();
        let mut result = Vec::new();

        queue.push_back((term_id.to_string(), 0usize));
        visited.insert(term_id.to_string());

        while let Some((term, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(ids) = self.adjacency.get(&term) else {
                continue;
            };
            for id in ids {
                let rel = &self.edges[id];
                if let Some(ty) = relation_type {
                    if rel.relation_type != ty {
                        continue;
                    }
                }
                // Directed edges are only traversable from their source.
                if rel.source_term_id != term && !rel.relation_type.symmetric() {
                    continue;
                }
                if seen_edges.insert(rel.relation_id.clone()) {
                    result.push(rel.clone());
                }
                if let Some(next) = rel.other_end(&term) {
                    if !visited.contains(next) {
                        visited.insert(next.to_string());
                        queue.push_back((next.to_string(), depth + 1));
                    }
                }
            }
        }

        result
    }
}
