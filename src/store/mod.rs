//! Relation store: relational source of truth plus an optional in-memory
//! graph read index.
//!
//! All writes go to SQLite. The graph index, when active, serves
//! bounded-depth neighborhood reads and is kept in sync per write; once
//! sync errors exhaust the configured budget it is disabled and every read
//! is served relationally again.

pub mod graph_index;
pub mod hitl;
pub mod selector;
pub mod sql;

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::db::Db;
use crate::error::{Result, TermGraphError};
use crate::relation::{DerivationStep, NewRelation, Relation, RelationType};

pub use graph_index::GraphIndex;
pub use hitl::Decision;
pub use selector::{BenchmarkReport, SelectorPolicy};

/// Query direction for the term-detail surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl FromStr for Direction {
    type Err = TermGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            "both" => Ok(Direction::Both),
            other => Err(TermGraphError::InvalidInput(format!(
                "unknown direction: {}",
                other
            ))),
        }
    }
}

/// An inference candidate ready for provisional persistence.
#[derive(Debug, Clone)]
pub struct ProvisionalEdge {
    pub source_term_id: String,
    pub target_term_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub derivation_path: Vec<DerivationStep>,
    pub created_by: String,
}

/// Term subsystem collaborator. The store trusts callers but may verify
/// that referenced terms exist before accepting an assertion.
pub trait TermDirectory: Send + Sync {
    fn term_exists(&self, term_id: &str) -> bool;
}

/// Default directory: every term id is taken on trust.
pub struct AssumeTermsExist;

impl TermDirectory for AssumeTermsExist {
    fn term_exists(&self, _term_id: &str) -> bool {
        true
    }
}

/// The relation store facade.
pub struct RelationStore {
    db: Db,
    directory: Option<Arc<dyn TermDirectory>>,
    /// None = graph read backend disabled; reads are relational.
    graph: RwLock<Option<GraphIndex>>,
    sync_errors: AtomicU32,
    sync_error_budget: u32,
}

impl RelationStore {
    /// Open a store over a database; the graph read backend starts disabled.
    pub fn new(db: Db) -> Self {
        Self {
            db,
            directory: None,
            graph: RwLock::new(None),
            sync_errors: AtomicU32::new(0),
            sync_error_budget: 3,
        }
    }

    /// Verify term existence against this collaborator on every `put`.
    pub fn with_term_directory(mut self, directory: Arc<dyn TermDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// How many graph sync errors are tolerated before the index is disabled.
    pub fn with_sync_error_budget(mut self, budget: u32) -> Self {
        self.sync_error_budget = budget;
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Whether neighborhood reads are currently served by the graph index.
    pub fn graph_active(&self) -> bool {
        self.graph.read().unwrap().is_some()
    }

    /// Build the graph index from a full relational export and start
    /// serving neighborhood reads from it. Returns the indexed edge count.
    pub async fn enable_graph_index(&self) -> Result<usize> {
        let exported = sql::export_all(&self.db).await?;
        let index = GraphIndex::rebuild(&exported);
        let count = index.len();
        *self.graph.write().unwrap() = Some(index);
        self.sync_errors.store(0, Ordering::Relaxed);
        Ok(count)
    }

    /// Disable the graph index; reads fall back to the relational backend
    /// immediately (rollback path, no interruption to read traffic).
    pub fn disable_graph_index(&self) {
        let was = self.graph.write().unwrap().take();
        if was.is_some() {
            log::warn!("Graph read index disabled; all reads served relationally");
        }
    }

    /// Apply a mutation to the graph index, if active, charging failures
    /// against the sync-error budget.
    fn graph_sync<F>(&self, op: F)
    where
        F: FnOnce(&mut GraphIndex) -> Result<()>,
    {
        let mut guard = self.graph.write().unwrap();
        let Some(index) = guard.as_mut() else {
            return;
        };
        if let Err(e) = op(index) {
            let errors = self.sync_errors.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "Graph index sync error ({}/{}): {}",
                errors,
                self.sync_error_budget,
                e
            );
            if errors >= self.sync_error_budget {
                guard.take();
                log::warn!("Graph index out of sync beyond budget; disabled");
            }
        }
    }

    /// Assert a relation (§6 `create_relation` entry point).
    ///
    /// Verifies term existence when a directory is configured, then
    /// insert-or-merges: a duplicate key merges confidence via `max()` and
    /// returns the existing id, never a second row.
    pub async fn put(&self, new: NewRelation) -> Result<String> {
        if let Some(directory) = &self.directory {
            for term in [&new.source_term_id, &new.target_term_id] {
                if !directory.term_exists(term) {
                    return Err(TermGraphError::TermNotFound(term.clone()));
                }
            }
        }
        let id = sql::put_asserted(&self.db, new).await?;
        if self.graph_active() {
            if let Some(rel) = sql::get_by_id(&self.db, &id).await? {
                self.graph_sync(|index| index.upsert(rel));
            }
        }
        Ok(id)
    }

    /// Persist inference candidates as provisional rows (single
    /// transaction; see [`sql::persist_candidates`]). Provisional rows are
    /// not indexed; they are invisible to traversal until approved.
    pub async fn persist_candidates(&self, candidates: Vec<ProvisionalEdge>) -> Result<Vec<String>> {
        sql::persist_candidates(&self.db, candidates).await
    }

    pub async fn get_outgoing(
        &self,
        term_id: &str,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        sql::get_outgoing(&self.db, term_id, relation_type).await
    }

    pub async fn get_incoming(
        &self,
        term_id: &str,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        sql::get_incoming(&self.db, term_id, relation_type).await
    }

    /// Confirmed outgoing edges for a whole traversal frontier.
    pub async fn frontier_outgoing(&self, terms: Vec<String>) -> Result<Vec<Relation>> {
        sql::frontier_outgoing(&self.db, terms).await
    }

    pub async fn exists(
        &self,
        source_term_id: &str,
        target_term_id: &str,
        relation_type: RelationType,
    ) -> Result<bool> {
        sql::exists(&self.db, source_term_id, target_term_id, relation_type).await
    }

    /// Delete a relation; returns the inferred edges whose derivation path
    /// referenced it, for re-evaluation by the orchestrator.
    pub async fn delete(&self, relation_id: &str) -> Result<Vec<Relation>> {
        let (deleted, affected) = sql::delete(&self.db, relation_id).await?;
        if deleted.status == crate::relation::Status::Confirmed {
            // A confirmed edge the index does not hold means the replica
            // has drifted.
            let id = deleted.relation_id.clone();
            self.graph_sync(|index| {
                if index.remove(&id) {
                    Ok(())
                } else {
                    Err(TermGraphError::NotFound(id.clone()))
                }
            });
        }
        Ok(affected)
    }

    /// Remove a derived edge that lost its proof (revalidation path).
    pub async fn remove_derived(&self, relation_id: &str) -> Result<bool> {
        let removed = sql::remove_quietly(&self.db, relation_id).await?;
        if removed == Some(crate::relation::Status::Confirmed) {
            let id = relation_id.to_string();
            self.graph_sync(|index| {
                if index.remove(&id) {
                    Ok(())
                } else {
                    Err(TermGraphError::NotFound(id.clone()))
                }
            });
        }
        Ok(removed.is_some())
    }

    /// Bounded-depth neighborhood expansion, served by whichever backend is
    /// active.
    pub async fn neighborhood(
        &self,
        term_id: &str,
        max_depth: usize,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        let from_graph = {
            let guard = self.graph.read().unwrap();
            guard
                .as_ref()
                .map(|index| index.neighborhood(term_id, max_depth, relation_type))
        };
        match from_graph {
            Some(result) => Ok(result),
            None => sql::neighborhood(&self.db, term_id, max_depth, relation_type).await,
        }
    }

    /// Provisional relations awaiting human review, oldest first.
    pub async fn get_pending(&self, limit: usize) -> Result<Vec<Relation>> {
        hitl::get_pending(&self.db, limit).await
    }

    /// Apply a reviewer decision; an approved edge becomes part of the
    /// traversable graph.
    pub async fn resolve(
        &self,
        relation_id: &str,
        decision: Decision,
        reviewer_confidence: Option<f64>,
    ) -> Result<()> {
        let resolved = hitl::resolve(&self.db, relation_id, decision, reviewer_confidence).await?;
        if let Some(rel) = resolved {
            self.graph_sync(|index| index.upsert(rel));
        }
        Ok(())
    }

    /// Confirmed relations of a term (query surface; provisional edges are
    /// never returned).
    pub async fn get_relations(
        &self,
        term_id: &str,
        direction: Direction,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Relation>> {
        sql::get_relations(&self.db, term_id, direction, relation_type).await
    }

    pub async fn get_by_id(&self, relation_id: &str) -> Result<Option<Relation>> {
        sql::get_by_id(&self.db, relation_id).await
    }

    pub async fn get_many(&self, ids: Vec<String>) -> Result<Vec<Relation>> {
        sql::get_many(&self.db, ids).await
    }

    pub async fn edge_count(&self) -> Result<i64> {
        sql::edge_count(&self.db).await
    }

    /// Edge counts grouped by (type, status, provenance).
    pub async fn count_breakdown(&self) -> Result<Vec<(String, String, String, i64)>> {
        sql::count_breakdown(&self.db).await
    }

    pub async fn export_all(&self) -> Result<Vec<Relation>> {
        sql::export_all(&self.db).await
    }

    pub async fn import_all(&self, relations: Vec<Relation>) -> Result<usize> {
        sql::import_all(&self.db, relations).await
    }

    pub async fn all_terms(&self) -> Result<Vec<String>> {
        sql::all_terms(&self.db).await
    }
}
