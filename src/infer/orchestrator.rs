//! Inference orchestrator: bounded-depth traversal driving the rule engine.
//!
//! Breadth-first expansion from a source term: each hop fetches the
//! frontier's confirmed outgoing edges from the store, runs the rule engine
//! over everything accumulated so far, and feeds new candidates back as
//! traversal state. Nothing is persisted mid-traversal; surviving
//! candidates are written as provisional rows in one transaction at the
//! end, so a store failure mid-run leaves no partial writes.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{Result, TermGraphError};
use crate::infer::rules::{apply_rules, Candidate, PathArena, Rule};
use crate::infer::CandidateRelation;
use crate::relation::Relation;
use crate::store::{ProvisionalEdge, RelationStore};

/// Tunables for one inference run. Decay and the confidence floor come from
/// configuration; cancellation is cooperative and checked at hop boundaries.
#[derive(Clone)]
pub struct InferOptions {
    /// Per-hop confidence multiplier applied by the rule engine.
    pub decay: f64,
    /// Candidates below this confidence are discarded before persistence.
    pub min_confidence: f64,
    /// Write surviving candidates as provisional rows.
    pub persist: bool,
    pub created_by: String,
    /// When set, checked between hops; an in-progress hop completes first.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            decay: 0.9,
            min_confidence: 0.0,
            persist: true,
            created_by: "inference".to_string(),
            cancel: None,
        }
    }
}

fn cancelled(opts: &InferOptions) -> bool {
    opts.cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// Signature of a candidate set for fixed-point detection.
fn candidate_signature(candidates: &[Candidate]) -> Vec<(String, String, &'static str, u64)> {
    let mut sig: Vec<_> = candidates
        .iter()
        .map(|c| {
            (
                c.source_term_id.clone(),
                c.target_term_id.clone(),
                c.relation_type.as_str(),
                c.confidence.to_bits(),
            )
        })
        .collect();
    sig.sort();
    sig
}

/// Infer new relations for a term.
///
/// Returns candidates sorted by confidence descending, restricted to edges
/// anchored at `source_term_id` (either end for symmetric types). A zero
/// depth or a term with no outgoing edges yields an empty result, not an
/// error. With `opts.persist`, surviving candidates are written as
/// provisional/inferred rows and enter the review queue.
pub async fn infer(
    store: &RelationStore,
    source_term_id: &str,
    rules: &[Rule],
    max_depth: usize,
    opts: &InferOptions,
) -> Result<Vec<CandidateRelation>> {
    if max_depth == 0 {
        return Ok(Vec::new());
    }

    let mut arena = PathArena::new();
    let mut evidence: Vec<Relation> = Vec::new();
    let mut evidence_ids: HashSet<String> = HashSet::new();
    let mut derived: Vec<Candidate> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = vec![source_term_id.to_string()];
    visited.insert(source_term_id.to_string());

    for hop in 1..=max_depth {
        if cancelled(opts) {
            log::info!("Inference for {} cancelled at hop {}", source_term_id, hop);
            return Err(TermGraphError::Cancelled);
        }

        let fetched = store.frontier_outgoing(std::mem::take(&mut frontier)).await?;
        let mut fetched_new = 0usize;
        for rel in fetched {
            if !evidence_ids.insert(rel.relation_id.clone()) {
                continue;
            }
            fetched_new += 1;
            for term in [&rel.source_term_id, &rel.target_term_id] {
                if visited.insert(term.clone()) {
                    frontier.push(term.clone());
                }
            }
            evidence.push(rel);
        }

        let next = apply_rules(&evidence, &derived, rules, opts.decay, &mut arena);
        let progressed =
            fetched_new > 0 || candidate_signature(&next) != candidate_signature(&derived);
        derived = next;

        if !progressed {
            log::debug!(
                "Inference for {} reached fixed point at hop {}",
                source_term_id,
                hop
            );
            break;
        }
    }

    // Only candidates anchored at the source term are reported; the rest
    // were traversal state.
    let mut anchored: Vec<&Candidate> = derived
        .iter()
        .filter(|c| {
            c.source_term_id == source_term_id
                || (c.relation_type.symmetric() && c.target_term_id == source_term_id)
        })
        .filter(|c| c.confidence >= opts.min_confidence)
        .collect();
    anchored.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chain_len.cmp(&b.chain_len))
    });

    let candidates: Vec<CandidateRelation> = anchored
        .iter()
        .map(|c| CandidateRelation {
            source_term_id: c.source_term_id.clone(),
            target_term_id: c.target_term_id.clone(),
            relation_type: c.relation_type,
            confidence: c.confidence,
            derivation_path: c.steps(&arena),
        })
        .collect();

    if opts.persist && !candidates.is_empty() {
        let edges: Vec<ProvisionalEdge> = candidates
            .iter()
            .map(|c| ProvisionalEdge {
                source_term_id: c.source_term_id.clone(),
                target_term_id: c.target_term_id.clone(),
                relation_type: c.relation_type,
                confidence: c.confidence,
                derivation_path: c.derivation_path.clone(),
                created_by: opts.created_by.clone(),
            })
            .collect();
        let written = store.persist_candidates(edges).await?;
        log::info!(
            "Inference for {}: {} candidates, {} written as provisional",
            source_term_id,
            candidates.len(),
            written.len()
        );
    }

    Ok(candidates)
}

/// Outcome of a revalidation pass.
#[derive(Debug, Default)]
pub struct RevalidationReport {
    /// Derived edges removed because their proof chain was broken.
    pub removed: Vec<String>,
    /// Candidates re-proposed from the remaining graph (provisional again).
    pub reproposed: usize,
}

/// Re-evaluate derived edges whose proof referenced a deleted relation.
///
/// Each affected edge is retracted, then inference re-runs from its source
/// term: an edge with an alternative derivation path comes back as a fresh
/// provisional candidate with its new proof; one without stays gone. This
/// is cascading invalidation, not a cascading delete of everything
/// downstream.
pub async fn revalidate(
    store: &RelationStore,
    affected: Vec<Relation>,
    rules: &[Rule],
    opts: &InferOptions,
) -> Result<RevalidationReport> {
    let mut report = RevalidationReport::default();
    let mut sources: BTreeSet<String> = BTreeSet::new();
    let mut depth = 0usize;

    for rel in affected {
        if store.remove_derived(&rel.relation_id).await? {
            log::info!(
                "Retracted {} --[{}]--> {} (broken derivation)",
                rel.source_term_id,
                rel.relation_type,
                rel.target_term_id
            );
            report.removed.push(rel.relation_id);
            sources.insert(rel.source_term_id);
            // A replacement proof can be longer than the broken one by at
            // least one constituent.
            depth = depth.max(rel.derivation_path.len() + 1);
        }
    }

    let opts = InferOptions {
        persist: true,
        ..opts.clone()
    };
    for source in sources {
        report.reproposed += infer(store, &source, rules, depth, &opts).await?.len();
    }
    Ok(report)
}

/// Progress of a bulk re-inference run.
#[derive(Debug)]
pub struct ReinferReport {
    pub run_id: String,
    pub resumed: bool,
    pub terms_processed: usize,
    pub candidates_written: usize,
}

struct RunState {
    run_id: String,
    last_term: Option<String>,
    terms_done: i64,
    candidates_written: i64,
}

async fn load_resumable_run(store: &RelationStore) -> Result<Option<RunState>> {
    store
        .db()
        .with_connection(|conn| {
            let run = conn
                .query_row(
                    "SELECT run_id, last_term, terms_done, candidates_written \
                     FROM reinference_runs WHERE status = 'running' \
                     ORDER BY started_at DESC LIMIT 1",
                    [],
                    |row| {
                        Ok(RunState {
                            run_id: row.get(0)?,
                            last_term: row.get(1)?,
                            terms_done: row.get(2)?,
                            candidates_written: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(run)
        })
        .await
}

async fn create_run(store: &RelationStore) -> Result<RunState> {
    let run_id = Uuid::new_v4().to_string();
    let id = run_id.clone();
    store
        .db()
        .with_connection(move |conn| {
            conn.execute(
                "INSERT INTO reinference_runs (run_id) VALUES (?1)",
                params![id],
            )?;
            Ok(())
        })
        .await?;
    Ok(RunState {
        run_id,
        last_term: None,
        terms_done: 0,
        candidates_written: 0,
    })
}

async fn checkpoint_run(store: &RelationStore, run: &RunState) -> Result<()> {
    let run_id = run.run_id.clone();
    let last_term = run.last_term.clone();
    let (done, written) = (run.terms_done, run.candidates_written);
    store
        .db()
        .with_connection(move |conn| {
            conn.execute(
                "UPDATE reinference_runs SET last_term = ?2, terms_done = ?3, \
                     candidates_written = ?4 WHERE run_id = ?1",
                params![run_id, last_term, done, written],
            )?;
            Ok(())
        })
        .await
}

async fn finish_run(store: &RelationStore, run_id: &str) -> Result<()> {
    let id = run_id.to_string();
    store
        .db()
        .with_connection(move |conn| {
            conn.execute(
                "UPDATE reinference_runs SET status = 'done', \
                     finished_at = CURRENT_TIMESTAMP WHERE run_id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
}

/// Bulk re-inference over every term in the graph (e.g. after an import).
///
/// Terms are processed in stable order in chunks of `chunk_size`, with a
/// cursor checkpointed after each chunk. An interrupted run (failure or
/// cancellation) stays `running` and the next call resumes strictly after
/// the last completed chunk instead of starting over. `fresh` forgets any
/// resumable run and starts from the first term.
pub async fn reinfer_all(
    store: &RelationStore,
    rules: &[Rule],
    max_depth: usize,
    opts: &InferOptions,
    chunk_size: usize,
    fresh: bool,
) -> Result<ReinferReport> {
    let chunk_size = chunk_size.max(1);
    let mut run = match (fresh, load_resumable_run(store).await?) {
        (false, Some(run)) => {
            log::info!(
                "Resuming re-inference run {} after term {:?}",
                run.run_id,
                run.last_term
            );
            run
        }
        _ => create_run(store).await?,
    };
    let resumed = run.terms_done > 0;

    let terms = store.all_terms().await?;
    let start = match &run.last_term {
        Some(cursor) => terms.partition_point(|t| t <= cursor),
        None => 0,
    };

    let mut processed = 0usize;
    let mut written = 0usize;
    for chunk in terms[start..].chunks(chunk_size) {
        if cancelled(opts) {
            // Leave the run 'running': the checkpoint makes it resumable.
            log::info!("Re-inference run {} cancelled; resumable", run.run_id);
            return Err(TermGraphError::Cancelled);
        }
        let mut chunk_written = 0usize;
        for term in chunk {
            let candidates = infer(store, term, rules, max_depth, opts).await?;
            chunk_written += candidates.len();
            processed += 1;
        }
        written += chunk_written;
        run.last_term = chunk.last().cloned();
        run.terms_done += chunk.len() as i64;
        run.candidates_written += chunk_written as i64;
        checkpoint_run(store, &run).await?;
    }

    finish_run(store, &run.run_id).await?;
    log::info!(
        "Re-inference run {} complete: {} terms, {} candidates",
        run.run_id,
        processed,
        written
    );
    Ok(ReinferReport {
        run_id: run.run_id,
        resumed,
        terms_processed: processed,
        candidates_written: written,
    })
}
