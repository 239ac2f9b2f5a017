//! Human-in-the-loop review queue over provisional relations.
//!
//! Approve flips a provisional edge to confirmed (optionally overriding
//! confidence with the reviewer's); Reject deletes the row outright: a
//! rejected edge is not retained, and nothing stops a later inference run
//! from re-proposing it if new supporting evidence appears.

use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::{Result, TermGraphError};
use crate::relation::{Relation, Status};
use crate::store::sql::{map_relation, RELATION_COLUMNS};

/// Reviewer decision on a provisional relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Oldest-first queue of provisional relations awaiting review.
pub async fn get_pending(db: &Db, limit: usize) -> Result<Vec<Relation>> {
    db.with_connection(move |conn| {
        let sql = format!(
            "SELECT {} FROM relations WHERE status = 'provisional' \
             ORDER BY created_at, relation_id LIMIT ?1",
            RELATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], map_relation)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Apply a reviewer decision to a provisional relation.
///
/// Returns the approved relation (None for Reject). `NotFound` for an
/// unknown id, `AlreadyResolved` when the relation is no longer provisional.
pub async fn resolve(
    db: &Db,
    relation_id: &str,
    decision: Decision,
    reviewer_confidence: Option<f64>,
) -> Result<Option<Relation>> {
    if let Some(c) = reviewer_confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(TermGraphError::InvalidInput(format!(
                "reviewer confidence must be within [0, 1], got {}",
                c
            )));
        }
    }

    let id = relation_id.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        let status_raw: Option<String> = tx
            .query_row(
                "SELECT status FROM relations WHERE relation_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let status: Status = match status_raw {
            None => return Err(TermGraphError::NotFound(id)),
            Some(raw) => raw.parse()?,
        };
        if status != Status::Provisional {
            return Err(TermGraphError::AlreadyResolved(id));
        }

        let resolved = match decision {
            Decision::Approve => {
                tx.execute(
                    "UPDATE relations SET status = 'confirmed', \
                         confidence = COALESCE(?2, confidence) \
                     WHERE relation_id = ?1",
                    params![id, reviewer_confidence],
                )?;
                let sql = format!(
                    "SELECT {} FROM relations WHERE relation_id = ?1",
                    RELATION_COLUMNS
                );
                let rel = tx.query_row(&sql, params![id], map_relation)?;
                log::info!(
                    "Approved {} --[{}]--> {} (confidence {:.3})",
                    rel.source_term_id,
                    rel.relation_type,
                    rel.target_term_id,
                    rel.confidence
                );
                Some(rel)
            }
            Decision::Reject => {
                tx.execute("DELETE FROM relations WHERE relation_id = ?1", params![id])?;
                log::info!("Rejected provisional relation {}", id);
                None
            }
        };

        tx.commit()?;
        Ok(resolved)
    })
    .await
}
