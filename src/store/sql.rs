//! Relational backend: all SQL against the `relations` table.
//!
//! Writes are insert-or-merge statements so the UNIQUE(source, target, type)
//! constraint is the arbiter for concurrent duplicate candidates; the check
//! and the insert are a single statement, never check-then-insert.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{Result, TermGraphError};
use crate::relation::{
    derivation_from_json, derivation_to_json, NewRelation, Provenance, Relation, RelationType,
    Status,
};
use crate::store::{Direction, ProvisionalEdge};

pub(crate) const RELATION_COLUMNS: &str =
    "relation_id, source_term_id, target_term_id, relation_type, confidence, \
     provenance, derivation_path, status, created_by, created_at";

/// SQL literal list of the symmetric type names, derived from the enum.
fn symmetric_types_sql() -> String {
    RelationType::ALL
        .iter()
        .filter(|t| t.symmetric())
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conv_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Map a row selected with [`RELATION_COLUMNS`] into a [`Relation`].
pub(crate) fn map_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    let type_raw: String = row.get(3)?;
    let prov_raw: String = row.get(5)?;
    let path_raw: String = row.get(6)?;
    let status_raw: String = row.get(7)?;
    let created_raw: String = row.get(9)?;
    Ok(Relation {
        relation_id: row.get(0)?,
        source_term_id: row.get(1)?,
        target_term_id: row.get(2)?,
        relation_type: type_raw.parse().map_err(|e| conv_err(3, e))?,
        confidence: row.get(4)?,
        provenance: prov_raw.parse().map_err(|e| conv_err(5, e))?,
        derivation_path: derivation_from_json(&path_raw).map_err(|e| conv_err(6, e))?,
        status: status_raw.parse().map_err(|e| conv_err(7, e))?,
        created_by: row.get(8)?,
        created_at: DateTime::parse_from_rfc3339(&created_raw)
            .map_err(|e| conv_err(9, e))?
            .with_timezone(&Utc),
    })
}

fn query_relations(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Relation>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map_relation)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Assert a relation (insert-or-merge).
///
/// Returns the surviving relation id: the fresh one on insert, the existing
/// one when the key (or, for symmetric types, the reversed key) already has
/// a row. Merging takes the `max()` confidence and upgrades the row to
/// asserted/confirmed, since a direct assertion outranks a pending inference.
pub async fn put_asserted(db: &Db, new: NewRelation) -> Result<String> {
    new.validate()?;
    let relation_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();

    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        // Symmetric edges are persisted once; an assertion of B→A merges
        // into an existing A→B row instead of materializing the reverse.
        if new.relation_type.symmetric() {
            let reversed: Option<String> = tx
                .query_row(
                    "SELECT relation_id FROM relations \
                     WHERE source_term_id = ?1 AND target_term_id = ?2 AND relation_type = ?3",
                    params![new.target_term_id, new.source_term_id, new.relation_type.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing_id) = reversed {
                tx.execute(
                    "UPDATE relations SET \
                         confidence = MAX(confidence, ?2), \
                         provenance = 'asserted', \
                         derivation_path = '[]', \
                         status = 'confirmed' \
                     WHERE relation_id = ?1",
                    params![existing_id, new.confidence],
                )?;
                tx.commit()?;
                log::debug!(
                    "Merged symmetric re-assertion {} -> {} into {}",
                    new.source_term_id,
                    new.target_term_id,
                    existing_id
                );
                return Ok(existing_id);
            }
        }

        let surviving_id: String = tx.query_row(
            "INSERT INTO relations (relation_id, source_term_id, target_term_id, \
                 relation_type, confidence, provenance, derivation_path, status, \
                 created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'asserted', '[]', 'confirmed', ?6, ?7) \
             ON CONFLICT(source_term_id, target_term_id, relation_type) DO UPDATE SET \
                 confidence = MAX(relations.confidence, excluded.confidence), \
                 provenance = 'asserted', \
                 derivation_path = '[]', \
                 status = 'confirmed' \
             RETURNING relation_id",
            params![
                relation_id,
                new.source_term_id,
                new.target_term_id,
                new.relation_type.as_str(),
                new.confidence,
                new.created_by,
                created_at,
            ],
            |row| row.get(0),
        )?;
        tx.commit()?;

        if surviving_id != relation_id {
            log::debug!(
                "Re-assertion of {} --[{}]--> {} merged into {}",
                new.source_term_id,
                new.relation_type,
                new.target_term_id,
                surviving_id
            );
        }
        Ok(surviving_id)
    })
    .await
}

/// Persist inference candidates as provisional rows, all in one transaction.
///
/// Per candidate: a conflicting provisional row merges `max()` confidence
/// (keeping the higher-confidence derivation path); a conflicting confirmed
/// row silently drops the candidate. A store failure rolls back the whole
/// batch, so a failed inference run leaves no partial writes.
pub async fn persist_candidates(
    db: &Db,
    candidates: Vec<ProvisionalEdge>,
) -> Result<Vec<String>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let mut written = Vec::new();

        for cand in &candidates {
            let path_json = derivation_to_json(&cand.derivation_path)?;
            let relation_id = Uuid::new_v4().to_string();
            let created_at = Utc::now().to_rfc3339();

            // For symmetric types the reversed key is the same logical edge.
            let (source, target) = if cand.relation_type.symmetric() {
                let reversed: Option<String> = tx
                    .query_row(
                        "SELECT relation_id FROM relations \
                         WHERE source_term_id = ?1 AND target_term_id = ?2 AND relation_type = ?3",
                        params![
                            cand.target_term_id,
                            cand.source_term_id,
                            cand.relation_type.as_str()
                        ],
                        |row| row.get(0),
                    )
                    .optional()?;
                if reversed.is_some() {
                    (cand.target_term_id.clone(), cand.source_term_id.clone())
                } else {
                    (cand.source_term_id.clone(), cand.target_term_id.clone())
                }
            } else {
                (cand.source_term_id.clone(), cand.target_term_id.clone())
            };

            let surviving: Option<String> = tx
                .query_row(
                    "INSERT INTO relations (relation_id, source_term_id, target_term_id, \
                         relation_type, confidence, provenance, derivation_path, status, \
                         created_by, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 'inferred', ?6, 'provisional', ?7, ?8) \
                     ON CONFLICT(source_term_id, target_term_id, relation_type) DO UPDATE SET \
                         confidence = MAX(relations.confidence, excluded.confidence), \
                         derivation_path = CASE \
                             WHEN excluded.confidence > relations.confidence \
                             THEN excluded.derivation_path \
                             ELSE relations.derivation_path END \
                     WHERE relations.status = 'provisional' \
                     RETURNING relation_id",
                    params![
                        relation_id,
                        source,
                        target,
                        cand.relation_type.as_str(),
                        cand.confidence,
                        path_json,
                        cand.created_by,
                        created_at,
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            match surviving {
                // No row back: the conflicting row is confirmed, candidate dropped.
                None => log::debug!(
                    "Candidate {} --[{}]--> {} already confirmed, dropped",
                    cand.source_term_id,
                    cand.relation_type,
                    cand.target_term_id
                ),
                Some(id) => written.push(id),
            }
        }

        tx.commit()?;
        Ok(written)
    })
    .await
}

/// Outgoing edges of a term. Symmetric-type edges where the term is the
/// target are included, since they are traversable from both ends.
pub async fn get_outgoing(
    db: &Db,
    term_id: &str,
    relation_type: Option<RelationType>,
) -> Result<Vec<Relation>> {
    let term = term_id.to_string();
    db.with_connection(move |conn| {
        let mut sql = format!(
            "SELECT {} FROM relations \
             WHERE (source_term_id = ?1 \
                OR (target_term_id = ?1 AND relation_type IN ({})))",
            RELATION_COLUMNS,
            symmetric_types_sql()
        );
        match relation_type {
            Some(ty) => {
                sql.push_str(" AND relation_type = ?2");
                query_relations(conn, &sql, &[&term, &ty.as_str()])
            }
            None => query_relations(conn, &sql, &[&term]),
        }
    })
    .await
}

/// Incoming edges of a term (mirror of [`get_outgoing`]).
pub async fn get_incoming(
    db: &Db,
    term_id: &str,
    relation_type: Option<RelationType>,
) -> Result<Vec<Relation>> {
    let term = term_id.to_string();
    db.with_connection(move |conn| {
        let mut sql = format!(
            "SELECT {} FROM relations \
             WHERE (target_term_id = ?1 \
                OR (source_term_id = ?1 AND relation_type IN ({})))",
            RELATION_COLUMNS,
            symmetric_types_sql()
        );
        match relation_type {
            Some(ty) => {
                sql.push_str(" AND relation_type = ?2");
                query_relations(conn, &sql, &[&term, &ty.as_str()])
            }
            None => query_relations(conn, &sql, &[&term]),
        }
    })
    .await
}

/// Confirmed outgoing edges for a whole traversal frontier in one query.
///
/// This is the orchestrator's per-hop access pattern; provisional rows are
/// never evidence.
pub async fn frontier_outgoing(db: &Db, terms: Vec<String>) -> Result<Vec<Relation>> {
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    db.with_connection(move |conn| {
        let placeholders = terms.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {cols} FROM relations \
             WHERE status = 'confirmed' AND (source_term_id IN ({ph}) \
                OR (target_term_id IN ({ph}) AND relation_type IN ({sym})))",
            cols = RELATION_COLUMNS,
            ph = placeholders,
            sym = symmetric_types_sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for t in &terms {
            bound.push(Box::new(t.clone()));
        }
        for t in &terms {
            bound.push(Box::new(t.clone()));
        }
        let rows = stmt.query_map(rusqlite::params_from_iter(bound), map_relation)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Whether an edge with this key exists, checking both directions for
/// symmetric types.
pub async fn exists(
    db: &Db,
    source_term_id: &str,
    target_term_id: &str,
    relation_type: RelationType,
) -> Result<bool> {
    let source = source_term_id.to_string();
    let target = target_term_id.to_string();
    db.with_connection(move |conn| {
        let sql = if relation_type.symmetric() {
            "SELECT COUNT(*) FROM relations \
             WHERE relation_type = ?3 AND \
                   ((source_term_id = ?1 AND target_term_id = ?2) \
                 OR (source_term_id = ?2 AND target_term_id = ?1))"
        } else {
            "SELECT COUNT(*) FROM relations \
             WHERE relation_type = ?3 AND source_term_id = ?1 AND target_term_id = ?2"
        };
        let count: i64 = conn.query_row(
            sql,
            params![source, target, relation_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
    .await
}

/// Delete a relation by id, returning the deleted row and the affected set.
///
/// Deleting a confirmed edge returns the inferred edges whose derivation
/// path references it, so the orchestrator can re-evaluate each one against
/// the remaining graph (cascading invalidation, not cascading delete).
pub async fn delete(db: &Db, relation_id: &str) -> Result<(Relation, Vec<Relation>)> {
    let id = relation_id.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        let select_sql = format!(
            "SELECT {} FROM relations WHERE relation_id = ?1",
            RELATION_COLUMNS
        );
        let deleted: Relation = match tx
            .query_row(&select_sql, params![id], map_relation)
            .optional()?
        {
            None => return Err(TermGraphError::NotFound(id)),
            Some(rel) => rel,
        };

        tx.execute("DELETE FROM relations WHERE relation_id = ?1", params![id])?;

        let affected = if deleted.status == Status::Confirmed {
            // Relation ids are UUIDs, so a quoted-substring probe into the
            // JSON column cannot produce false positives.
            let needle = format!("%\"{}\"%", id);
            let sql = format!(
                "SELECT {} FROM relations \
                 WHERE provenance = 'inferred' AND derivation_path LIKE ?1",
                RELATION_COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params![needle], map_relation)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        } else {
            Vec::new()
        };

        tx.commit()?;
        Ok((deleted, affected))
    })
    .await
}

/// Remove a relation by id without the invalidation scan.
///
/// Used by revalidation when a derived edge has lost its proof; a row
/// already gone is fine (returns None). Otherwise returns the status the
/// row had, so the caller knows whether the graph index held it.
pub async fn remove_quietly(db: &Db, relation_id: &str) -> Result<Option<Status>> {
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
        let Some(raw) = status_raw else {
            return Ok(None);
        };
        tx.execute("DELETE FROM relations WHERE relation_id = ?1", params![id])?;
        tx.commit()?;
        Ok(Some(raw.parse()?))
    })
    .await
}

/// Bounded-depth neighborhood expansion via a recursive CTE.
///
/// Follows edge direction (symmetric types traversable both ways) over
/// confirmed edges only; returns every edge discovered within `max_depth`
/// hops of `term_id`.
pub async fn neighborhood(
    db: &Db,
    term_id: &str,
    max_depth: usize,
    relation_type: Option<RelationType>,
) -> Result<Vec<Relation>> {
    if max_depth == 0 {
        return Ok(Vec::new());
    }
    let term = term_id.to_string();
    db.with_connection(move |conn| {
        let type_filter = match relation_type {
            Some(ty) => format!(" AND r.relation_type = '{}'", ty.as_str()),
            None => String::new(),
        };
        let sym = symmetric_types_sql();
        let sql = format!(
            "WITH RECURSIVE frontier(term_id, depth) AS ( \
                 VALUES (?1, 0) \
                 UNION \
                 SELECT CASE WHEN r.source_term_id = f.term_id \
                             THEN r.target_term_id ELSE r.source_term_id END, \
                        f.depth + 1 \
                 FROM relations r JOIN frontier f \
                   ON (r.source_term_id = f.term_id \
                       OR (r.target_term_id = f.term_id AND r.relation_type IN ({sym}))) \
                 WHERE f.depth < ?2 AND r.status = 'confirmed'{type_filter} \
             ) \
             SELECT DISTINCT {cols} FROM relations r JOIN frontier f \
               ON (r.source_term_id = f.term_id \
                   OR (r.target_term_id = f.term_id AND r.relation_type IN ({sym}))) \
             WHERE f.depth < ?2 AND r.status = 'confirmed'{type_filter}",
            sym = sym,
            cols = RELATION_COLUMNS
                .split(", ")
                .map(|c| format!("r.{}", c))
                .collect::<Vec<_>>()
                .join(", "),
            type_filter = type_filter,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![term, max_depth as i64], map_relation)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Confirmed relations of a term for the query surface; provisional edges
/// are never returned here.
pub async fn get_relations(
    db: &Db,
    term_id: &str,
    direction: Direction,
    relation_type: Option<RelationType>,
) -> Result<Vec<Relation>> {
    let term = term_id.to_string();
    db.with_connection(move |conn| {
        let sym = symmetric_types_sql();
        let direction_clause = match direction {
            Direction::Outgoing => format!(
                "(source_term_id = ?1 OR (target_term_id = ?1 AND relation_type IN ({})))",
                sym
            ),
            Direction::Incoming => format!(
                "(target_term_id = ?1 OR (source_term_id = ?1 AND relation_type IN ({})))",
                sym
            ),
            Direction::Both => "(source_term_id = ?1 OR target_term_id = ?1)".to_string(),
        };
        let mut sql = format!(
            "SELECT {} FROM relations WHERE status = 'confirmed' AND {}",
            RELATION_COLUMNS, direction_clause
        );
        match relation_type {
            Some(ty) => {
                sql.push_str(" AND relation_type = ?2");
                query_relations(conn, &sql, &[&term, &ty.as_str()])
            }
            None => query_relations(conn, &sql, &[&term]),
        }
    })
    .await
}

/// Total number of persisted edges (any status).
pub async fn edge_count(db: &Db) -> Result<i64> {
    db.with_connection(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))?;
        Ok(count)
    })
    .await
}

/// Edge counts grouped by (type, status, provenance), for stats reporting.
pub async fn count_breakdown(db: &Db) -> Result<Vec<(String, String, String, i64)>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT relation_type, status, provenance, COUNT(*) \
             FROM relations GROUP BY relation_type, status, provenance \
             ORDER BY relation_type, status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Export every edge with full derivation paths, ordered by creation.
///
/// Drives graph-index rebuilds and relational re-import on rollback.
pub async fn export_all(db: &Db) -> Result<Vec<Relation>> {
    db.with_connection(|conn| {
        let sql = format!(
            "SELECT {} FROM relations ORDER BY created_at, relation_id",
            RELATION_COLUMNS
        );
        query_relations(conn, &sql, &[])
    })
    .await
}

/// Idempotent re-import of exported edges into the relational schema.
///
/// `INSERT OR IGNORE` keyed on the primary key makes repeated imports
/// harmless; returns how many rows were actually inserted.
pub async fn import_all(db: &Db, relations: Vec<Relation>) -> Result<usize> {
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for rel in &relations {
            let path_json = derivation_to_json(&rel.derivation_path)?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO relations (relation_id, source_term_id, \
                     target_term_id, relation_type, confidence, provenance, \
                     derivation_path, status, created_by, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    rel.relation_id,
                    rel.source_term_id,
                    rel.target_term_id,
                    rel.relation_type.as_str(),
                    rel.confidence,
                    rel.provenance.as_str(),
                    path_json,
                    rel.status.as_str(),
                    rel.created_by,
                    rel.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    })
    .await
}

/// Every term id that appears on either end of a confirmed edge, ordered.
///
/// The stable order is what makes bulk re-inference resumable: the cursor
/// is a term id and processing restarts strictly after it.
pub async fn all_terms(db: &Db) -> Result<Vec<String>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_term_id AS term FROM relations WHERE status = 'confirmed' \
             UNION \
             SELECT DISTINCT target_term_id FROM relations WHERE status = 'confirmed' \
             ORDER BY term",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
    .await
}

/// Fetch a single relation by id.
pub async fn get_by_id(db: &Db, relation_id: &str) -> Result<Option<Relation>> {
    let id = relation_id.to_string();
    db.with_connection(move |conn| {
        let sql = format!(
            "SELECT {} FROM relations WHERE relation_id = ?1",
            RELATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rel = stmt.query_row(params![id], map_relation).optional()?;
        Ok(rel)
    })
    .await
}

/// Fetch several relations by id, preserving request order; missing ids are
/// simply absent from the result.
pub async fn get_many(db: &Db, ids: Vec<String>) -> Result<Vec<Relation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    db.with_connection(move |conn| {
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {} FROM relations WHERE relation_id IN ({})",
            RELATION_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(ids.iter().map(|s| s.as_str())),
            map_relation,
        )?;
        let mut found: std::collections::HashMap<String, Relation> = std::collections::HashMap::new();
        for row in rows {
            let rel = row?;
            found.insert(rel.relation_id.clone(), rel);
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    })
    .await
}
