//! Backend selection for the neighborhood read path.
//!
//! The choice between the relational recursive query and the in-memory
//! graph index is a measured decision, re-evaluated as the graph grows:
//! below the edge threshold the relational backend is kept outright; above
//! it, both backends are benchmarked under the same sampled load and the
//! graph index is adopted only when its p95 clears the configured ratio.

use std::time::Instant;

use crate::db::Db;
use crate::error::Result;
use crate::store::{sql, GraphIndex, RelationStore};

/// Selection policy. Thresholds come from configuration, not constants.
#[derive(Debug, Clone)]
pub struct SelectorPolicy {
    /// Edge count at or below which the relational backend is kept
    /// without measuring.
    pub edge_threshold: i64,
    /// Adopt the graph backend only if `graph_p95 < p95_ratio * relational_p95`.
    pub p95_ratio: f64,
    /// Number of sampled expansion queries per backend.
    pub benchmark_samples: usize,
    /// Expansion depth used for benchmark queries.
    pub benchmark_depth: usize,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            edge_threshold: 5000,
            p95_ratio: 0.5,
            benchmark_samples: 50,
            benchmark_depth: 3,
        }
    }
}

/// Outcome of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub edge_count: i64,
    pub samples: usize,
    pub relational_p50_us: u128,
    pub relational_p95_us: u128,
    pub graph_p50_us: u128,
    pub graph_p95_us: u128,
    pub below_threshold: bool,
    pub adopt_graph: bool,
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[u128], p: f64) -> u128 {
    if sorted_values.is_empty() {
        return 0;
    }
    let index = ((sorted_values.len() - 1) as f64 * p).ceil() as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}

/// Benchmark bounded-depth neighborhood expansion on both backends.
///
/// Sampled source terms are spread evenly over the ordered term set so both
/// backends see the identical load. Index build cost is excluded: in
/// production the index is a continuously-synced replica, not rebuilt per
/// read.
pub async fn benchmark(db: &Db, policy: &SelectorPolicy) -> Result<BenchmarkReport> {
    let edge_count = sql::edge_count(db).await?;
    let below_threshold = edge_count <= policy.edge_threshold;

    let terms = sql::all_terms(db).await?;
    let sampled: Vec<String> = if terms.is_empty() || policy.benchmark_samples == 0 {
        Vec::new()
    } else {
        let step = (terms.len() as f64 / policy.benchmark_samples as f64).max(1.0);
        (0..policy.benchmark_samples)
            .map(|i| terms[((i as f64 * step) as usize) % terms.len()].clone())
            .collect()
    };

    let index = GraphIndex::rebuild(&sql::export_all(db).await?);

    let mut relational = Vec::with_capacity(sampled.len());
    let mut graph = Vec::with_capacity(sampled.len());
    for term in &sampled {
        let start = Instant::now();
        sql::neighborhood(db, term, policy.benchmark_depth, None).await?;
        relational.push(start.elapsed().as_micros());

        let start = Instant::now();
        index.neighborhood(term, policy.benchmark_depth, None);
        graph.push(start.elapsed().as_micros());
    }
    relational.sort_unstable();
    graph.sort_unstable();

    let relational_p95_us = percentile(&relational, 0.95);
    let graph_p95_us = percentile(&graph, 0.95);
    let adopt_graph = !below_threshold
        && !sampled.is_empty()
        && (graph_p95_us as f64) < policy.p95_ratio * relational_p95_us as f64;

    let report = BenchmarkReport {
        edge_count,
        samples: sampled.len(),
        relational_p50_us: percentile(&relational, 0.50),
        relational_p95_us,
        graph_p50_us: percentile(&graph, 0.50),
        graph_p95_us,
        below_threshold,
        adopt_graph,
    };
    log::info!(
        "Backend benchmark: {} edges, relational p95 {}us, graph p95 {}us -> {}",
        report.edge_count,
        report.relational_p95_us,
        report.graph_p95_us,
        if report.adopt_graph { "graph" } else { "relational" }
    );
    Ok(report)
}

/// Re-evaluate the activation criterion against a live store.
///
/// Enables the graph index when the benchmark justifies it, disables it
/// otherwise; either way reads keep flowing throughout.
pub async fn evaluate(store: &RelationStore, policy: &SelectorPolicy) -> Result<BenchmarkReport> {
    let report = benchmark(store.db(), policy).await?;
    if report.adopt_graph {
        let indexed = store.enable_graph_index().await?;
        log::info!("Graph read backend adopted ({} edges indexed)", indexed);
    } else {
        store.disable_graph_index();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::relation::{NewRelation, RelationType};
    use std::path::Path;
    use tempfile::TempDir;

    async fn test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_percentile() {
        let values = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(&values, 0.95), 10);
        assert_eq!(percentile(&values, 0.50), 6);
        assert_eq!(percentile(&[], 0.95), 0);
        assert_eq!(percentile(&[42], 0.95), 42);
    }

    #[tokio::test]
    async fn test_benchmark_below_threshold_keeps_relational() {
        let (db, _tmp) = test_db().await;
        for i in 0..10 {
            sql::put_asserted(
                &db,
                NewRelation::new(
                    format!("t{}", i),
                    format!("t{}", i + 1),
                    RelationType::IsA,
                    1.0,
                    "user-1",
                ),
            )
            .await
            .unwrap();
        }

        let policy = SelectorPolicy {
            edge_threshold: 5000,
            benchmark_samples: 5,
            ..Default::default()
        };
        let report = benchmark(&db, &policy).await.unwrap();
        assert!(report.below_threshold);
        assert!(!report.adopt_graph);
        assert_eq!(report.samples, 5);
    }

    #[tokio::test]
    async fn test_evaluate_applies_decision_to_store() {
        let (db, _tmp) = test_db().await;
        for i in 0..20 {
            sql::put_asserted(
                &db,
                NewRelation::new(
                    format!("t{}", i),
                    format!("t{}", i + 1),
                    RelationType::IsA,
                    1.0,
                    "user-1",
                ),
            )
            .await
            .unwrap();
        }
        let store = RelationStore::new(Db::new(
            _tmp.path().join("test.db"),
        ));

        // Tiny threshold forces the measured path; the in-memory index
        // comfortably beats recursive SQL on this shape, so it is adopted.
        let policy = SelectorPolicy {
            edge_threshold: 1,
            benchmark_samples: 10,
            ..Default::default()
        };
        let report = evaluate(&store, &policy).await.unwrap();
        assert!(!report.below_threshold);
        if report.adopt_graph {
            assert!(store.graph_active());
        } else {
            assert!(!store.graph_active());
        }

        // An absurd ratio can never be cleared: rollback to relational.
        let policy = SelectorPolicy {
            edge_threshold: 1,
            p95_ratio: 0.0,
            benchmark_samples: 10,
            ..Default::default()
        };
        let report = evaluate(&store, &policy).await.unwrap();
        assert!(!report.adopt_graph);
        assert!(!store.graph_active());
    }
}
