use termgraph::db::{migrate, Db};
use termgraph::store::{selector, RelationStore};
use termgraph::Config;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    let db = Db::new(config.db_path());

    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| {
        migrate::run_migrations(conn, migrations_dir)
    }).await?;

    let store = RelationStore::new(db);

    println!("\n=== Termgraph Statistics ===\n");

    let total = store.edge_count().await?;
    println!("Total edges: {}", total);

    let breakdown = store.count_breakdown().await?;
    if breakdown.is_empty() {
        println!("\nGraph is empty. Assert some relations to generate statistics.");
        return Ok(());
    }

    println!("\n{:<16} {:<12} {:<10} {:>8}", "Type", "Status", "Provenance", "Count");
    println!("{}", "-".repeat(50));
    let mut pending = 0i64;
    for (relation_type, status, provenance, count) in &breakdown {
        println!(
            "{:<16} {:<12} {:<10} {:>8}",
            relation_type, status, provenance, count
        );
        if status == "provisional" {
            pending += count;
        }
    }
    println!("\nPending review queue: {}", pending);

    // Backend comparison under the configured policy (read-only: the
    // decision is reported, not applied here).
    let policy = config.backend.selector_policy();
    let report = selector::benchmark(store.db(), &policy).await?;
    println!("\nNeighborhood expansion (depth {}, {} samples):", policy.benchmark_depth, report.samples);
    println!("  relational p50/p95: {}us / {}us", report.relational_p50_us, report.relational_p95_us);
    println!("  graph      p50/p95: {}us / {}us", report.graph_p50_us, report.graph_p95_us);
    let recommendation = if report.below_threshold {
        "relational (below edge threshold)"
    } else if report.adopt_graph {
        "graph"
    } else {
        "relational"
    };
    println!("  recommended backend: {}", recommendation);

    Ok(())
}
