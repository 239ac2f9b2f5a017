use termgraph::db::{migrate, Db};
use termgraph::store::{selector, RelationStore};
use termgraph::Config;
use std::path::Path;
use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger from environment variable or default to info level
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    // Parse command-line arguments
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "bench" => {
            // Backend benchmark + selection report
            run_backend_benchmark().await?;
        }
        "verify" | _ => {
            // Default: verify database schema
            run_schema_verification().await?;
        }
    }

    Ok(())
}

/// Verify that migrations apply and the expected schema is present.
async fn run_schema_verification() -> Result<()> {
    let config = Config::load()?;
    let db = Db::new(config.db_path());

    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| {
        migrate::run_migrations(conn, migrations_dir)
    }).await?;

    let tables: Vec<String> = db.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name"
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }).await?;

    println!("Database schema verified. Tables:");
    for table in &tables {
        println!("  {}", table);
    }

    for required in ["relations", "reinference_runs", "schema_migrations"] {
        if !tables.iter().any(|t| t == required) {
            anyhow::bail!("Missing required table: {}", required);
        }
    }

    let store = RelationStore::new(db);
    println!("Edges: {}", store.edge_count().await?);
    let pending: i64 = store
        .count_breakdown()
        .await?
        .iter()
        .filter(|(_, status, _, _)| status == "provisional")
        .map(|(_, _, _, count)| count)
        .sum();
    println!("Pending review: {}", pending);

    Ok(())
}

/// Benchmark both read backends and apply the selection policy.
async fn run_backend_benchmark() -> Result<()> {
    let config = Config::load()?;
    let db = Db::new(config.db_path());

    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| {
        migrate::run_migrations(conn, migrations_dir)
    }).await?;

    let store = RelationStore::new(db)
        .with_sync_error_budget(config.backend.sync_error_budget);
    let policy = config.backend.selector_policy();
    let report = selector::evaluate(&store, &policy).await?;

    println!("\n=== Termgraph Backend Benchmark ===\n");
    println!("Edges:               {}", report.edge_count);
    println!("Samples:             {}", report.samples);
    println!("Relational p50/p95:  {}us / {}us", report.relational_p50_us, report.relational_p95_us);
    println!("Graph p50/p95:       {}us / {}us", report.graph_p50_us, report.graph_p95_us);
    if report.below_threshold {
        println!(
            "\nEdge count is at or below the threshold ({}); relational backend retained.",
            policy.edge_threshold
        );
    } else if report.adopt_graph {
        println!("\nGraph backend adopted: p95 under {:.0}% of relational.", policy.p95_ratio * 100.0);
    } else {
        println!("\nRelational backend retained: graph p95 did not clear the ratio.");
    }

    Ok(())
}
