use clap::Parser;
use termgraph::db::{migrate, Db};
use termgraph::infer::{reinfer_all, InferOptions, Rule};
use termgraph::store::RelationStore;
use termgraph::Config;
use std::path::Path;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "reinfer")]
#[command(about = "Bulk re-inference over every term (chunked, resumable)")]
struct Args {
    /// Terms per chunk between checkpoints (default from config)
    #[arg(short, long)]
    chunk_size: Option<usize>,

    /// Maximum traversal depth per term (default from config)
    #[arg(short, long)]
    max_depth: Option<usize>,

    /// Ignore any interrupted run and start from the first term
    #[arg(short, long)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    let config = Config::load()?;
    let db = Db::new(config.db_path());

    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| {
        migrate::run_migrations(conn, migrations_dir)
    }).await?;

    let store = RelationStore::new(db)
        .with_sync_error_budget(config.backend.sync_error_budget);
    let opts = InferOptions {
        decay: config.inference.decay,
        min_confidence: config.inference.min_confidence,
        ..Default::default()
    };
    let chunk_size = args.chunk_size.unwrap_or(config.reinference.chunk_size);
    let max_depth = args.max_depth.unwrap_or(config.inference.default_max_depth);

    log::info!("Starting bulk re-inference (chunk size {})", chunk_size);

    let report = reinfer_all(&store, &Rule::ALL, max_depth, &opts, chunk_size, args.fresh).await?;

    println!("\n=== Re-inference complete ===\n");
    println!("Run:                {}", report.run_id);
    if report.resumed {
        println!("Resumed:            yes");
    }
    println!("Terms processed:    {}", report.terms_processed);
    println!("Candidates written: {}", report.candidates_written);

    Ok(())
}
