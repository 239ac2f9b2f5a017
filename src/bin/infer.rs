use clap::Parser;
use termgraph::db::{migrate, Db};
use termgraph::infer::{infer, InferOptions, Rule};
use termgraph::store::RelationStore;
use termgraph::Config;
use std::path::Path;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "infer")]
#[command(about = "Infer new relations for a term and queue them for review")]
struct Args {
    /// Source term id to infer relations for
    #[arg(short, long)]
    term: String,

    /// Rules to apply (transitive, symmetric, equivalence); default: all
    #[arg(short, long)]
    rules: Vec<String>,

    /// Maximum traversal depth (default from config)
    #[arg(short, long)]
    max_depth: Option<usize>,

    /// Print candidates without persisting them
    #[arg(short, long)]
    dry_run: bool,
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

    let rules: Vec<Rule> = if args.rules.is_empty() {
        Rule::ALL.to_vec()
    } else {
        args.rules
            .iter()
            .map(|r| r.parse())
            .collect::<termgraph::Result<Vec<_>>>()?
    };
    let max_depth = args.max_depth.unwrap_or(config.inference.default_max_depth);

    let store = RelationStore::new(db)
        .with_sync_error_budget(config.backend.sync_error_budget);
    let opts = InferOptions {
        decay: config.inference.decay,
        min_confidence: config.inference.min_confidence,
        persist: !args.dry_run,
        ..Default::default()
    };

    log::info!(
        "Inferring relations for {} (depth {}, rules: {})",
        args.term,
        max_depth,
        rules.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
    );

    let candidates = infer(&store, &args.term, &rules, max_depth, &opts).await?;

    if candidates.is_empty() {
        println!("No new relations inferred for {}.", args.term);
        return Ok(());
    }

    println!("\nInferred {} candidate(s):\n", candidates.len());
    for cand in &candidates {
        println!(
            "  {} --[{}]--> {}  (confidence {:.3}, {} hops, {})",
            cand.source_term_id,
            cand.relation_type,
            cand.target_term_id,
            cand.confidence,
            cand.derivation_path.len(),
            cand.rule_chain(),
        );
    }
    if args.dry_run {
        println!("\nDry run: nothing was persisted.");
    } else {
        println!("\nCandidates queued as provisional for review.");
    }

    Ok(())
}
