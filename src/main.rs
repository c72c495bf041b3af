use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;

use sales_reconcile::{pipeline, Store, DEPENDENCY_ORDER};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let data_dir = setting(&args, 1, "DATA_DIR", "./data");
    let db_path = setting(&args, 2, "DB_PATH", "./sales.db");
    // Optional machine-readable copy of the run report
    let report_path = args
        .get(3)
        .cloned()
        .or_else(|| env::var("REPORT_PATH").ok())
        .map(PathBuf::from);

    println!("🗄️  Sales Reconcile - CSV extracts → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Extracts: {}", data_dir.display());
    println!("  Store:    {}", db_path.display());

    let mut store = Store::open(&db_path)?;
    let report = pipeline::run(&mut store, &data_dir)?;

    println!("\n📊 Run {} complete", report.run_id);
    for stats in &report.relations {
        let marker = if stats.committed { "✓" } else { "✗" };
        println!("  {} {}", marker, stats.summary());
    }

    println!("\nRow counts:");
    for relation in DEPENDENCY_ORDER {
        let count = store.row_count(relation)?;
        println!("  {}: {}", relation.table, count);
    }

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("\n✓ Report written to {}", path.display());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.all_committed() {
        println!("✅ All relations merged");
        Ok(())
    } else {
        eprintln!("❌ One or more relations failed to merge - re-run after fixing the fault");
        std::process::exit(1);
    }
}

/// Positional CLI argument, then environment variable, then default
fn setting(args: &[String], position: usize, env_var: &str, default: &str) -> PathBuf {
    args.get(position)
        .cloned()
        .or_else(|| env::var(env_var).ok())
        .unwrap_or_else(|| default.to_string())
        .into()
}
