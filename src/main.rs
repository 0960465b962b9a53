use anyhow::{Context, Result};
use log::info;
use std::env;
use std::path::{Path, PathBuf};

use midterm_integration::{
    average_forecasts, candidate_counts, db, race_ratings, win_rates, IntegrationPipeline,
    Office, PipelineConfig, WinRateFilter,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("import");
    let config = load_config(args.get(2).map(PathBuf::from))?;

    match mode {
        "import" => run_import(config),
        "query" => run_query(config),
        other => {
            eprintln!("❌ Unknown mode '{}'", other);
            eprintln!("   Usage: midterm-integration [import|query] [config.toml]");
            std::process::exit(2);
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_path(&path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            info!("No config file given, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

fn run_import(config: PipelineConfig) -> Result<()> {
    println!("🗳️  Midterm Integration - CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Name map
    println!("\n📇 Loading name map...");
    let pipeline = IntegrationPipeline::from_config(config.clone())
        .with_context(|| format!("Failed to load name map {}", config.inputs.name_map.display()))?;

    // 2. Store
    println!("\n🔧 Opening database...");
    let mut conn = db::open(&config.database)
        .with_context(|| format!("Failed to open {}", config.database.display()))?;
    println!("✓ {} (WAL mode)", config.database.display());

    // 3. Run
    println!("\n💾 Integrating sources...");
    let report = pipeline.run(&mut conn).context("Pipeline run failed")?;

    println!("✓ Candidates: {}", report.inserted.candidates);
    println!("✓ Stances:    {}", report.inserted.stances);
    println!("✓ Forecasts:  {}", report.inserted.forecasts);
    println!("✓ Results:    {}", report.inserted.results);

    // 4. Rejections + checks
    println!("\n🔍 Row outcomes...");
    for (kind, count) in &report.rejection_counts {
        println!("   {}: {}", kind, count);
    }
    println!("   Filtered (out of scope): {}", report.rows_filtered);
    println!("   {}", report.quality.summary());
    println!("   Vote shares: {}", report.vote_shares.summary());
    for tally in &report.vote_shares.flagged {
        println!("   ⚠️  {}", tally.summary());
    }

    if let Some(path) = &config.report {
        report.write_json(path)?;
        println!("\n📝 Report: {}", path.display());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Run {} complete", report.run_id);
    println!("   Store digest: {}", report.store_digest);

    Ok(())
}

fn run_query(config: PipelineConfig) -> Result<()> {
    let db_path: &Path = &config.database;

    if !db_path.exists() {
        eprintln!("❌ Database not found!");
        eprintln!("   Run: midterm-integration import");
        eprintln!("   to build it first.");
        std::process::exit(1);
    }

    let conn = db::open_read_only(db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    println!("📊 Candidates by stance");
    for row in candidate_counts(&conn, None)? {
        println!("   {:<7} {:<24} {:>5}", row.office.as_str(), row.stance.as_str(), row.candidates);
    }

    println!("\n🏆 Win rates (House, by incumbency)");
    let filter = WinRateFilter {
        office: Some(Office::House),
        incumbent: None,
    };
    for row in win_rates(&conn, &filter)? {
        println!(
            "   {:<24} {:<10} {:>3}/{:<3} {:>6.1}%",
            row.stance.as_str(),
            if row.incumbent { "incumbent" } else { "challenger" },
            row.winners,
            row.candidates,
            row.win_rate * 100.0
        );
    }

    println!("\n🔮 Mean forecast win probability");
    for row in average_forecasts(&conn, None)? {
        println!(
            "   {:<7} {:<24} {:>5} {:>6.1}%",
            row.office.as_str(),
            row.stance.as_str(),
            row.candidates,
            row.mean_win_probability * 100.0
        );
    }

    println!("\n📍 Race ratings");
    for row in race_ratings(&conn)? {
        println!("   {:<8} {}", row.race, row.rating.label());
    }

    Ok(())
}
