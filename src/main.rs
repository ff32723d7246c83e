use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::fs::File;
use std::path::{Path, PathBuf};

use holdings_etl::{
    allocation_by_year, find_run_by_fingerprint, get_latest_merge_map, get_load_runs,
    group_totals, logging, open_existing, read_all, setup_database, store_output,
    verify_count, GroupBy, HoldingsQuery, Pipeline, PipelineConfig, RuleTables,
};

#[derive(Parser)]
#[command(name = "holdings-etl", version, about = "Yearly fund holdings ETL")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "HOLDINGS_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every disclosure CSV in a directory and load it
    Run(RunArgs),
    /// Show load runs and the latest name merges
    Report {
        #[arg(long, env = "HOLDINGS_DB")]
        db: PathBuf,
    },
    /// Aggregate stored holdings
    Query(QueryArgs),
    /// Print the built-in rule tables as JSON
    Rules,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    data_dir: PathBuf,

    #[arg(long, env = "HOLDINGS_DB")]
    db: PathBuf,

    /// TOML pipeline config
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON rule tables, overrides `rules_path` from the config
    #[arg(long)]
    rules: Option<PathBuf>,

    #[arg(long)]
    export_csv: Option<PathBuf>,

    #[arg(long)]
    merge_report: Option<PathBuf>,

    /// Load even if this exact input was loaded before
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long, env = "HOLDINGS_DB")]
    db: PathBuf,

    #[arg(long)]
    from: Option<i32>,

    #[arg(long)]
    to: Option<i32>,

    #[arg(long, value_delimiter = ',')]
    countries: Vec<String>,

    /// Comma-separated dimensions; omit for the yearly allocation split
    #[arg(long, value_delimiter = ',')]
    group_by: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match cli.command {
        Command::Run(args) => run_load(args),
        Command::Report { db } => run_report(&db),
        Command::Query(args) => run_query(args),
        Command::Rules => {
            println!("{}", serde_json::to_string_pretty(&RuleTables::default())?);
            Ok(())
        }
    }
}

fn run_load(args: RunArgs) -> Result<()> {
    println!("🗄️  Holdings ETL - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if args.rules.is_some() {
        config.rules_path = args.rules.clone();
    }

    // 1. Read sources
    println!("\n📂 Reading disclosures from {:?}...", args.data_dir);
    let tables = read_all(&args.data_dir)?;
    println!("✓ Read {} source files", tables.len());

    // 2. Setup database
    let mut conn = Connection::open(&args.db)
        .with_context(|| format!("Failed to open database {:?}", args.db))?;
    setup_database(&conn)?;

    // Fingerprint covers rules and resolver settings too
    let pipeline = Pipeline::from_config(&config)?;
    if !args.force {
        let input = pipeline.fingerprint(&tables)?;
        if let Some(run_id) = find_run_by_fingerprint(&conn, &input)? {
            println!(
                "\n⏭️  Input and rules already loaded by run {}, nothing to do (use --force)",
                run_id
            );
            return Ok(());
        }
    }

    // 3. Transform
    println!("\n🚚 Running pipeline...");
    let output = pipeline.run(&tables)?;
    println!("✓ {}", output.report.summary());

    for warning in &output.report.warnings {
        println!("⚠️  {}", warning);
    }

    // 4. Store
    println!("\n💾 Storing holdings...");
    let stored = store_output(&mut conn, &output)?;
    println!(
        "✓ Replaced {} (category, year) slices: -{} +{} rows",
        stored.replaced_slices, stored.deleted_rows, stored.inserted_rows
    );

    // 5. Exports
    if let Some(path) = &args.export_csv {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        output.write_csv(file)?;
        println!("✓ Exported holdings to {:?}", path);
    }

    if let Some(path) = &args.merge_report {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        output.merge_map.write_csv(file)?;
        println!("✓ Wrote merge report to {:?}", path);
    }

    let count = verify_count(&conn)?;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Database contains {} holdings", count);

    Ok(())
}

fn run_report(db: &Path) -> Result<()> {
    let conn = open_existing(db)?;

    let runs = get_load_runs(&conn)?;
    println!("📊 {} load runs", runs.len());
    for run in &runs {
        println!(
            "  {} {} | {} sources, {} rows, {} merged names",
            run.started_at, run.run_id, run.source_count, run.row_count, run.merged_names
        );
    }

    let merges = get_latest_merge_map(&conn)?;
    println!("\n🔗 Latest merges ({} of {} names)", merges.merged_count(), merges.len());
    for entry in merges.merges() {
        println!("  {} → {} ({})", entry.original, entry.canonical, entry.score);
    }

    Ok(())
}

fn run_query(args: QueryArgs) -> Result<()> {
    let conn = open_existing(&args.db)?;

    let query = HoldingsQuery {
        year_from: args.from,
        year_to: args.to,
        countries: args.countries,
    };

    if args.group_by.is_empty() {
        let allocation = allocation_by_year(&conn, &query)?;
        println!("{}", serde_json::to_string_pretty(&allocation)?);
        return Ok(());
    }

    let group_by = args
        .group_by
        .iter()
        .map(|label| {
            GroupBy::parse(label).with_context(|| format!("Unknown grouping dimension '{}'", label))
        })
        .collect::<Result<Vec<_>>>()?;

    let totals = group_totals(&conn, &group_by, &query)?;
    println!("{}", serde_json::to_string_pretty(&totals)?);

    Ok(())
}
