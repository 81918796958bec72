use clap::Parser;
use instaco::{Config, RunOptions};
use instaco::db::{Db, TrackedCollection, migrate};
use instaco::ingest::{discover_export_files, require_pair};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "instaco")]
#[command(about = "Compare Instagram followers and followings exports and list who doesn't follow back")]
struct Args {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Settings file (defaults to $INSTACO_CONFIG or ./settings.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Don't record history for this run
    #[arg(long)]
    no_history: bool,
}

fn confirm() -> Result<bool> {
    print!("Do you want to continue? (y/n) ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let _ = dotenv::dotenv();
            Config::load_from(path)?
        }
        None => Config::load()?,
    };

    // RUST_LOG wins over the settings file
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.log_level)
    ).init();

    log::info!("Starting instaco v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Input folder: {}", config.input_dir().display());
    log::info!("Output folder: {}", config.output_dir().display());
    log::info!("Database path: {}", config.db_path().display());

    for dir in [config.input_dir(), config.output_dir(), config.connection.uri.as_path()] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let db = Db::new(config.db_path());
    let migrations_dir = config.store.migrations_dir.clone();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)
    }).await?;
    let tracked = TrackedCollection::ensure(db.clone(), &config.connection.collection).await?;
    log::info!("Database initialized");

    let files = discover_export_files(config.input_dir())?;
    let files = require_pair(config.input_dir(), files)?;
    for file in &files {
        println!("Found {}", file.display());
    }

    if !args.yes && !confirm()? {
        println!("Aborted, nothing was changed.");
        return Ok(());
    }

    let mut options = RunOptions::from_config(&config);
    if args.no_history {
        options.history = false;
    }

    let summary = instaco::run(&config, &db, &tracked, &files, &options).await?;

    println!("\n=== Run summary ===\n");
    for report in &summary.files {
        println!(
            "{:<40} {:>10} {:>8} records in {} bulk writes",
            report.path.display(),
            report.kind,
            report.records,
            report.bulk_writes
        );
    }
    println!();
    println!("Tracked accounts reset:   {}", summary.reconcile.reset);
    println!("Followers replayed:       {}", summary.reconcile.followers_replayed);
    println!("Followings replayed:      {}", summary.reconcile.followings_replayed);
    println!("History entries recorded: {}", summary.reconcile.history_entries);
    println!();
    println!(
        "{} accounts don't follow you back -> {}",
        summary.reconcile.one_way.len(),
        summary.diff_list.display()
    );
    println!(
        "{} accounts stopped following you -> {}",
        summary.reconcile.lost_followers.len(),
        summary.unfollowers_list.display()
    );
    println!("\nDone in {:.2}s", summary.elapsed.as_secs_f64());

    Ok(())
}
