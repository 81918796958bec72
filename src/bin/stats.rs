use clap::Parser;
use std::path::PathBuf;
use instaco::{config::Config, db::{Db, ReferenceCollection, ReferenceKind, TrackedCollection}};

#[derive(Parser, Debug)]
#[command(name = "stats")]
#[command(about = "Show counts of the tracked collection, or one account with its history")]
struct Args {
    /// Show this account and its history
    #[arg(short, long)]
    user: Option<String>,

    /// Settings file (defaults to $INSTACO_CONFIG or ./settings.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            let _ = dotenv::dotenv();
            Config::load_from(path)?
        }
        None => Config::load()?,
    };

    if !config.db_path().exists() {
        println!("No database at {}. Run instaco first.", config.db_path().display());
        return Ok(());
    }

    let db = Db::new(config.db_path());
    let Some(tracked) = TrackedCollection::open(db.clone(), &config.connection.collection).await? else {
        println!("No collection {} yet. Run instaco first.", config.connection.collection);
        return Ok(());
    };

    if let Some(user) = args.user {
        let Some(account) = tracked.get(&user).await? else {
            println!("{} is not in {}", user, tracked.name());
            return Ok(());
        };

        println!("\n=== {} ===\n", account.user);
        println!("  Follows me:        {}", flag(account.follows_me));
        println!("  I follow:          {}", flag(account.follow_it));
        println!("  Followed me first: {}", flag(account.follows_me_before));
        if let Some(ts) = account.timestamp {
            println!("  Since:             {}", ts.format("%Y-%m-%d %H:%M"));
        }
        if let Some(inserted) = account.inserted_at {
            println!("  First seen:        {}", inserted.format("%Y-%m-%d %H:%M"));
        }
        if let Some(updated) = account.updated_at {
            println!("  Last updated:      {}", updated.format("%Y-%m-%d %H:%M"));
        }

        let history = tracked.history(&user).await?;
        if history.is_empty() {
            println!("\nNo history recorded.");
        } else {
            println!("\nHistory (newest first):\n");
            println!("{:-<60}", "");
            println!("{:<20} {:>10} {:>10} {:>16}", "Recorded", "Follows me", "I follow", "Since");
            println!("{:-<60}", "");
            for entry in &history {
                let since = entry
                    .timestamp
                    .map(|ts| ts.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<20} {:>10} {:>10} {:>16}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M"),
                    flag(entry.follows_me),
                    flag(entry.follow_it),
                    since
                );
            }
            println!("{:-<60}", "");
        }
        println!();
        return Ok(());
    }

    let stats = tracked.stats().await?;

    println!("\n=== {} ===\n", tracked.name());
    println!("{:-<40}", "");
    println!("{:<28} {:>10}", "Tracked accounts", stats.total);
    println!("{:<28} {:>10}", "Following me", stats.followers);
    println!("{:<28} {:>10}", "Followed by me", stats.followings);
    println!("{:<28} {:>10}", "Mutual", stats.mutual);
    println!("{:<28} {:>10}", "Not following back", stats.one_way);
    println!("{:<28} {:>10}", "Not followed back", stats.fans);
    println!("{:<28} {:>10}", "No relationship left", stats.lapsed);
    println!("{:<28} {:>10}", "History entries", stats.history_entries);
    println!("{:-<40}", "");

    println!("\nLast imported exports:");
    for kind in ReferenceKind::ALL {
        let count = ReferenceCollection::new(db.clone(), kind).count().await?;
        println!("  {:<12} {:>8}", kind.to_string(), count);
    }
    println!();

    Ok(())
}
