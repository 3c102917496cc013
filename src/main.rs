use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use feedmail::config::Config;
use feedmail::feed::HttpFeedSource;
use feedmail::notify::{DryRunNotifier, SmtpNotifier};
use feedmail::storage::Database;
use feedmail::sync::{run_sync, SyncOptions, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "feedmail", about = "Mail new RSS/Atom items, each exactly once")]
struct Args {
    /// Configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = "feedmail.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new, empty database
    Create,

    /// Subscribe to a feed
    Add {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Unsubscribe from a feed and forget its delivered items
    Remove {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// List subscribed feeds
    List,

    /// Fetch feeds and mail new items
    Run {
        /// Increase log verbosity (-v debug, -vv trace)
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,

        /// Record new items as delivered without sending mail
        #[arg(long)]
        no_send: bool,

        /// Only sync these feeds
        #[arg(value_name = "FEED_URL")]
        feeds: Vec<String>,
    },
}

fn init_tracing(verbose: u8) {
    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "feedmail=info",
            1 => "feedmail=debug",
            _ => "feedmail=trace",
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let verbose = match &args.command {
        Command::Run { verbose, .. } => *verbose,
        _ => 0,
    };
    init_tracing(verbose);

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config file {}", args.config.display()))?;

    match args.command {
        Command::Create => {
            let db = Database::create(&config.database_path, config.database_timeout())
                .await
                .context("Failed to create database")?;
            db.close().await;
            println!("Created database: {}", config.database_path.display());
        }
        Command::Add { url } => {
            let db = open_db(&config).await?;
            db.add_feed(&url)
                .await
                .with_context(|| format!("Failed to add feed {url}"))?;
            db.close().await;
        }
        Command::Remove { url } => {
            let db = open_db(&config).await?;
            db.remove_feed(&url)
                .await
                .with_context(|| format!("Failed to remove feed {url}"))?;
            db.close().await;
        }
        Command::List => {
            let db = open_db(&config).await?;
            for feed in db.feeds().await.context("Failed to list feeds")? {
                println!("{}", feed.url);
            }
            db.close().await;
        }
        Command::Run { no_send, feeds, .. } => {
            run(&config, no_send, feeds).await?;
        }
    }

    Ok(())
}

async fn open_db(config: &Config) -> Result<Database> {
    Database::open(&config.database_path, config.database_timeout())
        .await
        .with_context(|| {
            format!(
                "Failed to open database {} (run `feedmail create` first?)",
                config.database_path.display()
            )
        })
}

async fn run(config: &Config, no_send: bool, feed_filter: Vec<String>) -> Result<()> {
    let recipient = if no_send {
        config.recipient().unwrap_or_default().to_string()
    } else {
        config.recipient()?.to_string()
    };

    let options = SyncOptions {
        fetch_concurrency: config.fetch_concurrency,
        recipient,
        feed_filter,
    };

    let db = open_db(config).await?;
    let source = Arc::new(
        HttpFeedSource::new(config.fetch_timeout()).context("Failed to build HTTP client")?,
    );

    let report = if no_send {
        run_sync(&db, source, &DryRunNotifier, &options).await
    } else {
        let notifier = SmtpNotifier::new(config.smtp_settings()?)?;
        run_sync(&db, source, &notifier, &options).await
    }
    .context("Sync failed")?;

    print_report(&report);

    if let Some(cutoff) = config.retention_cutoff(Utc::now())? {
        let reaped = db
            .reap_delivered(cutoff, &report.fetched_feeds, &report.observed)
            .await
            .context("Failed to sweep old item records")?;
        if reaped > 0 {
            tracing::info!(reaped = reaped, cutoff = %cutoff, "Swept old item records");
        }
    }

    db.close().await;
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "Fetched {} feeds: {} delivered, {} already delivered, {} failed",
        report.feeds_fetched,
        report.delivered,
        report.already_delivered,
        report.failed_feeds.len()
    );
    for (feed, error) in &report.failed_feeds {
        eprintln!("Warning: could not fetch {feed}: {error}");
    }
}
