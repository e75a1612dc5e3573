use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use tech_digest::batch::{
    parse_hhmm, BatchCoordinator, BatchOutcome, ScheduleTimes, Scheduler, EVENING_TIME_KEY, MORNING_TIME_KEY,
};
use tech_digest::db::{Inserted, Repository};
use tech_digest::models::BatchKind;
use tech_digest::{AppError, Config, Result};

#[derive(Parser)]
#[command(name = "digest-bot", version, about = "Multi-source tech news digest")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C.
    Run,
    /// Run one batch now and print its report.
    Digest {
        /// morning, evening or manual.
        #[arg(long, default_value = "manual")]
        batch: BatchKind,
    },
    /// Create or migrate the database.
    Init,
    /// Search titles and summaries.
    Search { keyword: String },
    /// Show an article with its latest summary and related articles.
    Show { id: i64 },
    /// Manage bookmarks.
    Bookmark {
        #[command(subcommand)]
        action: BookmarkAction,
    },
    /// Show or change the daily schedule.
    Schedule {
        #[arg(long)]
        morning: Option<String>,
        #[arg(long)]
        evening: Option<String>,
    },
}

#[derive(Subcommand)]
enum BookmarkAction {
    Add {
        article_id: i64,
        #[arg(long)]
        user: String,
    },
    Remove {
        article_id: i64,
        #[arg(long)]
        user: String,
    },
    List {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command, config).await {
        eprintln!("Error: {e}");
        std::process::exit(match e {
            AppError::Config(_) => 2,
            AppError::AlreadyRunning => 3,
            _ => 1,
        });
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let repo = Repository::new(&config.db_path).await?;

    match command {
        Commands::Init => {
            println!(
                "Database ready at {} ({} articles, {} summaries)",
                config.db_path,
                repo.article_count().await?,
                repo.summary_count().await?
            );
        }
        Commands::Digest { batch } => {
            let coordinator = BatchCoordinator::from_config(&config, repo)?;
            let report = coordinator.run(batch).await?;
            println!("{report}");
            if report.outcome == BatchOutcome::Failed {
                return Err(AppError::Other(anyhow::anyhow!("batch {} failed", report.label)));
            }
        }
        Commands::Run => {
            let defaults = ScheduleTimes::parse(&config.schedule.morning, &config.schedule.evening)?;
            let coordinator = Arc::new(BatchCoordinator::from_config(&config, repo.clone())?);
            let scheduler = Scheduler::new(
                coordinator,
                repo,
                defaults,
                Duration::from_secs(config.schedule.tick_seconds.max(1)),
            );
            let handle = scheduler.start();

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            handle.stop().await?;
        }
        Commands::Search { keyword } => {
            let hits = repo.search_summaries(keyword.clone()).await?;
            if hits.is_empty() {
                println!("No results for '{keyword}'");
            }
            for hit in hits {
                println!(
                    "#{} [{}] {} ({})\n  {}\n  {}\n",
                    hit.article_id,
                    hit.source.label(),
                    hit.title,
                    hit.batch,
                    hit.url,
                    first_line(&hit.summary_text)
                );
            }
        }
        Commands::Show { id } => match repo.article_detail(id).await? {
            Some(detail) => {
                let article = &detail.article;
                println!("#{} {} [{}]", article.id, article.title, article.source.label());
                println!("{}", article.source_url);
                match &detail.summary {
                    Some(summary) => println!("\n{}\n({})", summary.text, summary.batch),
                    None => println!("\n(no summary yet)"),
                }
                for related in &detail.related {
                    println!("Related: #{} {} ({})", related.id, related.title, related.source.label());
                }
            }
            None => println!("Article #{id} not found"),
        },
        Commands::Bookmark { action } => match action {
            BookmarkAction::Add { article_id, user } => {
                if repo.get_article(article_id).await?.is_none() {
                    println!("Article #{article_id} not found");
                    return Ok(());
                }
                match repo.add_bookmark(user, article_id).await? {
                    Inserted::New(_) => println!("Bookmarked #{article_id}"),
                    Inserted::AlreadyExists => println!("#{article_id} is already bookmarked"),
                }
            }
            BookmarkAction::Remove { article_id, user } => {
                if repo.remove_bookmark(user, article_id).await? {
                    println!("Removed bookmark #{article_id}");
                } else {
                    println!("#{article_id} was not bookmarked");
                }
            }
            BookmarkAction::List { user } => {
                let entries = repo.list_bookmarks(user).await?;
                if entries.is_empty() {
                    println!("No bookmarks");
                }
                for entry in entries {
                    println!("#{} [{}] {}\n  {}", entry.article_id, entry.source.label(), entry.title, entry.url);
                }
            }
        },
        Commands::Schedule { morning, evening } => {
            for (key, value) in [(MORNING_TIME_KEY, morning), (EVENING_TIME_KEY, evening)] {
                if let Some(value) = value {
                    let time = parse_hhmm(&value)?;
                    repo.set_setting(key, &time.format("%H:%M").to_string()).await?;
                }
            }
            let defaults = ScheduleTimes::parse(&config.schedule.morning, &config.schedule.evening)?;
            let times = ScheduleTimes::load(&repo, defaults).await?;
            println!(
                "Morning digest: {}\nEvening digest: {} ({})",
                times.morning.format("%H:%M"),
                times.evening.format("%H:%M"),
                config.timezone
            );
        }
    }

    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or("")
}
