mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use binggo_core::config::{self, Config};
use binggo_core::{MarketCode, ResolutionCode, WallpaperRecord};
use binggo_ingest::{BingFeedClient, CollectionRequest, Collector};
use binggo_queue::{DownloadEvent, DownloadManager, DownloadStatus, HttpDownloadClient};
use binggo_storage::WallpaperRepository;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    config::load_dotenv();
    let args = CliArgs::parse();

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(url) = &args.database_url {
        config.storage.database_url = url.clone();
    }

    // Ctrl-C cancels whatever is running.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Markets => {
            for m in MarketCode::ALL {
                let info = m.info();
                println!("{} {:<6} {:<14} {} / {}", info.flag, info.code, info.name, info.country_en, info.country_zh);
            }
            Ok(())
        }
        Command::Resolutions => {
            for r in ResolutionCode::ALL {
                let info = r.info();
                println!("{:<9} {:<8} {:>4}x{:<4} {}", info.code, info.name, info.width, info.height, info.suffix);
            }
            Ok(())
        }
        Command::Collect { all_markets, market, days, resolution, max_concurrent_requests } => {
            let c = &mut config.collection;
            c.all_markets |= all_markets;
            if let Some(m) = market {
                c.market = m.parse()?;
            }
            if let Some(d) = days {
                c.days = d;
            }
            if let Some(r) = resolution {
                c.resolution = r.parse()?;
            }
            if let Some(n) = max_concurrent_requests {
                c.max_concurrent_requests = n;
            }
            config.validate().context("invalid collection options")?;
            config.log_summary();

            let repo = open_repository(&config).await?;
            let feed = BingFeedClient::new(&config.feed).context("failed to build feed client")?;
            let collector = Collector::new(Arc::new(feed), config.collection.max_concurrent_requests)?;
            let request = CollectionRequest::from(&config.collection);

            let summary = binggo_cli::run_collection(
                &collector,
                &repo,
                &request,
                &config.feed.base_url,
                &cancel,
            )
            .await?;
            println!(
                "collected {} records, {} valid, {} new, {} already stored",
                summary.collected,
                summary.mapped,
                summary.inserted,
                summary.duplicates()
            );
            Ok(())
        }
        Command::Latest { market, count } => {
            let repo = open_repository(&config).await?;
            let rows = repo.get_latest(market.parse()?, count).await?;
            print_rows(&rows);
            Ok(())
        }
        Command::List { market, page, size } => {
            let repo = open_repository(&config).await?;
            let rows = repo.get_by_market(market.parse()?, page, size).await?;
            print_rows(&rows);
            Ok(())
        }
        Command::Range { market, start, end } => {
            let repo = open_repository(&config).await?;
            let rows = repo.get_by_date_range(market.parse()?, start, end).await?;
            print_rows(&rows);
            Ok(())
        }
        Command::Show { id } => {
            let repo = open_repository(&config).await?;
            match repo.get_by_id(id).await? {
                Some(row) => println!("{}", serde_json::to_string_pretty(&row)?),
                None => println!("no wallpaper with id {id}"),
            }
            Ok(())
        }
        Command::Download { id, resolution, dir } => {
            if let Some(dir) = dir {
                config.download.download_dir = dir;
            }
            let resolution = match resolution {
                Some(r) => r.parse()?,
                None => config.collection.resolution,
            };
            download(&config, id, resolution, &cancel).await
        }
    }
}

async fn open_repository(config: &Config) -> Result<WallpaperRepository> {
    let pool = binggo_storage::init_pool(&config.storage)
        .await
        .with_context(|| format!("failed to open database {}", config.storage.database_url))?;
    Ok(WallpaperRepository::new(pool))
}

fn print_rows(rows: &[WallpaperRecord]) {
    if rows.is_empty() {
        println!("(no wallpapers)");
        return;
    }
    for row in rows {
        println!(
            "{}  {}  {:<6} {:<9} {}",
            row.id, row.actual_date, row.market.code(), row.resolution.code(), row.info.title
        );
    }
}

async fn download(
    config: &Config,
    wallpaper_id: uuid::Uuid,
    resolution: ResolutionCode,
    cancel: &CancellationToken,
) -> Result<()> {
    let repo = open_repository(config).await?;
    let client = HttpDownloadClient::new(config.feed.timeout())?;
    let manager = DownloadManager::new(&config.download, Arc::new(client), Arc::new(repo))?;
    manager.set_download_dir(&config.download.download_dir).await?;

    let mut events = manager.subscribe();
    let task_id = manager.submit(wallpaper_id, resolution);
    info!(task_id = %task_id, "download submitted");

    let mut cancel_sent = false;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled(), if !cancel_sent => {
                cancel_sent = true;
                manager.cancel(task_id);
                continue;
            }
            e = events.recv() => e,
        };

        match event {
            Ok(DownloadEvent::Progress(task)) if task.id == task_id => {
                let eta = task.eta_seconds.map(|s| format!("{s}s")).unwrap_or_else(|| "?".into());
                println!(
                    "{:>5.1}%  {} bytes  {:.0} B/s  eta {}",
                    task.progress_percent, task.downloaded_bytes, task.bytes_per_second, eta
                );
            }
            Ok(DownloadEvent::StatusChanged { task_id: id, new, task, .. }) if id == task_id => {
                if new.is_terminal() {
                    match new {
                        DownloadStatus::Completed => println!(
                            "completed: {}",
                            task.file_path.map(|p| p.display().to_string()).unwrap_or_default()
                        ),
                        DownloadStatus::Failed => println!(
                            "failed: {}",
                            task.error.unwrap_or_default()
                        ),
                        _ => println!("canceled"),
                    }
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress output lagged"),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
