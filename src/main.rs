//! CLI entry point for the clipvault tool.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use clipvault_core::{
    AssetQuery, Config, Crawler, Database, DownloadPipeline, Event, EventBus, HarvestEngine,
    PipelineConfig, ProfileRegistry, QueryTemplate, Store,
};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let db = Database::new(&args.db)
        .await
        .with_context(|| format!("opening database {}", args.db.display()))?;
    let store = Store::new(db);

    let result = dispatch(args, config, store.clone()).await;

    store.database().clone().close().await;
    result
}

async fn dispatch(args: Args, mut config: Config, store: Store) -> Result<()> {
    match args.command {
        Command::Crawl {
            start_url,
            profile,
            headed,
            no_resume,
            download,
        } => {
            if let Some(url) = start_url {
                config.start_urls = vec![url];
            }
            if !profile.is_empty() {
                config.profiles = profile;
            }
            if headed {
                config.headless = false;
            }
            if no_resume {
                config.resume = false;
            }
            run_crawl(&config, store, download).await
        }
        Command::Download {
            concurrency,
            max_retries,
            output_dir,
        } => {
            if let Some(concurrency) = concurrency {
                config.concurrency = usize::from(concurrency);
            }
            if let Some(max_retries) = max_retries {
                config.max_retries = u32::from(max_retries);
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }
            run_download(&config, store).await
        }
        Command::Harvest { template } => run_harvest(&template, store).await,
        Command::Search {
            query,
            all,
            favorites,
            downloaded,
            limit,
        } => run_search(&store, &query.join(" "), all, favorites, downloaded, limit).await,
        Command::Stats => {
            let stats = store.stats().await?;
            println!(
                "assets: {}  streams: {}  pages done: {}  queued: {}  failed: {}",
                stats.assets_found, stats.streams_found, stats.pages_done, stats.queued, stats.failed
            );
            Ok(())
        }
        Command::RebuildIndex => {
            let count = store.rebuild_index().await?;
            info!(count, "free-text index rebuilt");
            Ok(())
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear the archive without --yes");
            }
            store.clear_archive().await?;
            info!("archive cleared");
            Ok(())
        }
    }
}

async fn run_crawl(config: &Config, store: Store, download: bool) -> Result<()> {
    let events = EventBus::default();
    let registry = ProfileRegistry::with_builtins();
    let crawler = Crawler::new(store.clone(), events.clone(), config.clone(), &registry)?;
    crawler.seed().await?;

    let handle = crawler.handle();
    let interrupt_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping crawl");
            interrupt_handle.stop();
        }
    });

    let pipeline = if download {
        let pipeline = Arc::new(DownloadPipeline::new(
            store.clone(),
            events.clone(),
            PipelineConfig::from_config(config),
        )?);
        pipeline.preload_seen().await?;

        // Feed freshly discovered assets straight into the pool
        let feeder = Arc::clone(&pipeline);
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Event::AssetDiscovered(asset) = event {
                    feeder.enqueue(&asset);
                }
            }
        });

        let runner = Arc::clone(&pipeline);
        let run_task = tokio::spawn(async move { runner.run().await });
        Some((pipeline, run_task))
    } else {
        None
    };

    crawler.run().await?;

    if let Some((pipeline, run_task)) = pipeline {
        // Let the pool finish what the crawl discovered
        info!("crawl done; waiting for downloads to drain");
        run_task.await.ok();
        let stats = pipeline.stats();
        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            retried = stats.retried(),
            "downloads finished"
        );
    }

    let stats = store.stats().await?;
    info!(
        assets = stats.assets_found,
        streams = stats.streams_found,
        pages = stats.pages_done,
        failed = stats.failed,
        "crawl summary"
    );
    Ok(())
}

async fn run_download(config: &Config, store: Store) -> Result<()> {
    let events = EventBus::default();
    let pipeline = Arc::new(DownloadPipeline::new(
        store,
        events.clone(),
        PipelineConfig::from_config(config),
    )?);
    pipeline.preload_seen().await?;
    let queued = pipeline.enqueue_pending().await?;
    if queued == 0 {
        info!("nothing to download");
        return Ok(());
    }

    let interrupt = Arc::clone(&pipeline);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping downloads");
            interrupt.stop();
        }
    });

    // One spinner line carrying the latest per-asset progress text
    let bar = ProgressBar::new(queued as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
    {
        bar.set_style(style);
    }
    let progress_bar = bar.clone();
    let mut rx = events.subscribe();
    let ui_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                Event::DownloadProgress {
                    asset_id,
                    status_text,
                    ..
                } => progress_bar.set_message(format!("{asset_id}: {status_text}")),
                Event::DownloadComplete {
                    asset_id, success, ..
                } => {
                    progress_bar.inc(1);
                    if !success {
                        progress_bar.set_message(format!("{asset_id}: failed"));
                    }
                }
                _ => {}
            }
        }
    });

    pipeline.run().await;
    bar.finish_and_clear();
    ui_task.abort();

    let stats = pipeline.stats();
    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        retried = stats.retried(),
        "download complete"
    );
    Ok(())
}

async fn run_harvest(template_path: &Path, store: Store) -> Result<()> {
    let text = std::fs::read_to_string(template_path)
        .with_context(|| format!("reading template {}", template_path.display()))?;
    let template: QueryTemplate = serde_json::from_str(&text)
        .with_context(|| format!("parsing template {}", template_path.display()))?;

    let engine = HarvestEngine::new(store)?;
    let report = engine.run(&template).await?;
    println!(
        "branches: {}  pages: {}  items: {}  new assets: {}  streams: {}  duplicates: {}",
        report.branches, report.pages, report.items, report.new_assets, report.streams,
        report.duplicates
    );
    Ok(())
}

async fn run_search(
    store: &Store,
    text: &str,
    all: bool,
    favorites: bool,
    downloaded: bool,
    limit: i64,
) -> Result<()> {
    let query = AssetQuery {
        text: text.to_string(),
        mode: if all {
            clipvault_core::store::TextMode::All
        } else {
            clipvault_core::store::TextMode::Any
        },
        favorites_only: favorites,
        downloaded_only: downloaded,
        limit,
        ..AssetQuery::default()
    };
    let assets = store.search(&query).await?;
    if assets.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for asset in assets {
        let stream = if asset.stream_url.is_empty() { " " } else { "S" };
        let local = if asset.local_path.is_empty() { " " } else { "D" };
        println!(
            "{:>10}  [{stream}{local}]  {:<40}  {:<20}  {}",
            asset.asset_id,
            truncate(&asset.title, 40),
            truncate(&asset.creator, 20),
            asset.resolution
        );
    }
    Ok(())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        value.chars().take(max.saturating_sub(1)).collect::<String>() + "\u{2026}"
    }
}
