// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! feed-mirror command line.
//!
//! ```text
//! feed-mirror --config mirror.json run       # poll until Ctrl-C / SIGTERM
//! feed-mirror --config mirror.json once      # one cycle, then exit
//! feed-mirror --config mirror.json stat      # remote head vs local watermark
//! feed-mirror --db web.db dump 149470001      # print one stored body
//! ```

use clap::{Args, Parser, Subcommand};
use feed_mirror::{
    metrics, HttpFeed, MirrorConfig, MirrorEngine, MirrorError, Result, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "feed-mirror", version, about = "Mirror a remote record feed into SQLite")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Commands {
    /// Poll the feed until interrupted (default)
    Run,
    /// Run a single pull cycle and exit
    Once,
    /// Print the remote max id and the local watermark
    Stat,
    /// Print the decoded body of one stored record
    Dump {
        /// Record id
        id: i64,
    },
}

/// Config file plus per-field overrides.
#[derive(Args, Clone, Debug, Default)]
struct Overrides {
    /// JSON config file
    #[arg(long, global = true, env = "FEED_MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true, env = "FEED_MIRROR_DB")]
    db: Option<String>,

    /// Feed base URL
    #[arg(long, global = true, env = "FEED_MIRROR_URL")]
    base_url: Option<String>,

    /// Feed name
    #[arg(long, global = true)]
    feed: Option<String>,

    /// Never resume below this id
    #[arg(long, global = true)]
    floor: Option<i64>,

    /// URL pattern forwarded to the feed
    #[arg(long, global = true)]
    filter: Option<String>,

    /// Ids per fetch
    #[arg(long, global = true)]
    block_size: Option<i64>,

    /// Basic auth user
    #[arg(long, global = true, env = "FEED_MIRROR_USER")]
    user: Option<String>,

    /// Basic auth password
    #[arg(long, global = true, env = "FEED_MIRROR_PASS", hide_env_values = true)]
    pass: Option<String>,
}

impl Overrides {
    /// Load the config file (or defaults) and apply overrides on top.
    fn load(&self) -> Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::from_file(path)?,
            None => MirrorConfig::default(),
        };

        if let Some(db) = &self.db {
            config.store.sqlite_path = db.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.remote.base_url = base_url.clone();
        }
        if let Some(feed) = &self.feed {
            config.remote.feed = feed.clone();
        }
        if let Some(floor) = self.floor {
            config.pull.floor_id = floor;
        }
        if let Some(filter) = &self.filter {
            config.pull.filter = Some(filter.clone());
        }
        if let Some(block_size) = self.block_size {
            config.pull.block_size = block_size;
        }
        if let Some(user) = &self.user {
            config.remote.username = user.clone();
        }
        if let Some(pass) = &self.pass {
            config.remote.password = pass.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        tracing::error!(error = %e, kind = e.kind(), "feed-mirror failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.overrides.load()?;
    let feed = Arc::new(HttpFeed::new(&config.remote)?);
    let store = Arc::new(SqliteStore::from_config(&config.store).await?);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, feed, Arc::clone(&store)).await,
        Commands::Once => once(config, feed, Arc::clone(&store)).await,
        Commands::Stat => stat(config, feed, Arc::clone(&store)).await,
        Commands::Dump { id } => dump(&store, id).await.map(|text| println!("{text}")),
    };

    store.close().await;
    result
}

async fn run(config: MirrorConfig, feed: Arc<HttpFeed>, store: Arc<SqliteStore>) -> Result<()> {
    let mut engine = MirrorEngine::new(config, feed, store)?;
    engine.start()?;
    tracing::info!("feed-mirror started, press Ctrl+C to stop");

    shutdown_signal().await?;
    tracing::info!("shutting down...");

    engine.shutdown().await;
    Ok(())
}

async fn once(config: MirrorConfig, feed: Arc<HttpFeed>, store: Arc<SqliteStore>) -> Result<()> {
    let engine = MirrorEngine::new(config, feed, store)?;
    let stats = engine.pull().await?;

    println!(
        "range [{}, {}): {} blocks, {} fetched, {} inserted, watermark {}",
        stats.start,
        stats.upper_exclusive,
        stats.blocks,
        stats.fetched,
        stats.inserted,
        display_watermark(stats.watermark),
    );
    Ok(())
}

async fn stat(config: MirrorConfig, feed: Arc<HttpFeed>, store: Arc<SqliteStore>) -> Result<()> {
    let engine = MirrorEngine::new(config, feed, store)?;
    let (remote_max_id, watermark) = engine.positions().await?;

    println!("remote max_id:   {}", remote_max_id);
    println!("local watermark: {}", display_watermark(watermark));
    println!("lag (records):   {}", metrics::lag_records(remote_max_id, watermark));
    Ok(())
}

/// Decoded body of record `id` as UTF-8 text.
async fn dump(store: &SqliteStore, id: i64) -> Result<String> {
    let record = store.get(id).await?.ok_or(MirrorError::NotFound(id))?;
    eprintln!("{record:?}");

    let record = record.into_decoded()?;
    eprintln!("{record:?}");

    String::from_utf8(record.body)
        .map_err(|e| MirrorError::malformed(format!("record {id}: body is not UTF-8: {e}")))
}

fn display_watermark(watermark: Option<i64>) -> String {
    watermark.map_or_else(|| "none".to_string(), |w| w.to_string())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| MirrorError::Internal(format!("failed to register SIGTERM handler: {e}")))?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| MirrorError::Internal(format!("failed to listen for Ctrl+C: {e}")))?;
            }
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| MirrorError::Internal(format!("failed to listen for Ctrl+C: {e}")))
    }
}
