//! doc-indexer command line
//!
//! Run with: cargo run -p doc-indexer -- watch --serve

use anyhow::Context;
use clap::{Parser, Subcommand};
use doc_indexer::{
    config::IndexerConfig,
    server::{AppState, IndexerServer},
    watcher::run_watch_loop,
};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOCAL_CONFIG: &str = "doc-indexer.toml";

#[derive(Parser)]
#[command(name = "doc-indexer", about = "Incremental PDF ingestion and retrieval", version)]
struct Cli {
    /// Config file (default: ./doc-indexer.toml, then the user config dir)
    #[arg(long, short, global = true, env = "DOC_INDEXER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the incoming folder and index new files until Ctrl+C
    Watch {
        /// Group to ingest into (default: group_key from config)
        #[arg(long)]
        group: Option<String>,
        /// Also serve the HTTP API
        #[arg(long)]
        serve: bool,
    },

    /// Run a single ingestion pass and print the report
    Ingest {
        #[arg(long)]
        group: Option<String>,
    },

    /// Nearest chunks for a query
    Search {
        query: String,
        /// Number of results
        #[arg(short, long, default_value = "4")]
        k: usize,
        /// Restrict to one group
        #[arg(long)]
        group: Option<String>,
    },

    /// Write a default config file and create the folders
    Init {
        /// Where to write the config
        #[arg(long, default_value = LOCAL_CONFIG)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Ledger statistics and recent batches for a group
    Stats {
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Serve the HTTP API only
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_indexer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Command::Init { path, force } = &cli.command {
        return init(path, *force);
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = IndexerConfig::load(config_path.as_deref()).context("invalid configuration")?;
    match &config_path {
        Some(path) => tracing::info!("Configuration loaded from {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    let state = AppState::new(config).context("failed to open the index")?;

    match cli.command {
        Command::Watch { group, serve } => {
            let group = group.unwrap_or_else(|| state.default_group().to_string());
            watch_folder(state, group, serve).await?
        }
        Command::Ingest { group } => {
            let group = group.unwrap_or_else(|| state.default_group().to_string());
            let report = state.watcher().run_ingestion_pass(&group).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                anyhow::bail!("{} file(s) failed", report.failed().count());
            }
        }
        Command::Search { query, k, group } => {
            let results = match group {
                Some(group) => state.retriever().search_in_group(&query, k, &group).await?,
                None => state.retriever().search(&query, k).await?,
            };
            if results.is_empty() {
                println!("No results");
            }
            for (i, hit) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} p.{} #{}",
                    i + 1,
                    hit.score,
                    hit.metadata.source,
                    hit.metadata.page_number,
                    hit.metadata.chunk_number
                );
                println!("   {}", hit.text.replace('\n', " "));
            }
        }
        Command::Stats { group, limit } => {
            let group = group.unwrap_or_else(|| state.default_group().to_string());
            let stats = state.ledger().stats(&group)?;
            let batches = state.ledger().recent_batches(&group, limit)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "stats": stats,
                    "recent_batches": batches,
                }))?
            );
        }
        Command::Serve => {
            let (_tx, rx) = shutdown_channel();
            IndexerServer::new(state).start(wait_for(rx)).await?;
        }
        Command::Init { .. } => {}
    }

    Ok(())
}

/// Explicit path, then `./doc-indexer.toml`, then `<config dir>/doc-indexer/config.toml`
fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("doc-indexer").join("config.toml"))
        .filter(|path| path.is_file())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = IndexerConfig::default();
    let raw = toml::to_string_pretty(&config).context("failed to render default config")?;
    std::fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))?;
    config.folders.ensure_exist()?;

    println!("Wrote {}", path.display());
    println!("Drop PDFs into {}", config.folders.incoming.display());
    Ok(())
}

async fn watch_folder(state: AppState, group: String, serve: bool) -> anyhow::Result<()> {
    let (tx, rx) = shutdown_channel();

    if !serve {
        run_watch_loop(state.watcher().clone(), group, wait_for(rx)).await?;
        return Ok(());
    }

    // bind up front so a busy port fails the command right away
    let server = IndexerServer::new(state.clone());
    let listener = server
        .listen()
        .await
        .with_context(|| format!("cannot serve on {}", server.address()))?;
    tracing::info!("API: http://{}", server.address());
    let mut server_task = tokio::spawn(server.serve(listener, wait_for(rx.clone())));

    let watch = run_watch_loop(state.watcher().clone(), group, wait_for(rx));
    tokio::pin!(watch);

    tokio::select! {
        result = &mut watch => {
            let _ = tx.send(true);
            let served = server_task.await.context("server task panicked")?;
            result?;
            served?;
        }
        served = &mut server_task => {
            // the server stopped on its own; stop watching too
            let _ = tx.send(true);
            let watched = watch.await;
            served.context("server task panicked")??;
            watched?;
        }
    }
    Ok(())
}

/// A channel flipped to `true` on Ctrl+C
fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            let _ = signal_tx.send(true);
        }
    });
    (tx, rx)
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
