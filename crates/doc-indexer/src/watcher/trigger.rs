//! Scheduling ingestion passes: fixed-interval polling or debounced
//! filesystem events

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::pipeline::IngestionWatcher;
use crate::config::{WatchMode, WatcherConfig};
use crate::error::{Error, Result};

/// Run passes for `group_key` until `shutdown` resolves.
///
/// One pass runs immediately so files dropped while the process was down
/// are picked up. A pass in progress finishes before shutdown returns.
pub async fn run_watch_loop<F>(watcher: Arc<IngestionWatcher>, group_key: String, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    watcher.folders().ensure_exist()?;

    match watcher.config().mode {
        WatchMode::Poll => poll_loop(watcher, group_key, shutdown).await,
        WatchMode::Events => event_loop(watcher, group_key, shutdown).await,
    }
}

async fn run_pass(watcher: &IngestionWatcher, group_key: &str) {
    match watcher.run_ingestion_pass(group_key).await {
        Ok(report) if !report.files.is_empty() => {
            tracing::info!(
                "{} processed, {} failed",
                report.processed().count(),
                report.failed().count()
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Ingestion pass for {} failed: {}", group_key, e),
    }
}

async fn poll_loop<F>(watcher: Arc<IngestionWatcher>, group_key: String, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let period = watcher.config().poll_interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    tracing::info!(
        "Polling {} every {:?} for group {}",
        watcher.folders().incoming.display(),
        period,
        group_key
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => run_pass(&watcher, &group_key).await,
        }
    }

    tracing::info!("Watcher for {} stopped", group_key);
    Ok(())
}

/// Whether `event` may have left a new file in the incoming folder.
///
/// The archive rename shows up as the source half of a rename; it and
/// anything whose path is already gone are ignored.
fn schedules_pass(event: &Event, filter: &WatcherConfig) -> bool {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .any(|p| filter.accepts(p) && p.is_file()),
        _ => false,
    }
}

async fn event_loop<F>(watcher: Arc<IngestionWatcher>, group_key: String, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let filter = watcher.config().clone();

    let mut fs_watcher: RecommendedWatcher = notify::recommended_watcher(
        move |res: std::result::Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Watch error: {}", e);
                    return;
                }
            };

            if schedules_pass(&event, &filter) {
                let _ = tx.send(());
            }
        },
    )
    .map_err(|e| Error::internal(format!("Failed to start file watcher: {}", e)))?;

    let incoming = watcher.folders().incoming.clone();
    fs_watcher
        .watch(&incoming, RecursiveMode::NonRecursive)
        .map_err(|e| Error::internal(format!("Failed to watch {}: {}", incoming.display(), e)))?;

    tracing::info!(
        "Watching {} for new files (group {})",
        incoming.display(),
        group_key
    );

    let debounce = watcher.config().debounce();
    tokio::pin!(shutdown);

    run_pass(&watcher, &group_key).await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            signal = rx.recv() => {
                if signal.is_none() {
                    tracing::warn!("File watcher channel closed");
                    break;
                }
                // let a burst of writes settle into one pass
                loop {
                    match timeout(debounce, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
                run_pass(&watcher, &group_key).await;
            }
        }
    }

    drop(fs_watcher);
    tracing::info!("Watcher for {} stopped", group_key);
    Ok(())
}
