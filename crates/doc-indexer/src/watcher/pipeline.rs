//! One ingestion pass over the incoming folder

use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::{validate_group_key, FolderConfig, WatcherConfig};
use crate::error::{Error, Result};
use crate::ingestion::{source_id_for, DocumentChunker};
use crate::sync::{GroupLocks, IndexSynchronizer};
use crate::types::{FileOutcome, FileState, IndexResult, IngestionReport};

/// Moves documents from the incoming folder into the index and then into
/// the processed folder.
///
/// A file is archived only after its chunks are committed; any failure
/// leaves it in place so the next pass retries it.
pub struct IngestionWatcher {
    folders: FolderConfig,
    config: WatcherConfig,
    chunker: Arc<DocumentChunker>,
    synchronizer: Arc<IndexSynchronizer>,
    pass_locks: GroupLocks,
}

impl IngestionWatcher {
    pub fn new(
        folders: FolderConfig,
        config: WatcherConfig,
        chunker: Arc<DocumentChunker>,
        synchronizer: Arc<IndexSynchronizer>,
    ) -> Self {
        Self {
            folders,
            config,
            chunker,
            synchronizer,
            pass_locks: GroupLocks::new(),
        }
    }

    pub fn folders(&self) -> &FolderConfig {
        &self.folders
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Files waiting in the incoming folder, sorted by name.
    /// Subdirectories and other extensions are ignored.
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.folders.incoming)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", self.folders.incoming.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_file() && self.config.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Process every pending file into `group_key`.
    ///
    /// Files are handled one at a time and independently: a failing file is
    /// reported and left in the incoming folder, the rest continue. Passes
    /// for the same group never overlap.
    pub async fn run_ingestion_pass(&self, group_key: &str) -> Result<IngestionReport> {
        validate_group_key(group_key)?;
        let _guard = match self.pass_locks.try_lock(group_key) {
            Some(guard) => guard,
            None => {
                tracing::info!("A pass for {} is already running; waiting for it", group_key);
                self.pass_locks.lock(group_key).await
            }
        };

        self.folders.ensure_exist()?;
        let files = self.pending_files()?;
        let mut report = IngestionReport::new(group_key);

        if files.is_empty() {
            tracing::debug!("No pending files in {}", self.folders.incoming.display());
            return Ok(report);
        }

        tracing::info!(
            "Ingestion pass for {}: {} pending file(s)",
            group_key,
            files.len()
        );

        for path in files {
            let outcome = self.process_file(&path, group_key).await;
            if outcome.state == FileState::Processed {
                report.result += outcome.result;
            }
            report.files.push(outcome);
        }

        let failed = report.failed().count();
        if failed > 0 {
            tracing::warn!(
                "Pass for {} finished with {} failed file(s); they stay in {}",
                group_key,
                failed,
                self.folders.incoming.display()
            );
        }
        tracing::info!(
            "Pass for {}: added {}, deleted {}, skipped {}",
            group_key,
            report.result.added,
            report.result.deleted,
            report.result.skipped
        );

        Ok(report)
    }

    async fn process_file(&self, path: &Path, group_key: &str) -> FileOutcome {
        let source_id = source_id_for(path, &self.folders.incoming);
        let mut outcome = FileOutcome {
            path: path.to_path_buf(),
            source_id: source_id.clone(),
            state: FileState::Processing,
            result: IndexResult::default(),
            archived_to: None,
            error_kind: None,
            error: None,
        };

        tracing::info!("Processing {}", source_id);

        match self.index_file(path, &source_id, group_key).await {
            Ok((result, archived_to)) => {
                outcome.state = FileState::Processed;
                outcome.result = result;
                outcome.archived_to = Some(archived_to);
            }
            Err(e) => {
                tracing::error!("Failed to ingest {}: {}", source_id, e);
                outcome.state = FileState::Failed;
                outcome.error_kind = Some(e.kind().to_string());
                outcome.error = Some(e.to_string());
            }
        }

        outcome
    }

    async fn index_file(&self, path: &Path, source_id: &str, group_key: &str) -> Result<(IndexResult, PathBuf)> {
        let chunker = self.chunker.clone();
        let owned_path = path.to_path_buf();
        let owned_source = source_id.to_string();
        let chunks = tokio::task::spawn_blocking(move || chunker.chunk_as(&owned_path, &owned_source))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))??;

        let result = self
            .synchronizer
            .synchronize_source(source_id, &chunks, group_key)
            .await?;

        let archived_to = self.archive(path)?;
        tracing::info!(
            "Indexed {} ({} chunk(s), {} new) and moved it to {}",
            source_id,
            chunks.len(),
            result.added,
            archived_to.display()
        );
        Ok((result, archived_to))
    }

    /// Move a file into the processed folder, replacing a same-named file.
    ///
    /// Uses a single rename so the file is never in both folders or in
    /// neither. Fails across filesystems.
    fn archive(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| Error::archive(path.display().to_string(), "path has no file name"))?;
        let destination = self.folders.processed.join(name);

        if destination.exists() {
            tracing::warn!("Replacing previously processed {}", destination.display());
        }

        std::fs::rename(path, &destination)
            .map_err(|e| Error::archive(path.display().to_string(), e.to_string()))?;
        Ok(destination)
    }
}
