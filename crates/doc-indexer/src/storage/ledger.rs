//! SQLite record ledger
//!
//! Remembers which chunk ids are indexed in each group, the content hash
//! they were embedded with and which batch last confirmed them. The ledger
//! is the source of truth for deduplication: the vector store is only ever
//! written in ways the ledger can account for.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    BatchRecord, ChunkId, CleanupScope, DiffPlan, IngestionBatch, LedgerCandidate, LedgerEntry,
    LedgerStats,
};

/// Where a ledger connection string points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLocation {
    Memory,
    File(PathBuf),
}

impl LedgerLocation {
    /// Parse `:memory:`, `sqlite://` URLs or a plain path.
    ///
    /// `sqlite:///name.db` is relative to the working directory and
    /// `sqlite:////abs/name.db` is absolute.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let raw = connection_string.trim();
        let path = match raw.strip_prefix("sqlite://") {
            Some(rest) => match rest.strip_prefix('/') {
                Some(path) => path,
                None if rest.is_empty() => return Ok(Self::Memory),
                None => {
                    return Err(Error::Config(format!(
                        "ledger connection string '{}' must look like sqlite:///path",
                        raw
                    )))
                }
            },
            None => raw,
        };

        match path {
            "" | ":memory:" => Ok(Self::Memory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

/// SQLite-backed record ledger
#[derive(Clone)]
pub struct RecordLedger {
    conn: Arc<Mutex<Connection>>,
}

impl RecordLedger {
    /// Open the ledger named by a connection string
    pub fn open(connection_string: &str) -> Result<Self> {
        match LedgerLocation::parse(connection_string)? {
            LedgerLocation::Memory => Self::in_memory(),
            LedgerLocation::File(path) => Self::new(path),
        }
    }

    /// Create or open the ledger at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ledger(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::ledger(format!("Failed to open ledger {}: {}", path.display(), e)))?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.create_schema()?;
        tracing::info!("Record ledger opened at {}", path.display());
        Ok(ledger)
    }

    /// Non-persistent ledger
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::ledger(format!("Failed to open in-memory ledger: {}", e)))?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.create_schema()?;
        Ok(ledger)
    }

    /// Create tables and indexes if missing. Safe to call repeatedly.
    pub fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            "#,
        )
        .map_err(|e| Error::ledger(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                group_key TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (group_key, chunk_id)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_source
                ON ledger_entries(group_key, source_id);

            CREATE TABLE IF NOT EXISTS ingestion_batches (
                id TEXT PRIMARY KEY,
                group_key TEXT NOT NULL,
                started_at TEXT NOT NULL,
                committed_at TEXT NOT NULL,
                added INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                skipped INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_batches_group
                ON ingestion_batches(group_key, committed_at);
            "#,
        )
        .map_err(|e| Error::ledger(format!("Failed to create ledger schema: {}", e)))?;

        tracing::debug!("Ledger schema ready");
        Ok(())
    }

    /// Compare a pass's candidates against what the group already holds.
    ///
    /// Candidates without an entry go to `to_add`; entries within `scope`
    /// that no candidate claims go to `to_delete`. Entries outside the scope
    /// are never proposed for deletion. Read-only.
    pub fn diff(
        &self,
        group_key: &str,
        candidates: &[LedgerCandidate],
        scope: &CleanupScope,
    ) -> Result<DiffPlan> {
        let existing: HashMap<String, (String, String)> = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT chunk_id, source_id, content_hash FROM ledger_entries WHERE group_key = ?1",
                )
                .map_err(|e| Error::ledger(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map(params![group_key], |row| {
                    Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
                })
                .map_err(|e| Error::ledger(format!("Failed to read ledger: {}", e)))?
                .collect::<rusqlite::Result<_>>()
                .map_err(|e| Error::ledger(format!("Failed to read ledger row: {}", e)))?;
            rows
        };

        let mut plan = DiffPlan::default();
        let mut claimed: HashSet<&str> = HashSet::new();

        for candidate in candidates {
            if !claimed.insert(candidate.chunk_id.as_str()) {
                continue;
            }
            match existing.get(candidate.chunk_id.as_str()) {
                None => plan.to_add.push(candidate.clone()),
                Some((_, hash)) => {
                    if *hash != candidate.content_hash {
                        plan.drifted.push(candidate.chunk_id.clone());
                    }
                    plan.unchanged.push(candidate.chunk_id.clone());
                }
            }
        }

        let mut stale: Vec<ChunkId> = existing
            .iter()
            .filter(|(id, (source, _))| scope.contains(source) && !claimed.contains(id.as_str()))
            .map(|(id, _)| ChunkId::from_raw(id.clone()))
            .collect();
        stale.sort();
        plan.to_delete = stale;

        Ok(plan)
    }

    /// Apply a plan in a single transaction.
    ///
    /// Inserts `to_add`, re-stamps `unchanged` with this batch, removes
    /// `to_delete` and records the batch. Either all of it lands or none.
    pub fn commit(&self, batch: &IngestionBatch, plan: &DiffPlan) -> Result<BatchRecord> {
        let committed_at = Utc::now();
        let batch_id = batch.id.to_string();
        let stamp = timestamp(committed_at);

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::ledger(format!("Failed to begin transaction: {}", e)))?;

        {
            let mut insert = tx
                .prepare(
                    r#"
                    INSERT INTO ledger_entries (
                        group_key, chunk_id, source_id, content_hash, batch_id, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(group_key, chunk_id) DO UPDATE SET
                        source_id = excluded.source_id,
                        content_hash = excluded.content_hash,
                        batch_id = excluded.batch_id,
                        updated_at = excluded.updated_at
                    "#,
                )
                .map_err(|e| Error::ledger(format!("Failed to prepare insert: {}", e)))?;

            for candidate in &plan.to_add {
                insert
                    .execute(params![
                        batch.group_key,
                        candidate.chunk_id.as_str(),
                        candidate.source_id,
                        candidate.content_hash,
                        batch_id,
                        stamp,
                    ])
                    .map_err(|e| Error::ledger(format!("Failed to record {}: {}", candidate.chunk_id, e)))?;
            }

            let mut touch = tx
                .prepare(
                    "UPDATE ledger_entries SET batch_id = ?3, updated_at = ?4 WHERE group_key = ?1 AND chunk_id = ?2",
                )
                .map_err(|e| Error::ledger(format!("Failed to prepare update: {}", e)))?;

            for id in &plan.unchanged {
                touch
                    .execute(params![batch.group_key, id.as_str(), batch_id, stamp])
                    .map_err(|e| Error::ledger(format!("Failed to touch {}: {}", id, e)))?;
            }

            let mut delete = tx
                .prepare("DELETE FROM ledger_entries WHERE group_key = ?1 AND chunk_id = ?2")
                .map_err(|e| Error::ledger(format!("Failed to prepare delete: {}", e)))?;

            for id in &plan.to_delete {
                delete
                    .execute(params![batch.group_key, id.as_str()])
                    .map_err(|e| Error::ledger(format!("Failed to delete {}: {}", id, e)))?;
            }

            tx.execute(
                r#"
                INSERT INTO ingestion_batches (
                    id, group_key, started_at, committed_at, added, deleted, skipped
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    batch_id,
                    batch.group_key,
                    timestamp(batch.started_at),
                    stamp,
                    plan.to_add.len() as i64,
                    plan.to_delete.len() as i64,
                    plan.unchanged.len() as i64,
                ],
            )
            .map_err(|e| Error::ledger(format!("Failed to record batch: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::ledger(format!("Failed to commit batch {}: {}", batch.id, e)))?;

        Ok(BatchRecord {
            id: batch.id,
            group_key: batch.group_key.clone(),
            started_at: batch.started_at,
            committed_at,
            added: plan.to_add.len(),
            deleted: plan.to_delete.len(),
            skipped: plan.unchanged.len(),
        })
    }

    /// All entries of a group, ordered by source then chunk id
    pub fn entries(&self, group_key: &str) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                r#"
                SELECT chunk_id, group_key, source_id, content_hash, batch_id, updated_at
                FROM ledger_entries WHERE group_key = ?1
                ORDER BY source_id, chunk_id
                "#,
            )
            .map_err(|e| Error::ledger(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt
            .query_map(params![group_key], row_to_entry)
            .map_err(|e| Error::ledger(format!("Failed to list entries: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::ledger(format!("Failed to read entry: {}", e)))?;

        Ok(entries)
    }

    /// Chunk ids of a group, sorted
    pub fn keys(&self, group_key: &str) -> Result<Vec<ChunkId>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT chunk_id FROM ledger_entries WHERE group_key = ?1 ORDER BY chunk_id")
            .map_err(|e| Error::ledger(format!("Failed to prepare query: {}", e)))?;

        let keys = stmt
            .query_map(params![group_key], |row| row.get::<_, String>(0).map(ChunkId::from_raw))
            .map_err(|e| Error::ledger(format!("Failed to list keys: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::ledger(format!("Failed to read key: {}", e)))?;

        Ok(keys)
    }

    /// Entry and source counts for a group
    pub fn stats(&self, group_key: &str) -> Result<LedgerStats> {
        let conn = self.conn.lock();

        let (entries, sources): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT source_id) FROM ledger_entries WHERE group_key = ?1",
                params![group_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::ledger(format!("Failed to count entries: {}", e)))?;

        let last_batch_at: Option<String> = conn
            .query_row(
                "SELECT MAX(committed_at) FROM ingestion_batches WHERE group_key = ?1",
                params![group_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::ledger(format!("Failed to read last batch: {}", e)))?
            .flatten();

        Ok(LedgerStats {
            group_key: group_key.to_string(),
            entries: entries as usize,
            sources: sources as usize,
            last_batch_at: last_batch_at.as_deref().and_then(parse_timestamp),
        })
    }

    /// Most recent committed batches of a group, newest first
    pub fn recent_batches(&self, group_key: &str, limit: usize) -> Result<Vec<BatchRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, group_key, started_at, committed_at, added, deleted, skipped
                FROM ingestion_batches WHERE group_key = ?1
                ORDER BY committed_at DESC, rowid DESC LIMIT ?2
                "#,
            )
            .map_err(|e| Error::ledger(format!("Failed to prepare query: {}", e)))?;

        let batches = stmt
            .query_map(params![group_key, limit as i64], row_to_batch)
            .map_err(|e| Error::ledger(format!("Failed to list batches: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::ledger(format!("Failed to read batch: {}", e)))?;

        Ok(batches)
    }

    /// Groups that have at least one entry
    pub fn groups(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT DISTINCT group_key FROM ledger_entries ORDER BY group_key")
            .map_err(|e| Error::ledger(format!("Failed to prepare query: {}", e)))?;

        let groups = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::ledger(format!("Failed to list groups: {}", e)))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::ledger(format!("Failed to read group: {}", e)))?;

        Ok(groups)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn column_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp '{}'", raw).into(),
        )
    })
}

fn column_uuid(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        chunk_id: ChunkId::from_raw(row.get::<_, String>(0)?),
        group_key: row.get(1)?,
        source_id: row.get(2)?,
        content_hash: row.get(3)?,
        batch_id: column_uuid(row, 4)?,
        updated_at: column_timestamp(row, 5)?,
    })
}

fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<BatchRecord> {
    Ok(BatchRecord {
        id: column_uuid(row, 0)?,
        group_key: row.get(1)?,
        started_at: column_timestamp(row, 2)?,
        committed_at: column_timestamp(row, 3)?,
        added: row.get::<_, i64>(4)? as usize,
        deleted: row.get::<_, i64>(5)? as usize,
        skipped: row.get::<_, i64>(6)? as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::chunk_id_for;

    const GROUP: &str = "chromadb/my_documents";

    fn candidate(source: &str, ordinal: u32, hash: &str) -> LedgerCandidate {
        LedgerCandidate {
            chunk_id: chunk_id_for(source, ordinal),
            source_id: source.to_string(),
            content_hash: hash.to_string(),
        }
    }

    fn seed(ledger: &RecordLedger, group: &str, candidates: &[LedgerCandidate]) {
        let plan = ledger.diff(group, candidates, &CleanupScope::Group).unwrap();
        ledger.commit(&IngestionBatch::start(group), &plan).unwrap();
    }

    #[test]
    fn test_connection_strings() {
        assert_eq!(LedgerLocation::parse(":memory:").unwrap(), LedgerLocation::Memory);
        assert_eq!(LedgerLocation::parse("sqlite://").unwrap(), LedgerLocation::Memory);
        assert_eq!(
            LedgerLocation::parse("sqlite:///record_manager_cache.sql").unwrap(),
            LedgerLocation::File(PathBuf::from("record_manager_cache.sql"))
        );
        assert_eq!(
            LedgerLocation::parse("sqlite:////var/lib/ledger.db").unwrap(),
            LedgerLocation::File(PathBuf::from("/var/lib/ledger.db"))
        );
        assert_eq!(
            LedgerLocation::parse("data/ledger.db").unwrap(),
            LedgerLocation::File(PathBuf::from("data/ledger.db"))
        );
        assert!(LedgerLocation::parse("sqlite://host/db").is_err());
    }

    #[test]
    fn test_new_candidates_are_added() {
        let ledger = RecordLedger::in_memory().unwrap();
        let candidates = vec![candidate("a.pdf", 0, "h0"), candidate("a.pdf", 1, "h1")];

        let plan = ledger
            .diff(GROUP, &candidates, &CleanupScope::source("a.pdf"))
            .unwrap();
        assert_eq!(plan.to_add.len(), 2);
        assert!(plan.to_delete.is_empty());

        let record = ledger.commit(&IngestionBatch::start(GROUP), &plan).unwrap();
        assert_eq!(record.added, 2);
        assert_eq!(ledger.keys(GROUP).unwrap().len(), 2);
    }

    #[test]
    fn test_known_candidates_are_unchanged_and_drift_is_reported() {
        let ledger = RecordLedger::in_memory().unwrap();
        seed(&ledger, GROUP, &[candidate("a.pdf", 0, "h0"), candidate("a.pdf", 1, "h1")]);

        let plan = ledger
            .diff(
                GROUP,
                &[candidate("a.pdf", 0, "h0"), candidate("a.pdf", 1, "edited")],
                &CleanupScope::source("a.pdf"),
            )
            .unwrap();

        assert!(plan.to_add.is_empty());
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.unchanged.len(), 2);
        assert_eq!(plan.drifted, vec![chunk_id_for("a.pdf", 1)]);
        assert!(!plan.has_writes());
    }

    #[test]
    fn test_cleanup_is_limited_to_scope() {
        let ledger = RecordLedger::in_memory().unwrap();
        seed(
            &ledger,
            GROUP,
            &[candidate("a.pdf", 0, "a0"), candidate("a.pdf", 1, "a1"), candidate("b.pdf", 0, "b0")],
        );

        // a.pdf shrank to one chunk; b.pdf is not part of this pass
        let incremental = ledger
            .diff(GROUP, &[candidate("a.pdf", 0, "a0")], &CleanupScope::source("a.pdf"))
            .unwrap();
        assert_eq!(incremental.to_delete, vec![chunk_id_for("a.pdf", 1)]);

        let full = ledger
            .diff(GROUP, &[candidate("a.pdf", 0, "a0")], &CleanupScope::Group)
            .unwrap();
        let mut expected = vec![chunk_id_for("a.pdf", 1), chunk_id_for("b.pdf", 0)];
        expected.sort();
        assert_eq!(full.to_delete, expected);
    }

    #[test]
    fn test_groups_are_isolated() {
        let ledger = RecordLedger::in_memory().unwrap();
        seed(&ledger, "team-a", &[candidate("a.pdf", 0, "h")]);

        let plan = ledger
            .diff("team-b", &[candidate("a.pdf", 0, "h")], &CleanupScope::Group)
            .unwrap();
        assert_eq!(plan.to_add.len(), 1);

        let empty = ledger.diff("team-b", &[], &CleanupScope::Group).unwrap();
        assert!(empty.to_delete.is_empty());
        assert_eq!(ledger.groups().unwrap(), vec!["team-a".to_string()]);
    }

    #[test]
    fn test_duplicate_candidates_count_once() {
        let ledger = RecordLedger::in_memory().unwrap();
        let c = candidate("a.pdf", 0, "h");

        let plan = ledger
            .diff(GROUP, &[c.clone(), c], &CleanupScope::source("a.pdf"))
            .unwrap();
        assert_eq!(plan.to_add.len(), 1);
    }

    #[test]
    fn test_commit_restamps_and_records_batch() {
        let ledger = RecordLedger::in_memory().unwrap();
        seed(&ledger, GROUP, &[candidate("a.pdf", 0, "h0")]);

        let plan = ledger
            .diff(
                GROUP,
                &[candidate("a.pdf", 0, "h0"), candidate("a.pdf", 1, "h1")],
                &CleanupScope::source("a.pdf"),
            )
            .unwrap();
        let batch = IngestionBatch::start(GROUP);
        ledger.commit(&batch, &plan).unwrap();

        let entries = ledger.entries(GROUP).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.batch_id == batch.id));

        let batches = ledger.recent_batches(GROUP, 10).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].id, batch.id);
        assert_eq!((batches[0].added, batches[0].skipped), (1, 1));

        let stats = ledger.stats(GROUP).unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.sources, 1);
        assert!(stats.last_batch_at.is_some());
    }

    #[test]
    fn test_failed_commit_leaves_ledger_untouched() {
        let ledger = RecordLedger::in_memory().unwrap();
        seed(&ledger, GROUP, &[candidate("a.pdf", 0, "h0")]);
        ledger.execute_raw("DROP TABLE ingestion_batches;").unwrap();

        let plan = ledger
            .diff(GROUP, &[candidate("b.pdf", 0, "b0")], &CleanupScope::Group)
            .unwrap();
        let err = ledger.commit(&IngestionBatch::start(GROUP), &plan).unwrap_err();

        assert!(matches!(err, Error::Ledger(_)));
        assert_eq!(ledger.keys(GROUP).unwrap(), vec![chunk_id_for("a.pdf", 0)]);
    }

    #[test]
    fn test_schema_creation_is_idempotent() {
        let ledger = RecordLedger::in_memory().unwrap();
        seed(&ledger, GROUP, &[candidate("a.pdf", 0, "h0")]);

        ledger.create_schema().unwrap();
        ledger.create_schema().unwrap();

        assert_eq!(ledger.keys(GROUP).unwrap(), vec![chunk_id_for("a.pdf", 0)]);
    }

    #[test]
    fn test_file_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.sql");

        {
            let ledger = RecordLedger::new(&path).unwrap();
            seed(&ledger, GROUP, &[candidate("a.pdf", 0, "h0")]);
        }

        let reopened = RecordLedger::open(&path.to_string_lossy()).unwrap();
        assert_eq!(reopened.keys(GROUP).unwrap(), vec![chunk_id_for("a.pdf", 0)]);
    }
}
