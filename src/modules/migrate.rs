//! Replay legacy `change_log` rows into the audit log.
//!
//! Each row becomes one audit record that keeps the row's `change_id` as its
//! `record_id` and its `tstamp` as its timestamp. Rows are fanned out over a
//! [`WorkerPool`]; every worker owns its own connection and a cached record
//! builder, and commits (or, in dry-run mode, rolls back) each row on its own.

use crate::core::audit::accessor::AuditLogAccessor;
use crate::core::audit::builder::AuditRecordBuilder;
use crate::core::audit::lookup::{CachedLookup, DbLookup, EntityLookup, LookupStats};
use crate::core::audit::record::DbAuditRecord;
use crate::core::changelog;
use crate::core::constants::EntityId;
use crate::core::db::{Database, DbSettings};
use crate::core::error::CerebrumError;
use crate::core::pool::{PoolReport, PoolSettings, TaskProcessor, WorkerPool};
use crate::core::schemas;
use crate::core::time;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogRow {
    pub change_id: i64,
    pub tstamp: String,
    pub subject_entity: EntityId,
    pub change_type_id: i64,
    pub dest_entity: Option<EntityId>,
    pub change_params: Option<String>,
    pub change_by: Option<EntityId>,
    pub change_program: Option<String>,
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeLogRow> {
    Ok(ChangeLogRow {
        change_id: row.get(0)?,
        tstamp: row.get(1)?,
        subject_entity: row.get(2)?,
        change_type_id: row.get(3)?,
        dest_entity: row.get(4)?,
        change_params: row.get(5)?,
        change_by: row.get(6)?,
        change_program: row.get(7)?,
    })
}

/// Parse `N` or `N-M` into an inclusive id range.
pub fn parse_change_id_range(raw: &str) -> Result<(i64, i64), CerebrumError> {
    let bad = |what: &str| CerebrumError::ValidationError(format!("bad change_id range '{}': {}", raw, what));
    let (start, end) = match raw.trim().split_once('-') {
        Some((start, end)) => (start, end),
        None => (raw.trim(), raw.trim()),
    };
    let start: i64 = start.trim().parse().map_err(|_| bad("start is not an integer"))?;
    let end: i64 = end.trim().parse().map_err(|_| bad("end is not an integer"))?;
    if start > end {
        return Err(bad("start is after end"));
    }
    Ok((start, end))
}

/// Stream legacy rows with `start <= change_id <= end` in id order.
pub fn for_each_change_log<F>(db: &Database, start: i64, end: i64, mut f: F) -> Result<usize, CerebrumError>
where
    F: FnMut(ChangeLogRow) -> Result<(), CerebrumError>,
{
    let mut stmt = db.connection().prepare(
        "SELECT change_id, tstamp, subject_entity, change_type_id, dest_entity,
                change_params, change_by, change_program
         FROM change_log
         WHERE change_id >= ?1 AND change_id <= ?2
         ORDER BY change_id",
    )?;
    let mut rows = stmt.query(params![start, end])?;
    let mut seen = 0;
    while let Some(row) = rows.next()? {
        f(row_from_sql(row)?)?;
        seen += 1;
    }
    Ok(seen)
}

pub fn fetch_change_log(db: &Database, start: i64, end: i64) -> Result<Vec<ChangeLogRow>, CerebrumError> {
    let mut rows = Vec::new();
    for_each_change_log(db, start, end, |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

/// Write a row into the legacy table. A `change_id` of 0 draws a fresh one.
pub fn insert_change_log(db: &Database, row: &ChangeLogRow) -> Result<i64, CerebrumError> {
    let change_id = match row.change_id {
        0 => db.nextval(schemas::CHANGE_LOG_SEQ)?,
        id => id,
    };
    db.execute(
        "INSERT INTO change_log
           (change_id, tstamp, subject_entity, change_type_id, dest_entity,
            change_params, change_by, change_program)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            change_id,
            row.tstamp,
            row.subject_entity,
            row.change_type_id,
            row.dest_entity,
            row.change_params,
            row.change_by,
            row.change_program
        ],
    )?;
    Ok(change_id)
}

pub struct ChangeLogMigrator {
    db: Database,
    lookup: CachedLookup<DbLookup>,
    initial_account: Option<EntityId>,
    commit: bool,
}

impl ChangeLogMigrator {
    pub fn new(db: Database, commit: bool) -> Self {
        let audit = &db.config().audit;
        let lookup = CachedLookup::new(DbLookup, audit.entity_type_cache_size, audit.entity_name_cache_size);
        Self {
            db,
            lookup,
            initial_account: None,
            commit,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cache_stats(&self) -> LookupStats {
        self.lookup.stats().unwrap_or_default()
    }

    fn initial_account(&mut self) -> Result<EntityId, CerebrumError> {
        if let Some(id) = self.initial_account {
            return Ok(id);
        }
        let id = changelog::initial_account(&self.db)?;
        self.initial_account = Some(id);
        Ok(id)
    }

    pub fn row_to_record(&mut self, row: &ChangeLogRow) -> Result<DbAuditRecord, CerebrumError> {
        let timestamp = time::from_db(&row.tstamp)?;
        let change_by = match row.change_by {
            Some(by) => by,
            None => self.initial_account()?,
        };
        let params = match row.change_params.as_deref().map(str::trim) {
            None | Some("") => Value::Object(Default::default()),
            Some(raw) => serde_json::from_str(raw).inspect_err(|_| {
                tracing::warn!(change_id = row.change_id, change_params = raw, "unable to deserialize change_params");
            })?,
        };

        let mut builder = AuditRecordBuilder::with_lookup(&self.db, &mut self.lookup);
        let record = builder.build(
            row.subject_entity,
            row.change_type_id,
            row.dest_entity,
            params,
            change_by,
            row.change_program.as_deref(),
        )?;
        Ok(DbAuditRecord::new(row.change_id, timestamp, record))
    }

    /// Convert and store one row in its own transaction.
    pub fn process_row(&mut self, row: &ChangeLogRow) -> Result<(), CerebrumError> {
        let record = self.row_to_record(row)?;
        tracing::debug!(record_id = record.record_id, metadata = ?record.record.metadata, "got record");

        self.db.begin()?;
        let stored = AuditLogAccessor::new(&self.db).append_existing(&record);
        match stored {
            Ok(()) if self.commit => self.db.commit(),
            Ok(()) => self.db.rollback(),
            Err(err) => {
                if let Err(rollback_err) = self.db.rollback() {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl TaskProcessor<ChangeLogRow> for ChangeLogMigrator {
    fn process(&mut self, row: &ChangeLogRow) -> Result<(), CerebrumError> {
        self.process_row(row)
    }

    fn label(&self, row: &ChangeLogRow) -> String {
        format!("change_id={}", row.change_id)
    }

    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self.cache_stats()).ok()
    }

    fn finish(&mut self) -> Result<(), CerebrumError> {
        if self.db.in_transaction() {
            self.db.rollback()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Inclusive change_id ranges.
    pub ranges: Vec<(i64, i64)>,
    pub commit: bool,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub queued: usize,
    /// Rows that could not be queued.
    pub dropped: usize,
    pub pool: PoolReport,
}

/// Migrate every legacy row in `options.ranges` from the database at `db_path`.
pub fn run_migration(
    db_path: &Path,
    settings: &DbSettings,
    options: &MigrationOptions,
) -> Result<MigrationReport, CerebrumError> {
    let reader = Database::open(db_path, settings)?;

    let path: PathBuf = db_path.to_path_buf();
    let worker_settings = settings.clone();
    let commit = options.commit;
    let mut pool = WorkerPool::start(options.pool.clone(), move |index| {
        tracing::debug!(worker = index, path = %path.display(), "opening worker connection");
        let db = Database::open(&path, &worker_settings)?;
        Ok(ChangeLogMigrator::new(db, commit))
    })?;

    let mut queued = 0;
    let mut dropped = 0;
    for &(start, end) in &options.ranges {
        tracing::debug!(start, end, "queueing change_log range");
        let added = for_each_change_log(&reader, start, end, |row| {
            let change_id = row.change_id;
            match pool.submit(row) {
                Ok(()) => queued += 1,
                Err(err) => {
                    tracing::error!(change_id, error = %err, "unable to add task");
                    dropped += 1;
                }
            }
            Ok(())
        })?;
        tracing::debug!(start, end, added, "added rows");
    }
    tracing::info!(queued, commit, "queueing done");

    let report = pool.wait_completion();
    tracing::info!(
        queued,
        ok = report.ok,
        failed = report.failed,
        errors = ?report.errors_by_kind,
        "processing done"
    );
    Ok(MigrationReport {
        queued,
        dropped,
        pool: report,
    })
}
