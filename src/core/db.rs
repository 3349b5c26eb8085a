//! Database accessor.
//!
//! [`Database`] wraps one SQLite connection and exposes the small surface the
//! entity layer needs: `execute`, `query`, `query_1`, `nextval` and explicit
//! transaction control. It also owns the change-log buffer, which is flushed
//! into the audit log on `commit()` and discarded on `rollback()`.
//!
//! There is no retry logic here; driver errors propagate unchanged. Callers
//! own the transaction boundary: hold one transaction per populate/write_db
//! cycle and commit or roll back as a unit. A `Database` must not be shared
//! between threads; open one per worker.

use crate::core::audit::callbacks::CallbackRegistry;
use crate::core::changelog::ChangeLog;
use crate::core::config::CerebrumConfig;
use crate::core::constants::{self, ChangeTypeDef, EntityId};
use crate::core::error::CerebrumError;
use crate::core::schemas;
use rusqlite::{Connection, Params, Row, params};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn db_connect(db_path: &str, busy_timeout_secs: u64) -> Result<Connection, CerebrumError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))
        .map_err(CerebrumError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(CerebrumError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(CerebrumError::RusqliteError)?;
    Ok(conn)
}

/// Install every table and seed the change types. Idempotent.
pub fn initialize_schema(conn: &Connection) -> Result<(), CerebrumError> {
    for stmt in schemas::ALL_SCHEMAS {
        conn.execute(stmt, [])?;
    }
    constants::seed_change_types(conn)?;
    Ok(())
}

/// Shared, read-only settings every connection is opened with.
#[derive(Clone)]
pub struct DbSettings {
    pub config: Arc<CerebrumConfig>,
    pub callbacks: Arc<CallbackRegistry>,
}

impl DbSettings {
    pub fn new(config: CerebrumConfig, callbacks: CallbackRegistry) -> Self {
        Self {
            config: Arc::new(config),
            callbacks: Arc::new(callbacks),
        }
    }
}

impl Default for DbSettings {
    fn default() -> Self {
        Self::new(CerebrumConfig::default(), CallbackRegistry::with_defaults())
    }
}

pub struct Database {
    conn: Connection,
    settings: DbSettings,
    changelog: RefCell<ChangeLog>,
    in_transaction: Cell<bool>,
}

impl Database {
    pub fn open(path: &Path, settings: &DbSettings) -> Result<Self, CerebrumError> {
        let conn = db_connect(
            &path.to_string_lossy(),
            settings.config.database.busy_timeout_secs,
        )?;
        Self::from_connection(conn, settings)
    }

    pub fn open_in_memory(settings: &DbSettings) -> Result<Self, CerebrumError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        Self::from_connection(conn, settings)
    }

    fn from_connection(conn: Connection, settings: &DbSettings) -> Result<Self, CerebrumError> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            settings: settings.clone(),
            changelog: RefCell::new(ChangeLog::new()),
            in_transaction: Cell::new(false),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &CerebrumConfig {
        &self.settings.config
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.settings.callbacks
    }

    pub fn settings(&self) -> &DbSettings {
        &self.settings
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, CerebrumError> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run `sql` and map every row. No rows is an empty vector, not an error.
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>, CerebrumError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    }

    /// Run `sql` expecting exactly one row.
    pub fn query_1<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T, CerebrumError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut rows = self.query(sql, params, f)?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(CerebrumError::NotFound(describe(sql))),
            n => Err(CerebrumError::TooManyRows(format!(
                "{} rows from {}",
                n,
                describe(sql)
            ))),
        }
    }

    pub fn nextval(&self, seq_name: &str) -> Result<i64, CerebrumError> {
        self.conn.execute(
            "INSERT INTO sequences(name, value) VALUES(?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            params![seq_name],
        )?;
        Ok(self.conn.query_row(
            "SELECT value FROM sequences WHERE name = ?1",
            params![seq_name],
            |row| row.get(0),
        )?)
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    pub fn begin(&self) -> Result<(), CerebrumError> {
        if self.in_transaction.get() {
            return Err(CerebrumError::ProgrammingError(
                "begin() called inside an open transaction".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.in_transaction.set(true);
        Ok(())
    }

    /// Flush the change log into the audit log, then commit.
    pub fn commit(&self) -> Result<(), CerebrumError> {
        self.write_log()?;
        if self.in_transaction.get() {
            self.conn.execute_batch("COMMIT;")?;
            self.in_transaction.set(false);
            tracing::debug!("committed transaction");
        }
        Ok(())
    }

    /// Discard the change log and roll back.
    pub fn rollback(&self) -> Result<(), CerebrumError> {
        self.clear_log();
        if self.in_transaction.get() {
            self.conn.execute_batch("ROLLBACK;")?;
            self.in_transaction.set(false);
            tracing::debug!("rolled back transaction");
        }
        Ok(())
    }

    /// Default operator and program for changes logged on this connection.
    pub fn cl_init(&self, change_by: Option<EntityId>, change_program: Option<&str>) {
        self.changelog
            .borrow_mut()
            .set_defaults(change_by, change_program.map(str::to_string));
    }

    /// Stage a change made by this connection's default operator/program.
    pub fn log_change(
        &self,
        subject: EntityId,
        change_type: &ChangeTypeDef,
        destination: Option<EntityId>,
        change_params: Value,
    ) -> Result<(), CerebrumError> {
        self.log_change_by(subject, change_type, destination, change_params, None, None)
    }

    pub fn log_change_by(
        &self,
        subject: EntityId,
        change_type: &ChangeTypeDef,
        destination: Option<EntityId>,
        change_params: Value,
        change_by: Option<EntityId>,
        change_program: Option<&str>,
    ) -> Result<(), CerebrumError> {
        let change_type_id = constants::Constants::new(self).change_type(change_type)?.id;
        let mut changelog = self.changelog.borrow_mut();
        changelog.log_change(
            self,
            subject,
            change_type_id,
            destination,
            change_params,
            change_by,
            change_program,
        )
    }

    pub fn write_log(&self) -> Result<usize, CerebrumError> {
        let pending = self.changelog.borrow_mut().take();
        match ChangeLog::write_events(self, pending) {
            Ok(written) => Ok(written),
            Err((unwritten, err)) => {
                self.changelog.borrow_mut().restore(unwritten);
                Err(err)
            }
        }
    }

    pub fn clear_log(&self) {
        self.changelog.borrow_mut().clear_log();
    }

    pub fn pending_changes(&self) -> Vec<crate::core::changelog::ChangeEvent> {
        self.changelog.borrow().events().to_vec()
    }
}

fn describe(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
