//! Storage for audit records.

use crate::core::audit::record::{AuditMetadata, AuditRecord, DbAuditRecord};
use crate::core::constants::{ChangeType, EntityId};
use crate::core::db::Database;
use crate::core::error::CerebrumError;
use crate::core::schemas;
use crate::core::time;
use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;

const SELECT_RECORDS: &str = "
    SELECT a.record_id, a.timestamp, a.change_type, ct.category, ct.type,
           a.operator, a.entity, a.target, a.metadata, a.params
    FROM audit_log a
    JOIN change_type_code ct ON ct.change_type_id = a.change_type";

/// Filters for [`AuditLogAccessor::search`]. All optional and AND-combined;
/// a list matches any of its values. Range bounds are exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditSearch {
    pub change_types: Vec<i64>,
    pub operators: Vec<EntityId>,
    pub entities: Vec<EntityId>,
    pub targets: Vec<EntityId>,
    pub record_ids: Vec<i64>,
    pub after_id: Option<i64>,
    pub before_id: Option<i64>,
    pub after_timestamp: Option<DateTime<Utc>>,
    pub before_timestamp: Option<DateTime<Utc>>,
}

impl AuditSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn change_type(mut self, change_type: &ChangeType) -> Self {
        self.change_types.push(change_type.id);
        self
    }

    pub fn operator(mut self, operator: EntityId) -> Self {
        self.operators.push(operator);
        self
    }

    pub fn entity(mut self, entity: EntityId) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn target(mut self, target: EntityId) -> Self {
        self.targets.push(target);
        self
    }

    pub fn record_id(mut self, record_id: i64) -> Self {
        self.record_ids.push(record_id);
        self
    }

    pub fn after_id(mut self, record_id: i64) -> Self {
        self.after_id = Some(record_id);
        self
    }

    pub fn before_id(mut self, record_id: i64) -> Self {
        self.before_id = Some(record_id);
        self
    }

    pub fn after_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.after_timestamp = Some(ts);
        self
    }

    pub fn before_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.before_timestamp = Some(ts);
        self
    }

    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut binds: Vec<SqlValue> = Vec::new();
        let mut clauses = Vec::new();

        let lists: [(&str, Vec<i64>); 5] = [
            ("a.change_type", self.change_types.clone()),
            ("a.operator", self.operators.iter().map(|e| e.0).collect()),
            ("a.entity", self.entities.iter().map(|e| e.0).collect()),
            ("a.target", self.targets.iter().map(|e| e.0).collect()),
            ("a.record_id", self.record_ids.clone()),
        ];
        for (column, values) in lists {
            if values.is_empty() {
                continue;
            }
            let placeholders: Vec<String> = values
                .into_iter()
                .map(|v| {
                    binds.push(SqlValue::Integer(v));
                    format!("?{}", binds.len())
                })
                .collect();
            clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
        }

        let bounds = [
            ("a.record_id >", self.after_id.map(SqlValue::Integer)),
            ("a.record_id <", self.before_id.map(SqlValue::Integer)),
            (
                "a.timestamp >",
                self.after_timestamp.map(|ts| SqlValue::Text(time::to_db(&ts))),
            ),
            (
                "a.timestamp <",
                self.before_timestamp.map(|ts| SqlValue::Text(time::to_db(&ts))),
            ),
        ];
        for (op, value) in bounds {
            if let Some(value) = value {
                binds.push(value);
                clauses.push(format!("{} ?{}", op, binds.len()));
            }
        }

        let mut sql = SELECT_RECORDS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY a.record_id");
        (sql, binds)
    }
}

struct RawRecord {
    record_id: i64,
    timestamp: String,
    change_type: ChangeType,
    operator: EntityId,
    entity: EntityId,
    target: Option<EntityId>,
    metadata: String,
    params: String,
}

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        record_id: row.get(0)?,
        timestamp: row.get(1)?,
        change_type: ChangeType {
            id: row.get(2)?,
            category: row.get(3)?,
            type_: row.get(4)?,
        },
        operator: row.get(5)?,
        entity: row.get(6)?,
        target: row.get(7)?,
        metadata: row.get(8)?,
        params: row.get(9)?,
    })
}

impl RawRecord {
    fn hydrate(self) -> Result<DbAuditRecord, CerebrumError> {
        let metadata: AuditMetadata = serde_json::from_str(&self.metadata)?;
        Ok(DbAuditRecord {
            record_id: self.record_id,
            timestamp: time::from_db(&self.timestamp)?,
            record: AuditRecord {
                change_type: self.change_type,
                operator: self.operator,
                entity: self.entity,
                target: self.target,
                metadata,
                params: serde_json::from_str(&self.params)?,
            },
        })
    }
}

pub struct AuditLogAccessor<'db> {
    db: &'db Database,
}

impl<'db> AuditLogAccessor<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Store `record` under a fresh id; the database assigns the timestamp.
    pub fn append(&self, record: &AuditRecord) -> Result<DbAuditRecord, CerebrumError> {
        let record_id = self.db.nextval(schemas::AUDIT_LOG_SEQ)?;
        self.db.execute(
            "INSERT INTO audit_log
               (record_id, change_type, operator, entity, target, metadata, params)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record_id,
                record.change_type.id,
                record.operator,
                record.entity,
                record.target,
                serde_json::to_string(&record.metadata)?,
                serde_json::to_string(&record.params)?
            ],
        )?;
        self.get_by_id(record_id)
    }

    /// Store a record that already has its id and timestamp.
    pub fn append_existing(&self, stored: &DbAuditRecord) -> Result<(), CerebrumError> {
        let record = &stored.record;
        self.db.execute(
            "INSERT INTO audit_log
               (record_id, timestamp, change_type, operator, entity, target, metadata, params)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stored.record_id,
                time::to_db(&stored.timestamp),
                record.change_type.id,
                record.operator,
                record.entity,
                record.target,
                serde_json::to_string(&record.metadata)?,
                serde_json::to_string(&record.params)?
            ],
        )?;
        // Keep later fresh ids clear of the imported one.
        self.db.execute(
            "INSERT INTO sequences(name, value) VALUES(?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = MAX(value, excluded.value)",
            params![schemas::AUDIT_LOG_SEQ, stored.record_id],
        )?;
        Ok(())
    }

    pub fn get_by_id(&self, record_id: i64) -> Result<DbAuditRecord, CerebrumError> {
        let sql = format!("{} WHERE a.record_id = ?1", SELECT_RECORDS);
        let rows = self.db.query(&sql, params![record_id], raw_from_row)?;
        match rows.into_iter().next() {
            Some(raw) => raw.hydrate(),
            None => Err(CerebrumError::NotFound(format!("audit record {}", record_id))),
        }
    }

    pub fn search(&self, search: &AuditSearch) -> Result<Vec<DbAuditRecord>, CerebrumError> {
        let mut records = Vec::new();
        self.for_each_record(search, |record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }

    /// Stream matching records in id order without collecting them.
    pub fn for_each_record<F>(&self, search: &AuditSearch, mut f: F) -> Result<usize, CerebrumError>
    where
        F: FnMut(DbAuditRecord) -> Result<(), CerebrumError>,
    {
        let (sql, binds) = search.to_sql();
        let mut stmt = self.db.connection().prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(binds))?;
        let mut seen = 0;
        while let Some(row) = rows.next()? {
            f(raw_from_row(row)?.hydrate()?)?;
            seen += 1;
        }
        Ok(seen)
    }
}
