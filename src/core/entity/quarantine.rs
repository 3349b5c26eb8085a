//! Quarantines: suspensions attached to an entity, one per quarantine type.
//!
//! A quarantine is active from `start_date` until `end_date` (open-ended if
//! unset). `disable_until` lifts it temporarily without removing it; once
//! that instant has passed the quarantine is active again.

use crate::core::constants::{EntityId, EntityType, QuarantineType, cl};
use crate::core::db::Database;
use crate::core::entity::{Capability, Entity, WriteContext};
use crate::core::error::CerebrumError;
use crate::core::reconcile::{ReconcileTarget, reconcile};
use crate::core::time;
use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quarantine {
    pub quarantine_type: QuarantineType,
    pub creator_id: EntityId,
    pub comment: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub disable_until: Option<DateTime<Utc>>,
}

impl Quarantine {
    pub fn new(quarantine_type: QuarantineType, creator_id: EntityId, start_date: DateTime<Utc>) -> Self {
        Self {
            quarantine_type,
            creator_id,
            comment: None,
            start_date: time::stored_precision(start_date),
            end_date: None,
            disable_until: None,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn with_end_date(mut self, end_date: Option<DateTime<Utc>>) -> Self {
        self.end_date = end_date.map(time::stored_precision);
        self
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start_date <= at
            && self.end_date.is_none_or(|end| end > at)
            && self.disable_until.is_none_or(|until| until <= at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineRow {
    pub entity_id: EntityId,
    pub quarantine: Quarantine,
}

// Must agree with `Quarantine::is_active_at`.
const ACTIVE_AT: &str = "q.start_date <= ?{n}
    AND (q.end_date IS NULL OR q.end_date > ?{n})
    AND (q.disable_until IS NULL OR q.disable_until <= ?{n})";

fn active_clause(n: usize) -> String {
    ACTIVE_AT.replace("{n}", &n.to_string())
}

fn select_quarantines(
    db: &Database,
    mut clauses: Vec<String>,
    mut binds: Vec<SqlValue>,
    active_at: Option<DateTime<Utc>>,
    join_entity: bool,
) -> Result<Vec<QuarantineRow>, CerebrumError> {
    if let Some(at) = active_at {
        binds.push(SqlValue::Text(time::to_db(&at)));
        clauses.push(active_clause(binds.len()));
    }
    let mut sql = String::from(
        "SELECT q.entity_id, q.quarantine_type, q.creator_id, q.comment,
                q.start_date, q.end_date, q.disable_until
         FROM entity_quarantine q",
    );
    if join_entity {
        sql.push_str(" JOIN entity_info e ON e.entity_id = q.entity_id");
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY q.entity_id, q.quarantine_type");

    let raw = db.query(&sql, rusqlite::params_from_iter(binds), |row| {
        Ok((
            row.get::<_, EntityId>(0)?,
            row.get::<_, QuarantineType>(1)?,
            row.get::<_, EntityId>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;
    raw.into_iter()
        .map(|(entity_id, quarantine_type, creator_id, comment, start, end, until)| {
            Ok(QuarantineRow {
                entity_id,
                quarantine: Quarantine {
                    quarantine_type,
                    creator_id,
                    comment,
                    start_date: time::from_db(&start)?,
                    end_date: time::opt_from_db(end)?,
                    disable_until: time::opt_from_db(until)?,
                },
            })
        })
        .collect()
}

fn quarantines_for(
    db: &Database,
    entity_id: EntityId,
    quarantine_type: Option<QuarantineType>,
    active_at: Option<DateTime<Utc>>,
) -> Result<Vec<QuarantineRow>, CerebrumError> {
    let mut binds = vec![SqlValue::Integer(entity_id.0)];
    let mut clauses = vec!["q.entity_id = ?1".to_string()];
    if let Some(quarantine_type) = quarantine_type {
        binds.push(SqlValue::Integer(quarantine_type.0));
        clauses.push(format!("q.quarantine_type = ?{}", binds.len()));
    }
    select_quarantines(db, clauses, binds, active_at, false)
}

/// Quarantines on entities of the given types (all types when empty).
pub fn list_entity_quarantines(
    db: &Database,
    entity_types: &[EntityType],
    only_active: bool,
) -> Result<Vec<QuarantineRow>, CerebrumError> {
    let mut binds = Vec::new();
    let mut clauses = Vec::new();
    if !entity_types.is_empty() {
        let placeholders: Vec<String> = entity_types
            .iter()
            .map(|t| {
                binds.push(SqlValue::Integer(t.0));
                format!("?{}", binds.len())
            })
            .collect();
        clauses.push(format!("e.entity_type IN ({})", placeholders.join(", ")));
    }
    let active_at = only_active.then(time::now);
    select_quarantines(db, clauses, binds, active_at, !entity_types.is_empty())
}

fn quarantine_params(q: &Quarantine) -> serde_json::Value {
    serde_json::json!({
        "q_type": q.quarantine_type.0,
        "start": time::to_db(&q.start_date),
        "end": q.end_date.as_ref().map(time::to_db),
    })
}

fn insert_quarantine(db: &Database, entity_id: EntityId, q: &Quarantine) -> Result<(), CerebrumError> {
    db.execute(
        "INSERT INTO entity_quarantine
           (entity_id, quarantine_type, creator_id, comment, start_date, end_date, disable_until)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entity_id,
            q.quarantine_type,
            q.creator_id,
            q.comment,
            time::to_db(&q.start_date),
            q.end_date.as_ref().map(time::to_db),
            q.disable_until.as_ref().map(time::to_db)
        ],
    )?;
    db.log_change(entity_id, &cl::QUARANTINE_ADD, None, quarantine_params(q))
}

fn delete_quarantine(
    db: &Database,
    entity_id: EntityId,
    quarantine_type: QuarantineType,
) -> Result<(), CerebrumError> {
    db.execute(
        "DELETE FROM entity_quarantine WHERE entity_id = ?1 AND quarantine_type = ?2",
        params![entity_id, quarantine_type],
    )?;
    db.log_change(
        entity_id,
        &cl::QUARANTINE_DEL,
        None,
        serde_json::json!({ "q_type": quarantine_type.0 }),
    )
}

/// Stages the complete set of quarantines for the next `write_db()`.
#[derive(Debug, Default)]
pub struct QuarantineCapability {
    staged: Option<BTreeMap<QuarantineType, Quarantine>>,
}

impl QuarantineCapability {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Capability for QuarantineCapability {
    fn name(&self) -> &'static str {
        "quarantine"
    }

    fn is_dirty(&self) -> bool {
        self.staged.is_some()
    }

    fn on_write(&mut self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError> {
        let Some(staged) = self.staged.as_ref() else {
            return Ok(false);
        };
        let current = quarantines_for(ctx.db, ctx.entity_id, None, None)?
            .into_iter()
            .map(|row| row.quarantine)
            .collect();
        let mut target = QuarantineTarget {
            db: ctx.db,
            entity_id: ctx.entity_id,
        };
        let summary = reconcile(&mut target, current, staged)?;
        Ok(summary.changed())
    }

    fn on_clear(&mut self) {
        self.staged = None;
    }

    fn on_delete(&mut self, ctx: &WriteContext<'_>) -> Result<(), CerebrumError> {
        for row in quarantines_for(ctx.db, ctx.entity_id, None, None)? {
            delete_quarantine(ctx.db, ctx.entity_id, row.quarantine.quarantine_type)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct QuarantineTarget<'a> {
    db: &'a Database,
    entity_id: EntityId,
}

impl ReconcileTarget for QuarantineTarget<'_> {
    type Key = QuarantineType;
    type Value = Quarantine;

    fn key_of(&self, value: &Quarantine) -> QuarantineType {
        value.quarantine_type
    }

    /// `disable_until` is managed separately and does not count. Instants
    /// compare at stored precision.
    fn equals(&self, persisted: &Quarantine, desired: &Quarantine) -> bool {
        let stored = |ts: Option<DateTime<Utc>>| ts.map(time::stored_precision);
        persisted.creator_id == desired.creator_id
            && persisted.comment == desired.comment
            && stored(Some(persisted.start_date)) == stored(Some(desired.start_date))
            && stored(persisted.end_date) == stored(desired.end_date)
    }

    fn insert(&mut self, _key: &QuarantineType, value: &Quarantine) -> Result<(), CerebrumError> {
        insert_quarantine(self.db, self.entity_id, value)
    }

    fn update(
        &mut self,
        key: &QuarantineType,
        _persisted: &Quarantine,
        desired: &Quarantine,
    ) -> Result<(), CerebrumError> {
        self.db.execute(
            "UPDATE entity_quarantine
             SET creator_id = ?3, comment = ?4, start_date = ?5, end_date = ?6
             WHERE entity_id = ?1 AND quarantine_type = ?2",
            params![
                self.entity_id,
                key,
                desired.creator_id,
                desired.comment,
                time::to_db(&desired.start_date),
                desired.end_date.as_ref().map(time::to_db)
            ],
        )?;
        self.db
            .log_change(self.entity_id, &cl::QUARANTINE_MOD, None, quarantine_params(desired))
    }

    fn delete(&mut self, key: &QuarantineType, _persisted: &Quarantine) -> Result<(), CerebrumError> {
        delete_quarantine(self.db, self.entity_id, *key)
    }
}

impl<'db> Entity<'db> {
    /// Stage `quarantine`. The staged set replaces all quarantines on `write_db()`.
    pub fn populate_quarantine(&mut self, quarantine: Quarantine) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<QuarantineCapability>("quarantine")?;
        capability
            .staged
            .get_or_insert_with(BTreeMap::new)
            .insert(quarantine.quarantine_type, quarantine);
        Ok(())
    }

    pub fn add_entity_quarantine(&self, quarantine: &Quarantine) -> Result<(), CerebrumError> {
        insert_quarantine(self.db(), self.require_id()?, quarantine)
    }

    pub fn get_entity_quarantine(
        &self,
        quarantine_type: Option<QuarantineType>,
        only_active: bool,
    ) -> Result<Vec<Quarantine>, CerebrumError> {
        let active_at = only_active.then(time::now);
        Ok(quarantines_for(self.db(), self.require_id()?, quarantine_type, active_at)?
            .into_iter()
            .map(|row| row.quarantine)
            .collect())
    }

    pub fn active_quarantines_at(&self, at: DateTime<Utc>) -> Result<Vec<Quarantine>, CerebrumError> {
        Ok(quarantines_for(self.db(), self.require_id()?, None, Some(at))?
            .into_iter()
            .map(|row| row.quarantine)
            .collect())
    }

    pub fn is_quarantined(&self) -> Result<bool, CerebrumError> {
        self.is_quarantined_at(time::now())
    }

    pub fn is_quarantined_at(&self, at: DateTime<Utc>) -> Result<bool, CerebrumError> {
        Ok(!self.active_quarantines_at(at)?.is_empty())
    }

    /// Lift the quarantine until `until`, or reactivate it when `None`.
    pub fn disable_entity_quarantine(
        &self,
        quarantine_type: QuarantineType,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), CerebrumError> {
        let entity_id = self.require_id()?;
        let updated = self.db().execute(
            "UPDATE entity_quarantine SET disable_until = ?3
             WHERE entity_id = ?1 AND quarantine_type = ?2",
            params![entity_id, quarantine_type, until.as_ref().map(time::to_db)],
        )?;
        if updated == 0 {
            return Err(CerebrumError::NotFound(format!(
                "entity {} has no quarantine of type {}",
                entity_id, quarantine_type.0
            )));
        }
        self.db().log_change(
            entity_id,
            &cl::QUARANTINE_MOD,
            None,
            serde_json::json!({
                "q_type": quarantine_type.0,
                "disable_until": until.as_ref().map(time::to_db),
            }),
        )
    }

    pub fn delete_entity_quarantine(&self, quarantine_type: QuarantineType) -> Result<(), CerebrumError> {
        delete_quarantine(self.db(), self.require_id()?, quarantine_type)
    }
}
