//! Identifiers other systems know an entity by, per source system.
//!
//! A write cycle first declares which id types one source system is
//! authoritative for (`affect_external_id`), then stages values for them.
//! On `write_db()` only the affected types are reconciled: a declared type
//! with no staged value is removed, other types are left alone.

use crate::core::constants::{EntityId, EntityType, ExternalIdType, SourceSystem, cl};
use crate::core::db::Database;
use crate::core::entity::{Capability, Entity, Staged, WriteContext, stage_fact};
use crate::core::error::CerebrumError;
use crate::core::reconcile::{ReconcileTarget, reconcile};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalIdRow {
    pub entity_id: EntityId,
    pub id_type: ExternalIdType,
    pub source_system: SourceSystem,
    pub external_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExternalIdFilter {
    pub entity_type: Option<EntityType>,
    pub source_system: Option<SourceSystem>,
    pub id_type: Option<ExternalIdType>,
    pub external_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExternalIdCapability {
    staged: Option<Staged<ExternalIdType, String>>,
    affected: BTreeSet<ExternalIdType>,
}

impl ExternalIdCapability {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Capability for ExternalIdCapability {
    fn name(&self) -> &'static str {
        "external_id"
    }

    fn is_dirty(&self) -> bool {
        self.staged.is_some()
    }

    fn on_write(&mut self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError> {
        let Some(staged) = self.staged.as_ref() else {
            return Ok(false);
        };
        let current: Vec<(ExternalIdType, String)> = external_ids_for(ctx.db, ctx.entity_id, Some(staged.source_system), None)?
            .into_iter()
            .filter(|row| self.affected.contains(&row.id_type))
            .map(|row| (row.id_type, row.external_id))
            .collect();
        let desired: BTreeMap<ExternalIdType, (ExternalIdType, String)> = staged
            .facts
            .iter()
            .map(|(id_type, value)| (*id_type, (*id_type, value.clone())))
            .collect();
        let mut target = ExternalIdTarget {
            db: ctx.db,
            entity_id: ctx.entity_id,
            entity_type: ctx.entity_type,
            source_system: staged.source_system,
        };
        Ok(reconcile(&mut target, current, &desired)?.changed())
    }

    fn on_clear(&mut self) {
        self.staged = None;
        self.affected.clear();
    }

    fn on_delete(&mut self, ctx: &WriteContext<'_>) -> Result<(), CerebrumError> {
        for row in external_ids_for(ctx.db, ctx.entity_id, None, None)? {
            delete_external_id(ctx.db, ctx.entity_id, row.source_system, row.id_type)?;
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

struct ExternalIdTarget<'a> {
    db: &'a Database,
    entity_id: EntityId,
    entity_type: EntityType,
    source_system: SourceSystem,
}

impl ReconcileTarget for ExternalIdTarget<'_> {
    type Key = ExternalIdType;
    type Value = (ExternalIdType, String);

    fn key_of(&self, value: &Self::Value) -> ExternalIdType {
        value.0
    }

    fn equals(&self, persisted: &Self::Value, desired: &Self::Value) -> bool {
        persisted.1 == desired.1
    }

    fn insert(&mut self, id_type: &ExternalIdType, value: &Self::Value) -> Result<(), CerebrumError> {
        self.db.execute(
            "INSERT INTO entity_external_id
               (entity_id, entity_type, id_type, source_system, external_id)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![self.entity_id, self.entity_type, id_type, self.source_system, value.1],
        )?;
        self.db.log_change(
            self.entity_id,
            &cl::ENTITY_EXT_ID_ADD,
            None,
            change_params(self.source_system, *id_type, Some(&value.1)),
        )
    }

    fn update(
        &mut self,
        id_type: &ExternalIdType,
        _persisted: &Self::Value,
        desired: &Self::Value,
    ) -> Result<(), CerebrumError> {
        self.db.execute(
            "UPDATE entity_external_id SET external_id = ?4
             WHERE entity_id = ?1 AND id_type = ?2 AND source_system = ?3",
            params![self.entity_id, id_type, self.source_system, desired.1],
        )?;
        self.db.log_change(
            self.entity_id,
            &cl::ENTITY_EXT_ID_MOD,
            None,
            change_params(self.source_system, *id_type, Some(&desired.1)),
        )
    }

    fn delete(&mut self, id_type: &ExternalIdType, _persisted: &Self::Value) -> Result<(), CerebrumError> {
        delete_external_id(self.db, self.entity_id, self.source_system, *id_type)
    }
}

fn change_params(source: SourceSystem, id_type: ExternalIdType, value: Option<&str>) -> serde_json::Value {
    match value {
        Some(value) => serde_json::json!({ "id_type": id_type.0, "src": source.0, "value": value }),
        None => serde_json::json!({ "id_type": id_type.0, "src": source.0 }),
    }
}

fn delete_external_id(
    db: &Database,
    entity_id: EntityId,
    source_system: SourceSystem,
    id_type: ExternalIdType,
) -> Result<(), CerebrumError> {
    db.execute(
        "DELETE FROM entity_external_id
         WHERE entity_id = ?1 AND id_type = ?2 AND source_system = ?3",
        params![entity_id, id_type, source_system],
    )?;
    db.log_change(
        entity_id,
        &cl::ENTITY_EXT_ID_DEL,
        None,
        change_params(source_system, id_type, None),
    )
}

fn external_ids_for(
    db: &Database,
    entity_id: EntityId,
    source_system: Option<SourceSystem>,
    id_type: Option<ExternalIdType>,
) -> Result<Vec<ExternalIdRow>, CerebrumError> {
    let mut binds = vec![SqlValue::Integer(entity_id.0)];
    let mut clauses = vec!["entity_id = ?1".to_string()];
    push_filters(&mut clauses, &mut binds, source_system, id_type, None);
    select_external_ids(db, &clauses, binds)
}

fn push_filters(
    clauses: &mut Vec<String>,
    binds: &mut Vec<SqlValue>,
    source_system: Option<SourceSystem>,
    id_type: Option<ExternalIdType>,
    external_id: Option<&str>,
) {
    if let Some(source_system) = source_system {
        binds.push(SqlValue::Integer(source_system.0));
        clauses.push(format!("source_system = ?{}", binds.len()));
    }
    if let Some(id_type) = id_type {
        binds.push(SqlValue::Integer(id_type.0));
        clauses.push(format!("id_type = ?{}", binds.len()));
    }
    if let Some(external_id) = external_id {
        binds.push(SqlValue::Text(external_id.to_string()));
        clauses.push(format!("external_id = ?{}", binds.len()));
    }
}

fn select_external_ids(
    db: &Database,
    clauses: &[String],
    binds: Vec<SqlValue>,
) -> Result<Vec<ExternalIdRow>, CerebrumError> {
    let mut sql = String::from(
        "SELECT entity_id, id_type, source_system, external_id FROM entity_external_id",
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY entity_id, id_type, source_system");
    db.query(&sql, rusqlite::params_from_iter(binds), |row| {
        Ok(ExternalIdRow {
            entity_id: row.get(0)?,
            id_type: row.get(1)?,
            source_system: row.get(2)?,
            external_id: row.get(3)?,
        })
    })
}

/// External ids matching every given filter.
pub fn list_external_ids(db: &Database, filter: &ExternalIdFilter) -> Result<Vec<ExternalIdRow>, CerebrumError> {
    let mut binds = Vec::new();
    let mut clauses = Vec::new();
    if let Some(entity_type) = filter.entity_type {
        binds.push(SqlValue::Integer(entity_type.0));
        clauses.push(format!("entity_type = ?{}", binds.len()));
    }
    push_filters(
        &mut clauses,
        &mut binds,
        filter.source_system,
        filter.id_type,
        filter.external_id.as_deref(),
    );
    select_external_ids(db, &clauses, binds)
}

impl<'db> Entity<'db> {
    /// Declare `source_system` authoritative for `id_types` in this write cycle.
    pub fn affect_external_id(
        &mut self,
        source_system: SourceSystem,
        id_types: &[ExternalIdType],
    ) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<ExternalIdCapability>("external id")?;
        stage_fact(&mut capability.staged, source_system, None)?;
        capability.affected.extend(id_types.iter().copied());
        Ok(())
    }

    /// Stage `external_id` for an id type declared through `affect_external_id`.
    pub fn populate_external_id(
        &mut self,
        source_system: SourceSystem,
        id_type: ExternalIdType,
        external_id: &str,
    ) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<ExternalIdCapability>("external id")?;
        if capability.staged.is_none() {
            return Err(CerebrumError::ProgrammingError(
                "populate_external_id() called before affect_external_id()".to_string(),
            ));
        }
        if !capability.affected.contains(&id_type) {
            return Err(CerebrumError::ProgrammingError(format!(
                "external id type {:?} is not affected in this cycle",
                id_type
            )));
        }
        stage_fact(
            &mut capability.staged,
            source_system,
            Some((id_type, external_id.to_string())),
        )
    }

    pub fn get_external_id(
        &self,
        source_system: Option<SourceSystem>,
        id_type: Option<ExternalIdType>,
    ) -> Result<Vec<ExternalIdRow>, CerebrumError> {
        external_ids_for(self.db(), self.require_id()?, source_system, id_type)
    }

    /// Associate with the `entity_type` entity holding `external_id`.
    ///
    /// NotFound if nobody holds it, TooManyRows if several entities do.
    pub fn find_by_external_id(
        &mut self,
        entity_type: EntityType,
        id_type: ExternalIdType,
        external_id: &str,
        source_system: Option<SourceSystem>,
    ) -> Result<(), CerebrumError> {
        let mut binds = vec![
            SqlValue::Integer(entity_type.0),
            SqlValue::Integer(id_type.0),
            SqlValue::Text(external_id.to_string()),
        ];
        let mut sql = String::from(
            "SELECT DISTINCT entity_id FROM entity_external_id
             WHERE entity_type = ?1 AND id_type = ?2 AND external_id = ?3",
        );
        if let Some(source_system) = source_system {
            binds.push(SqlValue::Integer(source_system.0));
            sql.push_str(" AND source_system = ?4");
        }
        let entity_id: EntityId =
            self.db()
                .query_1(&sql, rusqlite::params_from_iter(binds), |row| row.get(0))?;
        self.clear();
        self.find(entity_id)
    }
}
