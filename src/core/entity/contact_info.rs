//! Contact information (phone numbers, e-mail addresses, ...) per source system.

use crate::core::constants::{ContactType, EntityId, EntityType, SourceSystem, cl};
use crate::core::db::Database;
use crate::core::entity::{Capability, Entity, Staged, WriteContext, stage_fact};
use crate::core::error::CerebrumError;
use crate::core::reconcile::{ReconcileTarget, reconcile};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use std::any::Any;

pub const DEFAULT_CONTACT_PREF: i64 = 50;

/// One contact fact. `(contact_type, pref)` identifies it within a source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactInfo {
    pub contact_type: ContactType,
    pub pref: Option<i64>,
    pub value: String,
    pub description: Option<String>,
}

impl ContactInfo {
    pub fn new(contact_type: ContactType, value: impl ToString) -> Self {
        Self {
            contact_type,
            pref: Some(DEFAULT_CONTACT_PREF),
            // Compared against a text column, so always stored as a string.
            value: value.to_string(),
            description: None,
        }
    }

    pub fn with_pref(mut self, pref: Option<i64>) -> Self {
        self.pref = pref;
        self
    }

    pub fn with_description(mut self, description: Option<&str>) -> Self {
        self.description = description.map(str::to_string);
        self
    }

    pub fn key(&self) -> ContactKey {
        (self.contact_type, self.pref)
    }
}

pub type ContactKey = (ContactType, Option<i64>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactInfoRow {
    pub entity_id: EntityId,
    pub source_system: SourceSystem,
    pub info: ContactInfo,
}

/// Which preferences `delete_contact_info` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPref {
    All,
    Exactly(Option<i64>),
}

#[derive(Debug, Clone, Default)]
pub struct ContactInfoFilter {
    pub entity_id: Option<EntityId>,
    pub source_system: Option<SourceSystem>,
    pub contact_type: Option<ContactType>,
    pub entity_type: Option<EntityType>,
}

/// Stages contact info for one source system per write cycle.
#[derive(Debug, Default)]
pub struct ContactInfoCapability {
    staged: Option<Staged<ContactKey, ContactInfo>>,
}

impl ContactInfoCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staged(&self) -> Option<&Staged<ContactKey, ContactInfo>> {
        self.staged.as_ref()
    }
}

impl Capability for ContactInfoCapability {
    fn name(&self) -> &'static str {
        "contact_info"
    }

    fn is_dirty(&self) -> bool {
        self.staged.is_some()
    }

    fn on_write(&mut self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError> {
        let Some(staged) = self.staged.as_ref() else {
            return Ok(false);
        };
        sync_contact_info(ctx.db, ctx.entity_id, staged.source_system, &staged.facts)
    }

    fn on_clear(&mut self) {
        self.staged = None;
    }

    fn on_delete(&mut self, ctx: &WriteContext<'_>) -> Result<(), CerebrumError> {
        let keys: std::collections::BTreeSet<_> = contact_info_for(ctx.db, ctx.entity_id, None, None)?
            .into_iter()
            .map(|row| (row.source_system, row.info.contact_type, row.info.pref))
            .collect();
        for (source_system, contact_type, pref) in keys {
            delete_contact_info(
                ctx.db,
                ctx.entity_id,
                source_system,
                contact_type,
                ContactPref::Exactly(pref),
            )?;
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

/// Make `source_system`'s contact info for `entity_id` exactly `facts`.
pub fn sync_contact_info(
    db: &Database,
    entity_id: EntityId,
    source_system: SourceSystem,
    facts: &std::collections::BTreeMap<ContactKey, ContactInfo>,
) -> Result<bool, CerebrumError> {
    let current = contact_info_for(db, entity_id, Some(source_system), None)?
        .into_iter()
        .map(|row| row.info)
        .collect();
    let mut target = ContactInfoTarget {
        db,
        entity_id,
        source_system,
    };
    let summary = reconcile(&mut target, current, facts)?;
    tracing::debug!(
        entity_id = %entity_id,
        source_system = source_system.0,
        ?summary,
        "synced contact info"
    );
    Ok(summary.changed())
}

struct ContactInfoTarget<'a> {
    db: &'a Database,
    entity_id: EntityId,
    source_system: SourceSystem,
}

impl ReconcileTarget for ContactInfoTarget<'_> {
    type Key = ContactKey;
    type Value = ContactInfo;

    fn key_of(&self, value: &ContactInfo) -> ContactKey {
        value.key()
    }

    fn equals(&self, persisted: &ContactInfo, desired: &ContactInfo) -> bool {
        persisted.value == desired.value && persisted.description == desired.description
    }

    fn insert(&mut self, _key: &ContactKey, value: &ContactInfo) -> Result<(), CerebrumError> {
        add_contact_info(self.db, self.entity_id, self.source_system, value)
    }

    fn update(
        &mut self,
        key: &ContactKey,
        _persisted: &ContactInfo,
        desired: &ContactInfo,
    ) -> Result<(), CerebrumError> {
        self.db.execute(
            "UPDATE entity_contact_info SET contact_value = ?5, description = ?6
             WHERE entity_id = ?1 AND source_system = ?2 AND contact_type = ?3
               AND contact_pref IS ?4",
            params![
                self.entity_id,
                self.source_system,
                key.0,
                key.1,
                desired.value,
                desired.description
            ],
        )?;
        self.db.log_change(
            self.entity_id,
            &cl::ENTITY_CINFO_MOD,
            None,
            change_params(self.source_system, key.0, key.1),
        )
    }

    fn delete(&mut self, key: &ContactKey, _persisted: &ContactInfo) -> Result<(), CerebrumError> {
        delete_contact_info(
            self.db,
            self.entity_id,
            self.source_system,
            key.0,
            ContactPref::Exactly(key.1),
        )
    }
}

fn change_params(source: SourceSystem, contact_type: ContactType, pref: Option<i64>) -> serde_json::Value {
    serde_json::json!({ "src": source.0, "type": contact_type.0, "pref": pref })
}

pub fn add_contact_info(
    db: &Database,
    entity_id: EntityId,
    source_system: SourceSystem,
    info: &ContactInfo,
) -> Result<(), CerebrumError> {
    db.execute(
        "INSERT INTO entity_contact_info
           (entity_id, source_system, contact_type, contact_pref, contact_value, description)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entity_id,
            source_system,
            info.contact_type,
            info.pref,
            info.value,
            info.description
        ],
    )
    .map_err(|err| match err {
        CerebrumError::RusqliteError(e)
            if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) =>
        {
            CerebrumError::IntegrityError(format!("can't store contact info {:?}: {}", info.key(), e))
        }
        other => other,
    })?;
    db.log_change(
        entity_id,
        &cl::ENTITY_CINFO_ADD,
        None,
        change_params(source_system, info.contact_type, info.pref),
    )
}

pub fn delete_contact_info(
    db: &Database,
    entity_id: EntityId,
    source_system: SourceSystem,
    contact_type: ContactType,
    pref: ContactPref,
) -> Result<(), CerebrumError> {
    let (sql, logged_pref) = match pref {
        ContactPref::All => (
            "DELETE FROM entity_contact_info
             WHERE entity_id = ?1 AND source_system = ?2 AND contact_type = ?3",
            None,
        ),
        ContactPref::Exactly(p) => (
            "DELETE FROM entity_contact_info
             WHERE entity_id = ?1 AND source_system = ?2 AND contact_type = ?3
               AND contact_pref IS ?4",
            p,
        ),
    };
    match pref {
        ContactPref::All => db.execute(sql, params![entity_id, source_system, contact_type])?,
        ContactPref::Exactly(p) => {
            db.execute(sql, params![entity_id, source_system, contact_type, p])?
        }
    };
    db.log_change(
        entity_id,
        &cl::ENTITY_CINFO_DEL,
        None,
        change_params(source_system, contact_type, logged_pref),
    )
}

pub fn contact_info_for(
    db: &Database,
    entity_id: EntityId,
    source_system: Option<SourceSystem>,
    contact_type: Option<ContactType>,
) -> Result<Vec<ContactInfoRow>, CerebrumError> {
    list_contact_info(
        db,
        &ContactInfoFilter {
            entity_id: Some(entity_id),
            source_system,
            contact_type,
            entity_type: None,
        },
    )
}

/// Contact info matching every given filter, ordered by preference.
pub fn list_contact_info(
    db: &Database,
    filter: &ContactInfoFilter,
) -> Result<Vec<ContactInfoRow>, CerebrumError> {
    let mut sql = String::from(
        "SELECT ec.entity_id, ec.source_system, ec.contact_type, ec.contact_pref,
                ec.contact_value, ec.description
         FROM entity_contact_info ec",
    );
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(entity_type) = filter.entity_type {
        binds.push(SqlValue::Integer(entity_type.0));
        sql.push_str(&format!(
            " JOIN entity_info e ON ec.entity_id = e.entity_id AND e.entity_type = ?{}",
            binds.len()
        ));
    }
    let mut clauses = Vec::new();
    for (column, value) in [
        ("ec.entity_id", filter.entity_id.map(|v| v.0)),
        ("ec.source_system", filter.source_system.map(|v| v.0)),
        ("ec.contact_type", filter.contact_type.map(|v| v.0)),
    ] {
        if let Some(value) = value {
            binds.push(SqlValue::Integer(value));
            clauses.push(format!("{} = ?{}", column, binds.len()));
        }
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY ec.entity_id, ec.source_system, ec.contact_type, ec.contact_pref");

    db.query(&sql, rusqlite::params_from_iter(binds), |row| {
        Ok(ContactInfoRow {
            entity_id: row.get(0)?,
            source_system: row.get(1)?,
            info: ContactInfo {
                contact_type: row.get(2)?,
                pref: row.get(3)?,
                value: row.get(4)?,
                description: row.get(5)?,
            },
        })
    })
}

impl<'db> Entity<'db> {
    /// Stage one contact fact from `source_system` for the next `write_db()`.
    pub fn populate_contact_info(
        &mut self,
        source_system: SourceSystem,
        info: ContactInfo,
    ) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<ContactInfoCapability>("contact info")?;
        stage_fact(&mut capability.staged, source_system, Some((info.key(), info)))
    }

    /// Stage `source_system` with no facts: the next `write_db()` removes
    /// everything that source supplied unless facts are staged meanwhile.
    pub fn populate_contact_info_source(
        &mut self,
        source_system: SourceSystem,
    ) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<ContactInfoCapability>("contact info")?;
        stage_fact(&mut capability.staged, source_system, None)
    }

    pub fn get_contact_info(
        &self,
        source_system: Option<SourceSystem>,
        contact_type: Option<ContactType>,
    ) -> Result<Vec<ContactInfoRow>, CerebrumError> {
        contact_info_for(self.db(), self.require_id()?, source_system, contact_type)
    }

    pub fn add_contact_info(
        &self,
        source_system: SourceSystem,
        info: &ContactInfo,
    ) -> Result<(), CerebrumError> {
        add_contact_info(self.db(), self.require_id()?, source_system, info)
    }

    pub fn delete_contact_info(
        &self,
        source_system: SourceSystem,
        contact_type: ContactType,
        pref: ContactPref,
    ) -> Result<(), CerebrumError> {
        delete_contact_info(self.db(), self.require_id()?, source_system, contact_type, pref)
    }
}
