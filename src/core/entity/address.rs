//! Postal addresses, one per (source system, address type).

use crate::core::constants::{AddressType, EntityId, EntityType, SourceSystem, cl};
use crate::core::db::Database;
use crate::core::entity::{Capability, Entity, Staged, WriteContext, stage_fact};
use crate::core::error::CerebrumError;
use crate::core::reconcile::{ReconcileTarget, reconcile};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Address {
    pub address_text: Option<String>,
    pub p_o_box: Option<String>,
    pub postal_number: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressRow {
    pub entity_id: EntityId,
    pub source_system: SourceSystem,
    pub address_type: AddressType,
    pub address: Address,
}

/// Every field is optional; an empty list means "any".
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    pub entity_types: Vec<EntityType>,
    pub source_systems: Vec<SourceSystem>,
    pub address_types: Vec<AddressType>,
}

#[derive(Debug, Default)]
pub struct AddressCapability {
    staged: Option<Staged<AddressType, Address>>,
}

impl AddressCapability {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Capability for AddressCapability {
    fn name(&self) -> &'static str {
        "address"
    }

    fn is_dirty(&self) -> bool {
        self.staged.is_some()
    }

    fn on_write(&mut self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError> {
        let Some(staged) = self.staged.as_ref() else {
            return Ok(false);
        };
        let current = addresses_for(ctx.db, ctx.entity_id, Some(staged.source_system), None)?
            .into_iter()
            .map(|row| (row.address_type, row.address))
            .collect();
        let mut target = AddressTarget {
            db: ctx.db,
            entity_id: ctx.entity_id,
            source_system: staged.source_system,
        };
        let summary = reconcile(&mut target, current, &keyed(&staged.facts))?;
        Ok(summary.changed())
    }

    fn on_clear(&mut self) {
        self.staged = None;
    }

    fn on_delete(&mut self, ctx: &WriteContext<'_>) -> Result<(), CerebrumError> {
        for row in addresses_for(ctx.db, ctx.entity_id, None, None)? {
            delete_address(ctx.db, ctx.entity_id, row.source_system, row.address_type)?;
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

// The reconciler compares values that carry their own key.
fn keyed(facts: &BTreeMap<AddressType, Address>) -> BTreeMap<AddressType, (AddressType, Address)> {
    facts
        .iter()
        .map(|(kind, address)| (*kind, (*kind, address.clone())))
        .collect()
}

struct AddressTarget<'a> {
    db: &'a Database,
    entity_id: EntityId,
    source_system: SourceSystem,
}

impl ReconcileTarget for AddressTarget<'_> {
    type Key = AddressType;
    type Value = (AddressType, Address);

    fn key_of(&self, value: &Self::Value) -> AddressType {
        value.0
    }

    fn equals(&self, persisted: &Self::Value, desired: &Self::Value) -> bool {
        persisted.1 == desired.1
    }

    fn insert(&mut self, key: &AddressType, value: &Self::Value) -> Result<(), CerebrumError> {
        add_address(self.db, self.entity_id, self.source_system, *key, &value.1)
    }

    fn update(
        &mut self,
        key: &AddressType,
        _persisted: &Self::Value,
        desired: &Self::Value,
    ) -> Result<(), CerebrumError> {
        let a = &desired.1;
        self.db.execute(
            "UPDATE entity_address
             SET address_text = ?4, p_o_box = ?5, postal_number = ?6, city = ?7, country = ?8
             WHERE entity_id = ?1 AND source_system = ?2 AND address_type = ?3",
            params![
                self.entity_id,
                self.source_system,
                key,
                a.address_text,
                a.p_o_box,
                a.postal_number,
                a.city,
                a.country
            ],
        )?;
        self.db.log_change(
            self.entity_id,
            &cl::ENTITY_ADDR_MOD,
            None,
            serde_json::json!({ "src": self.source_system.0, "type": key.0 }),
        )
    }

    fn delete(&mut self, key: &AddressType, _persisted: &Self::Value) -> Result<(), CerebrumError> {
        delete_address(self.db, self.entity_id, self.source_system, *key)
    }
}

fn add_address(
    db: &Database,
    entity_id: EntityId,
    source_system: SourceSystem,
    address_type: AddressType,
    a: &Address,
) -> Result<(), CerebrumError> {
    db.execute(
        "INSERT INTO entity_address
           (entity_id, source_system, address_type, address_text, p_o_box,
            postal_number, city, country)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entity_id,
            source_system,
            address_type,
            a.address_text,
            a.p_o_box,
            a.postal_number,
            a.city,
            a.country
        ],
    )?;
    db.log_change(
        entity_id,
        &cl::ENTITY_ADDR_ADD,
        None,
        serde_json::json!({ "src": source_system.0, "type": address_type.0 }),
    )
}

fn delete_address(
    db: &Database,
    entity_id: EntityId,
    source_system: SourceSystem,
    address_type: AddressType,
) -> Result<(), CerebrumError> {
    db.execute(
        "DELETE FROM entity_address
         WHERE entity_id = ?1 AND source_system = ?2 AND address_type = ?3",
        params![entity_id, source_system, address_type],
    )?;
    db.log_change(
        entity_id,
        &cl::ENTITY_ADDR_DEL,
        None,
        serde_json::json!({ "src": source_system.0, "type": address_type.0 }),
    )
}

fn addresses_for(
    db: &Database,
    entity_id: EntityId,
    source_system: Option<SourceSystem>,
    address_type: Option<AddressType>,
) -> Result<Vec<AddressRow>, CerebrumError> {
    let mut sql = String::from(
        "SELECT entity_id, source_system, address_type, address_text, p_o_box,
                postal_number, city, country
         FROM entity_address WHERE entity_id = ?1",
    );
    let mut binds = vec![SqlValue::Integer(entity_id.0)];
    if let Some(source_system) = source_system {
        binds.push(SqlValue::Integer(source_system.0));
        sql.push_str(&format!(" AND source_system = ?{}", binds.len()));
    }
    if let Some(address_type) = address_type {
        binds.push(SqlValue::Integer(address_type.0));
        sql.push_str(&format!(" AND address_type = ?{}", binds.len()));
    }
    sql.push_str(" ORDER BY source_system, address_type");
    db.query(&sql, rusqlite::params_from_iter(binds), map_row)
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AddressRow> {
    Ok(AddressRow {
        entity_id: row.get(0)?,
        source_system: row.get(1)?,
        address_type: row.get(2)?,
        address: Address {
            address_text: row.get(3)?,
            p_o_box: row.get(4)?,
            postal_number: row.get(5)?,
            city: row.get(6)?,
            country: row.get(7)?,
        },
    })
}

/// `column IN (?n, ...)` for a non-empty list of codes; pushes the binds.
fn in_clause(column: &str, codes: &[i64], binds: &mut Vec<SqlValue>) -> Option<String> {
    if codes.is_empty() {
        return None;
    }
    let placeholders: Vec<String> = codes
        .iter()
        .map(|code| {
            binds.push(SqlValue::Integer(*code));
            format!("?{}", binds.len())
        })
        .collect();
    Some(format!("{} IN ({})", column, placeholders.join(", ")))
}

/// Addresses of all entities, narrowed by `filter`.
pub fn list_entity_addresses(
    db: &Database,
    filter: &AddressFilter,
) -> Result<Vec<AddressRow>, CerebrumError> {
    let mut binds = Vec::new();
    let clauses: Vec<String> = [
        in_clause(
            "e.entity_type",
            &filter.entity_types.iter().map(|c| c.0).collect::<Vec<_>>(),
            &mut binds,
        ),
        in_clause(
            "ea.source_system",
            &filter.source_systems.iter().map(|c| c.0).collect::<Vec<_>>(),
            &mut binds,
        ),
        in_clause(
            "ea.address_type",
            &filter.address_types.iter().map(|c| c.0).collect::<Vec<_>>(),
            &mut binds,
        ),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut sql = String::from(
        "SELECT ea.entity_id, ea.source_system, ea.address_type, ea.address_text,
                ea.p_o_box, ea.postal_number, ea.city, ea.country
         FROM entity_address ea
         JOIN entity_info e ON e.entity_id = ea.entity_id",
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY ea.entity_id, ea.source_system, ea.address_type");
    db.query(&sql, rusqlite::params_from_iter(binds), map_row)
}

impl<'db> Entity<'db> {
    /// Stage the `address_type` address from `source_system`.
    pub fn populate_address(
        &mut self,
        source_system: SourceSystem,
        address_type: AddressType,
        address: Address,
    ) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<AddressCapability>("address")?;
        stage_fact(&mut capability.staged, source_system, Some((address_type, address)))
    }

    pub fn populate_address_source(&mut self, source_system: SourceSystem) -> Result<(), CerebrumError> {
        let capability = self.require_capability_mut::<AddressCapability>("address")?;
        stage_fact(&mut capability.staged, source_system, None)
    }

    pub fn get_entity_address(
        &self,
        source_system: Option<SourceSystem>,
        address_type: Option<AddressType>,
    ) -> Result<Vec<AddressRow>, CerebrumError> {
        addresses_for(self.db(), self.require_id()?, source_system, address_type)
    }

    pub fn add_entity_address(
        &self,
        source_system: SourceSystem,
        address_type: AddressType,
        address: &Address,
    ) -> Result<(), CerebrumError> {
        add_address(self.db(), self.require_id()?, source_system, address_type, address)
    }

    pub fn delete_entity_address(
        &self,
        source_system: SourceSystem,
        address_type: AddressType,
    ) -> Result<(), CerebrumError> {
        delete_address(self.db(), self.require_id()?, source_system, address_type)
    }
}
