//! Entity names: one unique name per entity within a value domain.

use crate::core::constants::{EntityId, ValueDomain, cl};
use crate::core::db::Database;
use crate::core::entity::Entity;
use crate::core::error::CerebrumError;
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameEntry {
    pub domain: String,
    pub domain_code: ValueDomain,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameRow {
    pub entity_id: EntityId,
    pub value_domain: ValueDomain,
    pub entity_name: String,
}

/// Resolve `name` in the value domain whose code_str is `domain`.
pub fn entity_id_by_name(db: &Database, domain: &str, name: &str) -> Result<EntityId, CerebrumError> {
    db.query_1(
        "SELECT en.entity_id
         FROM entity_name en
         JOIN value_domain_code vd ON en.value_domain = vd.code
         WHERE vd.code_str = ?1 AND en.entity_name = ?2",
        params![domain, name],
        |row| row.get(0),
    )
}

/// Name of `entity_id` in the domain `domain`, or `None` if it has none.
pub fn name_in_domain(
    db: &Database,
    entity_id: EntityId,
    domain: &str,
) -> Result<Option<String>, CerebrumError> {
    let names = db.query(
        "SELECT en.entity_name
         FROM entity_name en
         JOIN value_domain_code vd ON en.value_domain = vd.code
         WHERE en.entity_id = ?1 AND vd.code_str = ?2",
        params![entity_id, domain],
        |row| row.get(0),
    )?;
    Ok(names.into_iter().next())
}

impl<'db> Entity<'db> {
    pub fn get_name(&self, domain: ValueDomain) -> Result<String, CerebrumError> {
        let entity_id = self.require_id()?;
        self.db().query_1(
            "SELECT entity_name FROM entity_name WHERE entity_id = ?1 AND value_domain = ?2",
            params![entity_id, domain],
            |row| row.get(0),
        )
    }

    pub fn get_names(&self) -> Result<Vec<NameEntry>, CerebrumError> {
        let entity_id = self.require_id()?;
        self.db().query(
            "SELECT vd.code_str, vd.code, en.entity_name
             FROM entity_name en
             JOIN value_domain_code vd ON en.value_domain = vd.code
             WHERE en.entity_id = ?1
             ORDER BY vd.code",
            params![entity_id],
            |row| {
                Ok(NameEntry {
                    domain: row.get(0)?,
                    domain_code: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
    }

    pub fn add_entity_name(&self, domain: ValueDomain, name: &str) -> Result<(), CerebrumError> {
        let entity_id = self.require_id()?;
        self.db().execute(
            "INSERT INTO entity_name(entity_id, value_domain, entity_name) VALUES(?1, ?2, ?3)",
            params![entity_id, domain, name],
        )?;
        self.db().log_change(
            entity_id,
            &cl::ENTITY_NAME_ADD,
            None,
            serde_json::json!({ "domain": domain.0, "name": name }),
        )
    }

    pub fn update_entity_name(&self, domain: ValueDomain, name: &str) -> Result<(), CerebrumError> {
        let entity_id = self.require_id()?;
        let updated = self.db().execute(
            "UPDATE entity_name SET entity_name = ?3 WHERE entity_id = ?1 AND value_domain = ?2",
            params![entity_id, domain, name],
        )?;
        if updated == 0 {
            return Err(CerebrumError::NotFound(format!(
                "entity {} has no name in domain {}",
                entity_id, domain.0
            )));
        }
        self.db().log_change(
            entity_id,
            &cl::ENTITY_NAME_MOD,
            None,
            serde_json::json!({ "domain": domain.0, "name": name }),
        )
    }

    pub fn delete_entity_name(&self, domain: ValueDomain) -> Result<(), CerebrumError> {
        let entity_id = self.require_id()?;
        let old_name = self.get_name(domain)?;
        self.db().execute(
            "DELETE FROM entity_name WHERE entity_id = ?1 AND value_domain = ?2",
            params![entity_id, domain],
        )?;
        self.db().log_change(
            entity_id,
            &cl::ENTITY_NAME_DEL,
            None,
            serde_json::json!({ "domain": domain.0, "name": old_name }),
        )
    }

    /// Associate with the entity named `name` in `domain`.
    pub fn find_by_name(&mut self, name: &str, domain: ValueDomain) -> Result<(), CerebrumError> {
        let entity_id: EntityId = self.db().query_1(
            "SELECT entity_id FROM entity_name WHERE value_domain = ?1 AND entity_name = ?2",
            params![domain, name],
            |row| row.get(0),
        )?;
        self.find(entity_id)
    }

    pub fn list_names(db: &Database, domain: ValueDomain) -> Result<Vec<NameRow>, CerebrumError> {
        db.query(
            "SELECT entity_id, value_domain, entity_name FROM entity_name
             WHERE value_domain = ?1 ORDER BY entity_name",
            params![domain],
            |row| {
                Ok(NameRow {
                    entity_id: row.get(0)?,
                    value_domain: row.get(1)?,
                    entity_name: row.get(2)?,
                })
            },
        )
    }
}
