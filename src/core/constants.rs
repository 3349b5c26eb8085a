//! Identifiers, code tables and change types.
//!
//! Every type column in the schema holds an integer code from a
//! `<kind>_code` table. The typed newtypes below keep a spread from being
//! passed where a source system is expected; [`Constants`] resolves them to
//! and from their `code_str` names.

use crate::core::db::Database;
use crate::core::error::CerebrumError;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for EntityId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for EntityId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(EntityId)
    }
}

/// A kind of integer code backed by its own `<kind>_code` table.
pub trait CodeKind: Copy + Eq + fmt::Debug {
    const TABLE: &'static str;
    fn from_code(code: i64) -> Self;
    fn code(&self) -> i64;
}

macro_rules! define_code {
    ($(#[$meta:meta])* $name:ident, $table:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl CodeKind for $name {
            const TABLE: &'static str = $table;
            fn from_code(code: i64) -> Self {
                $name(code)
            }
            fn code(&self) -> i64 {
                self.0
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

define_code!(EntityType, "entity_type_code");
define_code!(
    /// Marks an entity as exported to one external system.
    Spread,
    "spread_code"
);
define_code!(SourceSystem, "source_system_code");
define_code!(ContactType, "contact_type_code");
define_code!(AddressType, "address_type_code");
define_code!(QuarantineType, "quarantine_type_code");
define_code!(
    /// Kind of identifier an external system knows an entity by.
    ExternalIdType,
    "external_id_type_code"
);
define_code!(
    /// Namespace in which entity names are unique.
    ValueDomain,
    "value_domain_code"
);

/// A change type known at compile time, identified by `category:type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeTypeDef {
    pub category: &'static str,
    pub type_: &'static str,
    pub msg: &'static str,
}

impl ChangeTypeDef {
    pub const fn new(category: &'static str, type_: &'static str, msg: &'static str) -> Self {
        Self {
            category,
            type_,
            msg,
        }
    }
}

impl fmt::Display for ChangeTypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.type_)
    }
}

/// A change type as stored in `change_type_code`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeType {
    pub id: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub type_: String,
}

impl ChangeType {
    pub fn matches(&self, def: &ChangeTypeDef) -> bool {
        self.category == def.category && self.type_ == def.type_
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.type_)
    }
}

pub mod cl {
    use super::ChangeTypeDef;

    pub const ENTITY_ADD: ChangeTypeDef = ChangeTypeDef::new("entity", "add", "created entity");
    pub const ENTITY_DEL: ChangeTypeDef = ChangeTypeDef::new("entity", "del", "deleted entity");
    pub const SPREAD_ADD: ChangeTypeDef = ChangeTypeDef::new("spread", "add", "added spread");
    pub const SPREAD_DEL: ChangeTypeDef = ChangeTypeDef::new("spread", "del", "removed spread");
    pub const ENTITY_NAME_ADD: ChangeTypeDef =
        ChangeTypeDef::new("entity_name", "add", "added entity name");
    pub const ENTITY_NAME_MOD: ChangeTypeDef =
        ChangeTypeDef::new("entity_name", "mod", "changed entity name");
    pub const ENTITY_NAME_DEL: ChangeTypeDef =
        ChangeTypeDef::new("entity_name", "del", "removed entity name");
    pub const ENTITY_CINFO_ADD: ChangeTypeDef =
        ChangeTypeDef::new("entity_cinfo", "add", "added contact info");
    pub const ENTITY_CINFO_MOD: ChangeTypeDef =
        ChangeTypeDef::new("entity_cinfo", "mod", "changed contact info");
    pub const ENTITY_CINFO_DEL: ChangeTypeDef =
        ChangeTypeDef::new("entity_cinfo", "del", "removed contact info");
    pub const ENTITY_ADDR_ADD: ChangeTypeDef =
        ChangeTypeDef::new("entity_addr", "add", "added address");
    pub const ENTITY_ADDR_MOD: ChangeTypeDef =
        ChangeTypeDef::new("entity_addr", "mod", "changed address");
    pub const ENTITY_ADDR_DEL: ChangeTypeDef =
        ChangeTypeDef::new("entity_addr", "del", "removed address");
    pub const ENTITY_EXT_ID_ADD: ChangeTypeDef =
        ChangeTypeDef::new("entity_ext_id", "add", "added external id");
    pub const ENTITY_EXT_ID_MOD: ChangeTypeDef =
        ChangeTypeDef::new("entity_ext_id", "mod", "changed external id");
    pub const ENTITY_EXT_ID_DEL: ChangeTypeDef =
        ChangeTypeDef::new("entity_ext_id", "del", "removed external id");
    pub const QUARANTINE_ADD: ChangeTypeDef =
        ChangeTypeDef::new("quarantine", "add", "added quarantine");
    pub const QUARANTINE_MOD: ChangeTypeDef =
        ChangeTypeDef::new("quarantine", "mod", "changed quarantine");
    pub const QUARANTINE_DEL: ChangeTypeDef =
        ChangeTypeDef::new("quarantine", "del", "removed quarantine");
    pub const ACCOUNT_PASSWORD: ChangeTypeDef =
        ChangeTypeDef::new("account", "password", "set password");
    pub const PERSON_SAP_MOD: ChangeTypeDef =
        ChangeTypeDef::new("person_sap", "mod", "changed SAP person data");
    pub const SAP_TILSETTING_ADD: ChangeTypeDef =
        ChangeTypeDef::new("sap_tilsetting", "add", "added employment");
    pub const SAP_TILSETTING_MOD: ChangeTypeDef =
        ChangeTypeDef::new("sap_tilsetting", "mod", "changed employment");
    pub const SAP_TILSETTING_DEL: ChangeTypeDef =
        ChangeTypeDef::new("sap_tilsetting", "del", "removed employment");
    pub const SAP_ROLLE_ADD: ChangeTypeDef = ChangeTypeDef::new("sap_rolle", "add", "added role");
    pub const SAP_ROLLE_MOD: ChangeTypeDef =
        ChangeTypeDef::new("sap_rolle", "mod", "changed role");
    pub const SAP_ROLLE_DEL: ChangeTypeDef =
        ChangeTypeDef::new("sap_rolle", "del", "removed role");

    pub const ALL: &[ChangeTypeDef] = &[
        ENTITY_ADD,
        ENTITY_DEL,
        SPREAD_ADD,
        SPREAD_DEL,
        ENTITY_NAME_ADD,
        ENTITY_NAME_MOD,
        ENTITY_NAME_DEL,
        ENTITY_CINFO_ADD,
        ENTITY_CINFO_MOD,
        ENTITY_CINFO_DEL,
        ENTITY_ADDR_ADD,
        ENTITY_ADDR_MOD,
        ENTITY_ADDR_DEL,
        ENTITY_EXT_ID_ADD,
        ENTITY_EXT_ID_MOD,
        ENTITY_EXT_ID_DEL,
        QUARANTINE_ADD,
        QUARANTINE_MOD,
        QUARANTINE_DEL,
        ACCOUNT_PASSWORD,
        PERSON_SAP_MOD,
        SAP_TILSETTING_ADD,
        SAP_TILSETTING_MOD,
        SAP_TILSETTING_DEL,
        SAP_ROLLE_ADD,
        SAP_ROLLE_MOD,
        SAP_ROLLE_DEL,
    ];
}

/// Code-table accessor bound to one database handle.
pub struct Constants<'db> {
    db: &'db Database,
}

impl<'db> Constants<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Look up `code_str`, registering it with the next free code if absent.
    pub fn get_or_insert<K: CodeKind>(
        &self,
        code_str: &str,
        description: &str,
    ) -> Result<K, CerebrumError> {
        if let Some(code) = self.lookup::<K>(code_str)? {
            return Ok(code);
        }
        self.db.execute(
            &format!(
                "INSERT INTO {}(code, code_str, description)
                 VALUES((SELECT COALESCE(MAX(code), 0) + 1 FROM {}), ?1, ?2)",
                K::TABLE,
                K::TABLE
            ),
            params![code_str, description],
        )?;
        self.by_str(code_str)
    }

    pub fn by_str<K: CodeKind>(&self, code_str: &str) -> Result<K, CerebrumError> {
        self.lookup(code_str)?.ok_or_else(|| {
            CerebrumError::NotFound(format!("{} '{}'", K::TABLE, code_str))
        })
    }

    fn lookup<K: CodeKind>(&self, code_str: &str) -> Result<Option<K>, CerebrumError> {
        let code: Option<i64> = self
            .db
            .connection()
            .query_row(
                &format!("SELECT code FROM {} WHERE code_str = ?1", K::TABLE),
                params![code_str],
                |row| row.get(0),
            )
            .optional()?;
        Ok(code.map(K::from_code))
    }

    pub fn code_str<K: CodeKind>(&self, code: K) -> Result<String, CerebrumError> {
        self.db.query_1(
            &format!("SELECT code_str FROM {} WHERE code = ?1", K::TABLE),
            params![code.code()],
            |row| row.get(0),
        )
    }

    pub fn change_type(&self, def: &ChangeTypeDef) -> Result<ChangeType, CerebrumError> {
        self.db.query_1(
            "SELECT change_type_id, category, type FROM change_type_code
             WHERE category = ?1 AND type = ?2",
            params![def.category, def.type_],
            change_type_from_row,
        )
    }

    pub fn change_type_by_id(&self, change_type_id: i64) -> Result<ChangeType, CerebrumError> {
        self.db.query_1(
            "SELECT change_type_id, category, type FROM change_type_code
             WHERE change_type_id = ?1",
            params![change_type_id],
            change_type_from_row,
        )
    }

    pub fn list_change_types(&self) -> Result<Vec<ChangeType>, CerebrumError> {
        self.db.query(
            "SELECT change_type_id, category, type FROM change_type_code
             ORDER BY change_type_id",
            [],
            change_type_from_row,
        )
    }
}

fn change_type_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeType> {
    Ok(ChangeType {
        id: row.get(0)?,
        category: row.get(1)?,
        type_: row.get(2)?,
    })
}

/// Register every change type in [`cl::ALL`]. Idempotent.
pub fn seed_change_types(conn: &rusqlite::Connection) -> Result<(), CerebrumError> {
    for def in cl::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO change_type_code(category, type, msg) VALUES(?1, ?2, ?3)",
            params![def.category, def.type_, def.msg],
        )?;
    }
    Ok(())
}
