//! Generic entity access.
//!
//! An [`Entity`] associates with one row of `entity_info`. It goes through a
//! fixed lifecycle: `clear()`, then either `populate()` (new, in memory only)
//! or `find()` (loaded), then `write_db()` to persist staged state.
//!
//! Optional behaviour (contact info, addresses, external ids, quarantines,
//! institution extensions) is attached as an ordered list of [`Capability`] components.
//! `write_db()`, `clear()` and `delete()` call each capability's hook in the
//! order the capabilities were attached.

pub mod address;
pub mod contact_info;
pub mod external_id;
pub mod name;
pub mod quarantine;

use crate::core::constants::{EntityId, EntityType, SourceSystem, Spread, cl};
use crate::core::db::Database;
use crate::core::error::CerebrumError;
use crate::core::schemas;
use crate::core::tracking::{ChangeTracker, FieldClass, TrackedFields};
use rusqlite::params;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityField {
    Db,
    EntityId,
    InDb,
    EntityType,
}

impl TrackedFields for EntityField {
    fn declarations() -> &'static [(Self, FieldClass)] {
        &[
            (EntityField::Db, FieldClass::NeverCleared),
            // entity_id is the parent of most foreign keys; write-once.
            (EntityField::EntityId, FieldClass::ReadOnly),
            (EntityField::InDb, FieldClass::ReadOnly),
            (EntityField::EntityType, FieldClass::WriteTracked),
        ]
    }
}

/// Result of a `write_db()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteOutcome {
    /// Nothing was dirty; no statement was issued.
    Unchanged,
    /// Existing rows were changed.
    Updated,
    /// A new `entity_info` row was inserted.
    Inserted,
}

impl WriteOutcome {
    pub fn is_new(self) -> bool {
        self == WriteOutcome::Inserted
    }

    pub fn changed(self) -> bool {
        self != WriteOutcome::Unchanged
    }

    pub fn merge(self, other: WriteOutcome) -> WriteOutcome {
        self.max(other)
    }
}

/// What a capability hook gets to see of its owning entity.
#[derive(Clone, Copy)]
pub struct WriteContext<'a> {
    pub db: &'a Database,
    pub entity_id: EntityId,
    pub entity_type: EntityType,
}

/// A component attached to an entity.
pub trait Capability: Any {
    fn name(&self) -> &'static str;

    /// Whether the next `write_db()` has anything to do for this component.
    fn is_dirty(&self) -> bool;

    /// Persist staged state. Returns whether any statement changed the database.
    /// Must not drop staged state: a later capability may still fail.
    fn on_write(&mut self, ctx: &WriteContext<'_>) -> Result<bool, CerebrumError>;

    /// Runs on every capability once the whole `write_db()` has succeeded.
    fn after_write(&mut self) {
        self.on_clear();
    }

    fn on_clear(&mut self);

    /// Remove this component's rows before the entity itself is deleted.
    fn on_delete(&mut self, _ctx: &WriteContext<'_>) -> Result<(), CerebrumError> {
        Ok(())
    }

    /// Extends entity equality; `other` has the same concrete type.
    fn state_eq(&self, _other: &dyn Capability) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Facts staged for one source system during one populate/write cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Staged<K: Ord, V> {
    pub source_system: SourceSystem,
    pub facts: BTreeMap<K, V>,
}

/// Stage `fact` under `source_system`, refusing a second source system.
pub fn stage_fact<K: Ord, V>(
    staged: &mut Option<Staged<K, V>>,
    source_system: SourceSystem,
    fact: Option<(K, V)>,
) -> Result<(), CerebrumError> {
    if let Some(existing) = staged.as_ref() {
        if existing.source_system != source_system {
            return Err(CerebrumError::IntegrityError(format!(
                "can't populate multiple source systems ({:?} then {:?}) without write_db()",
                existing.source_system, source_system
            )));
        }
    }
    let slot = staged.get_or_insert_with(|| Staged {
        source_system,
        facts: BTreeMap::new(),
    });
    if let Some((key, value)) = fact {
        slot.facts.insert(key, value);
    }
    Ok(())
}

pub struct Entity<'db> {
    db: &'db Database,
    entity_id: Option<EntityId>,
    entity_type: Option<EntityType>,
    // None: neither populated nor found. Some(false): populated, not written.
    in_db: Option<bool>,
    tracker: ChangeTracker<EntityField>,
    capabilities: Vec<Box<dyn Capability>>,
}

impl fmt::Debug for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_id", &self.entity_id)
            .field("entity_type", &self.entity_type)
            .field("in_db", &self.in_db)
            .field(
                "capabilities",
                &self.capabilities.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<'db> Entity<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self {
            db,
            entity_id: None,
            entity_type: None,
            in_db: None,
            tracker: ChangeTracker::new(),
            capabilities: Vec::new(),
        }
    }

    /// Attach a capability; hooks run in attachment order.
    pub fn with(mut self, capability: impl Capability) -> Self {
        self.capabilities.push(Box::new(capability));
        self
    }

    pub fn db(&self) -> &'db Database {
        self.db
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity_id
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        self.entity_type
    }

    pub fn is_in_db(&self) -> bool {
        self.in_db == Some(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty() || self.capabilities.iter().any(|c| c.is_dirty())
    }

    pub(crate) fn require_id(&self) -> Result<EntityId, CerebrumError> {
        self.entity_id.ok_or_else(|| {
            CerebrumError::IntegrityError("no entity associated with this object".to_string())
        })
    }

    pub(crate) fn context(&self) -> Result<WriteContext<'db>, CerebrumError> {
        let entity_id = self.require_id()?;
        let entity_type = self.entity_type.ok_or_else(|| {
            CerebrumError::ProgrammingError("entity has an id but no type".to_string())
        })?;
        Ok(WriteContext {
            db: self.db,
            entity_id,
            entity_type,
        })
    }

    pub fn capability<T: Capability>(&self) -> Option<&T> {
        self.capabilities
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn capability_mut<T: Capability>(&mut self) -> Option<&mut T> {
        self.capabilities
            .iter_mut()
            .find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }

    pub(crate) fn require_capability_mut<T: Capability>(
        &mut self,
        what: &str,
    ) -> Result<&mut T, CerebrumError> {
        self.capability_mut::<T>().ok_or_else(|| {
            CerebrumError::ProgrammingError(format!("entity has no {} capability", what))
        })
    }

    /// Forget any association with a database entity. Safe to repeat.
    pub fn clear(&mut self) {
        self.entity_id = None;
        self.entity_type = None;
        self.in_db = None;
        self.tracker.reset();
        for capability in self.capabilities.iter_mut() {
            capability.on_clear();
        }
    }

    /// Stage a new entity of `entity_type` without touching the database.
    pub fn populate(&mut self, entity_type: EntityType) -> Result<(), CerebrumError> {
        match self.in_db {
            Some(false) => {
                return Err(CerebrumError::ProgrammingError(
                    "populate() called multiple times".to_string(),
                ));
            }
            Some(true) => {
                return Err(CerebrumError::ProgrammingError(
                    "populate() called on an object already in the database; clear() it first"
                        .to_string(),
                ));
            }
            None => {}
        }
        self.in_db = Some(false);
        self.tracker
            .set(EntityField::EntityType, &mut self.entity_type, Some(entity_type))
    }

    /// Sync staged state with the database.
    ///
    /// Inserts a new `entity_info` row on the first write of a populated
    /// object, then runs every dirty capability. If anything fails the object
    /// is left exactly as dirty as before, so a retry repeats the full write.
    pub fn write_db(&mut self) -> Result<WriteOutcome, CerebrumError> {
        let in_db = self.in_db.ok_or_else(|| {
            CerebrumError::ProgrammingError("write_db() called before populate() or find()".to_string())
        })?;
        if !self.is_dirty() {
            return Ok(WriteOutcome::Unchanged);
        }

        let saved_id = self.entity_id;
        let saved_in_db = self.in_db;
        match self.write_all(in_db) {
            Ok(outcome) => {
                self.tracker.reset();
                for capability in self.capabilities.iter_mut() {
                    capability.after_write();
                }
                Ok(outcome)
            }
            Err(err) => {
                self.entity_id = saved_id;
                self.in_db = saved_in_db;
                Err(err)
            }
        }
    }

    fn write_all(&mut self, in_db: bool) -> Result<WriteOutcome, CerebrumError> {
        let mut outcome = WriteOutcome::Unchanged;
        if self.tracker.is_dirty() && !in_db {
            let entity_type = self.entity_type.ok_or_else(|| {
                CerebrumError::ProgrammingError("entity_type not populated".to_string())
            })?;
            let entity_id = EntityId(self.db.nextval(schemas::ENTITY_ID_SEQ)?);
            self.db.execute(
                "INSERT INTO entity_info(entity_id, entity_type) VALUES(?1, ?2)",
                params![entity_id, entity_type],
            )?;
            self.db
                .log_change(entity_id, &cl::ENTITY_ADD, None, serde_json::Value::Null)?;
            self.entity_id = Some(entity_id);
            self.in_db = Some(true);
            outcome = WriteOutcome::Inserted;
        }
        // entity_type cannot change once written, so an existing row needs no UPDATE.

        let ctx = self.context()?;
        for capability in self.capabilities.iter_mut() {
            if capability.is_dirty() && capability.on_write(&ctx)? {
                outcome = outcome.merge(WriteOutcome::Updated);
            }
        }
        Ok(outcome)
    }

    /// `write_db()` and return the (possibly new) entity id.
    pub fn write_db_and_get_id(&mut self) -> Result<EntityId, CerebrumError> {
        self.write_db()?;
        self.require_id()
    }

    /// Register a new entity of `entity_type` and associate with it.
    pub fn new_entity(&mut self, entity_type: EntityType) -> Result<EntityId, CerebrumError> {
        self.clear();
        self.populate(entity_type)?;
        let entity_id = self.write_db_and_get_id()?;
        self.clear();
        self.find(entity_id)?;
        Ok(entity_id)
    }

    /// Associate with the entity `entity_id`; NotFound if there is none.
    pub fn find(&mut self, entity_id: EntityId) -> Result<(), CerebrumError> {
        let (found_id, entity_type) = self.db.query_1(
            "SELECT entity_id, entity_type FROM entity_info WHERE entity_id = ?1",
            params![entity_id],
            |row| Ok((row.get::<_, EntityId>(0)?, row.get::<_, EntityType>(1)?)),
        )?;
        self.entity_id = Some(found_id);
        self.entity_type = Some(entity_type);
        self.in_db = Some(true);
        self.tracker.reset();
        Ok(())
    }

    /// Completely remove the entity, including rows owned by its capabilities,
    /// its spreads and its names.
    pub fn delete(&mut self) -> Result<(), CerebrumError> {
        let entity_id = self.entity_id.ok_or_else(|| {
            CerebrumError::IntegrityError("unable to determine which entity to delete".to_string())
        })?;
        let ctx = self.context()?;
        for capability in self.capabilities.iter_mut() {
            capability.on_delete(&ctx)?;
        }
        for spread in self.get_spread()? {
            self.delete_spread(spread)?;
        }
        for entry in self.get_names()? {
            self.delete_entity_name(entry.domain_code)?;
        }
        self.db.execute(
            "DELETE FROM entity_info WHERE entity_id = ?1",
            params![entity_id],
        )?;
        self.db
            .log_change(entity_id, &cl::ENTITY_DEL, None, serde_json::Value::Null)?;
        self.clear();
        Ok(())
    }

    pub fn get_spread(&self) -> Result<Vec<Spread>, CerebrumError> {
        let entity_id = self.require_id()?;
        self.db.query(
            "SELECT spread FROM entity_spread WHERE entity_id = ?1 ORDER BY spread",
            params![entity_id],
            |row| row.get(0),
        )
    }

    pub fn has_spread(&self, spread: Spread) -> Result<bool, CerebrumError> {
        Ok(self.get_spread()?.contains(&spread))
    }

    /// Add `spread`. Immediate; callers check `has_spread` to avoid duplicates.
    pub fn add_spread(&self, spread: Spread) -> Result<(), CerebrumError> {
        let ctx = self.context()?;
        self.db.execute(
            "INSERT INTO entity_spread(entity_id, entity_type, spread) VALUES(?1, ?2, ?3)",
            params![ctx.entity_id, ctx.entity_type, spread],
        )?;
        self.db.log_change(
            ctx.entity_id,
            &cl::SPREAD_ADD,
            None,
            serde_json::json!({ "spread": spread.0 }),
        )
    }

    pub fn delete_spread(&self, spread: Spread) -> Result<(), CerebrumError> {
        let entity_id = self.require_id()?;
        self.db.execute(
            "DELETE FROM entity_spread WHERE entity_id = ?1 AND spread = ?2",
            params![entity_id, spread],
        )?;
        self.db.log_change(
            entity_id,
            &cl::SPREAD_DEL,
            None,
            serde_json::json!({ "spread": spread.0 }),
        )
    }

    pub fn list_all_with_spread(
        db: &Database,
        spread: Spread,
    ) -> Result<Vec<EntityId>, CerebrumError> {
        db.query(
            "SELECT DISTINCT entity_id FROM entity_spread WHERE spread = ?1 ORDER BY entity_id",
            params![spread],
            |row| row.get(0),
        )
    }

    pub fn list_all_with_type(
        db: &Database,
        entity_type: EntityType,
    ) -> Result<Vec<EntityId>, CerebrumError> {
        db.query(
            "SELECT entity_id FROM entity_info WHERE entity_type = ?1 ORDER BY entity_id",
            params![entity_type],
            |row| row.get(0),
        )
    }
}

impl PartialEq for Entity<'_> {
    /// Same type, then same id when both have one, then every capability.
    fn eq(&self, other: &Self) -> bool {
        if self.entity_type != other.entity_type {
            return false;
        }
        if let (Some(a), Some(b)) = (self.entity_id, other.entity_id) {
            if a != b {
                return false;
            }
        }
        if self.capabilities.len() != other.capabilities.len() {
            return false;
        }
        self.capabilities
            .iter()
            .zip(other.capabilities.iter())
            .all(|(a, b)| a.as_any().type_id() == b.as_any().type_id() && a.state_eq(b.as_ref()))
    }
}
