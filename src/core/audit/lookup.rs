//! Entity type and name resolution for audit metadata.
//!
//! A referenced entity may have been deleted since the change happened, and
//! not every entity type has a name namespace. Both resolve to `None`.
//! Driver errors still propagate.

use crate::core::constants::EntityId;
use crate::core::db::Database;
use crate::core::entity::name;
use crate::core::error::CerebrumError;
use lru::LruCache;
use rusqlite::params;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::ops::AddAssign;

pub trait EntityLookup {
    /// `code_str` of the entity's type.
    fn entity_type(&mut self, db: &Database, entity_id: EntityId) -> Result<Option<String>, CerebrumError>;

    fn entity_name(
        &mut self,
        db: &Database,
        entity_id: EntityId,
        entity_type: &str,
    ) -> Result<Option<String>, CerebrumError>;

    fn stats(&self) -> Option<LookupStats> {
        None
    }
}

impl<L: EntityLookup + ?Sized> EntityLookup for &mut L {
    fn entity_type(&mut self, db: &Database, entity_id: EntityId) -> Result<Option<String>, CerebrumError> {
        (**self).entity_type(db, entity_id)
    }

    fn entity_name(
        &mut self,
        db: &Database,
        entity_id: EntityId,
        entity_type: &str,
    ) -> Result<Option<String>, CerebrumError> {
        (**self).entity_name(db, entity_id, entity_type)
    }

    fn stats(&self) -> Option<LookupStats> {
        (**self).stats()
    }
}

/// Uncached lookups straight against the database.
#[derive(Debug, Default, Clone, Copy)]
pub struct DbLookup;

impl EntityLookup for DbLookup {
    fn entity_type(&mut self, db: &Database, entity_id: EntityId) -> Result<Option<String>, CerebrumError> {
        let rows = db.query(
            "SELECT etc.code_str
             FROM entity_info ei
             JOIN entity_type_code etc ON ei.entity_type = etc.code
             WHERE ei.entity_id = ?1",
            params![entity_id],
            |row| row.get(0),
        )?;
        Ok(rows.into_iter().next())
    }

    fn entity_name(
        &mut self,
        db: &Database,
        entity_id: EntityId,
        entity_type: &str,
    ) -> Result<Option<String>, CerebrumError> {
        let Some(domain) = db.config().namespace_for(entity_type) else {
            return Ok(None);
        };
        name::name_in_domain(db, entity_id, domain)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl AddAssign for CacheStats {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LookupStats {
    pub entity_type: CacheStats,
    pub entity_name: CacheStats,
}

impl AddAssign for LookupStats {
    fn add_assign(&mut self, other: Self) {
        self.entity_type += other.entity_type;
        self.entity_name += other.entity_name;
    }
}

/// Bounded most-recently-used caches in front of another lookup.
///
/// Only for bulk work where names and types do not change underneath, such
/// as replaying historical changes.
pub struct CachedLookup<L: EntityLookup = DbLookup> {
    inner: L,
    types: LruCache<EntityId, Option<String>>,
    names: LruCache<(EntityId, String), Option<String>>,
    stats: LookupStats,
}

impl<L: EntityLookup> CachedLookup<L> {
    pub fn new(inner: L, type_capacity: usize, name_capacity: usize) -> Self {
        let cap = |n| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            types: LruCache::new(cap(type_capacity)),
            names: LruCache::new(cap(name_capacity)),
            stats: LookupStats::default(),
        }
    }
}

impl<L: EntityLookup> EntityLookup for CachedLookup<L> {
    fn entity_type(&mut self, db: &Database, entity_id: EntityId) -> Result<Option<String>, CerebrumError> {
        if let Some(hit) = self.types.get(&entity_id) {
            self.stats.entity_type.hits += 1;
            return Ok(hit.clone());
        }
        self.stats.entity_type.misses += 1;
        let value = self.inner.entity_type(db, entity_id)?;
        self.types.put(entity_id, value.clone());
        Ok(value)
    }

    fn entity_name(
        &mut self,
        db: &Database,
        entity_id: EntityId,
        entity_type: &str,
    ) -> Result<Option<String>, CerebrumError> {
        let key = (entity_id, entity_type.to_string());
        if let Some(hit) = self.names.get(&key) {
            self.stats.entity_name.hits += 1;
            return Ok(hit.clone());
        }
        self.stats.entity_name.misses += 1;
        let value = self.inner.entity_name(db, entity_id, entity_type)?;
        self.names.put(key, value.clone());
        Ok(value)
    }

    fn stats(&self) -> Option<LookupStats> {
        Some(self.stats)
    }
}
