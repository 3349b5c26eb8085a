use crate::core::audit::lookup::{CachedLookup, DbLookup, EntityLookup, LookupStats};
use crate::core::audit::record::{AuditMetadata, AuditRecord};
use crate::core::constants::{Constants, EntityId};
use crate::core::db::Database;
use crate::core::error::CerebrumError;
use serde_json::Value;

/// Turns one change-log event into an [`AuditRecord`].
pub struct AuditRecordBuilder<'db> {
    db: &'db Database,
    lookup: Box<dyn EntityLookup + 'db>,
}

impl<'db> AuditRecordBuilder<'db> {
    /// Builder that looks every name and type up afresh.
    pub fn new(db: &'db Database) -> Self {
        Self::with_lookup(db, DbLookup)
    }

    /// Builder with bounded caches sized from the audit config.
    pub fn cached(db: &'db Database) -> Self {
        let audit = &db.config().audit;
        Self::with_lookup(
            db,
            CachedLookup::new(DbLookup, audit.entity_type_cache_size, audit.entity_name_cache_size),
        )
    }

    pub fn with_lookup(db: &'db Database, lookup: impl EntityLookup + 'db) -> Self {
        Self {
            db,
            lookup: Box::new(lookup),
        }
    }

    pub fn cache_stats(&self) -> Option<LookupStats> {
        self.lookup.stats()
    }

    fn describe(&mut self, entity_id: EntityId) -> Result<(Option<String>, Option<String>), CerebrumError> {
        let Some(entity_type) = self.lookup.entity_type(self.db, entity_id)? else {
            return Ok((None, None));
        };
        let entity_name = self.lookup.entity_name(self.db, entity_id, &entity_type)?;
        Ok((Some(entity_type), entity_name))
    }

    pub fn build(
        &mut self,
        subject: EntityId,
        change_type_id: i64,
        destination: Option<EntityId>,
        change_params: Value,
        change_by: EntityId,
        change_program: Option<&str>,
    ) -> Result<AuditRecord, CerebrumError> {
        let change_type = Constants::new(self.db).change_type_by_id(change_type_id)?;

        let (operator_type, operator_name) = self.describe(change_by)?;
        let (entity_type, entity_name) = self.describe(subject)?;
        let (target_type, target_name) = match destination {
            Some(target) => self.describe(target)?,
            None => (None, None),
        };

        let params = match change_params {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let params = self.db.callbacks().transform(self.db, &change_type, params);

        Ok(AuditRecord {
            change_type,
            operator: change_by,
            entity: subject,
            target: destination,
            metadata: AuditMetadata {
                change_program: change_program.map(str::to_string),
                operator_type,
                operator_name,
                entity_type,
                entity_name,
                target_type,
                target_name,
            },
            params,
        })
    }
}
