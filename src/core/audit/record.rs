use crate::core::constants::{ChangeType, EntityId};
use crate::core::error::CerebrumError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names and types resolved for the ids of a record at the time it was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditMetadata {
    pub change_program: Option<String>,
    pub operator_type: Option<String>,
    pub operator_name: Option<String>,
    pub entity_type: Option<String>,
    pub entity_name: Option<String>,
    pub target_type: Option<String>,
    pub target_name: Option<String>,
}

/// An audit record that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub change_type: ChangeType,
    pub operator: EntityId,
    pub entity: EntityId,
    pub target: Option<EntityId>,
    pub metadata: AuditMetadata,
    pub params: Value,
}

impl AuditRecord {
    pub fn to_json(&self) -> Result<Value, CerebrumError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> Result<Self, CerebrumError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A stored audit record. `record_id` and `timestamp` come from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbAuditRecord {
    pub record_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub record: AuditRecord,
}

impl DbAuditRecord {
    pub fn new(record_id: i64, timestamp: DateTime<Utc>, record: AuditRecord) -> Self {
        Self {
            record_id,
            timestamp,
            record,
        }
    }

    pub fn to_json(&self) -> Result<Value, CerebrumError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> Result<Self, CerebrumError> {
        for field in ["record_id", "timestamp"] {
            if value.get(field).is_none_or(Value::is_null) {
                return Err(CerebrumError::ValidationError(format!(
                    "stored audit record without {}",
                    field
                )));
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}
