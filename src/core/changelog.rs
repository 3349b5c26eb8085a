//! In-memory change-log buffer.
//!
//! Entity mutations stage one [`ChangeEvent`] each. The buffer is flushed in
//! order through the audit builder and accessor when the owning connection
//! commits, and dropped when it rolls back.

use crate::core::audit::accessor::AuditLogAccessor;
use crate::core::audit::builder::AuditRecordBuilder;
use crate::core::constants::EntityId;
use crate::core::db::Database;
use crate::core::entity::name;
use crate::core::error::CerebrumError;
use serde::Serialize;
use serde_json::Value;

/// Look up the configured initial account by name.
pub fn initial_account(db: &Database) -> Result<EntityId, CerebrumError> {
    let config = db.config();
    let domain = config.namespace_for("account").ok_or_else(|| {
        CerebrumError::ConfigError("no name namespace configured for 'account'".to_string())
    })?;
    name::entity_id_by_name(db, domain, &config.initial_account_name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub subject: EntityId,
    pub change_type_id: i64,
    pub destination: Option<EntityId>,
    pub params: Value,
    pub change_by: EntityId,
    pub change_program: Option<String>,
}

#[derive(Debug, Default)]
pub struct ChangeLog {
    events: Vec<ChangeEvent>,
    default_change_by: Option<EntityId>,
    default_change_program: Option<String>,
    initial_account: Option<EntityId>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_defaults(&mut self, change_by: Option<EntityId>, change_program: Option<String>) {
        self.default_change_by = change_by;
        self.default_change_program = change_program;
    }

    /// Stage one change.
    ///
    /// At least one of `change_by` and `change_program` must be known, either
    /// passed here or set through [`ChangeLog::set_defaults`]. A change that
    /// only names a program is attributed to the configured initial account.
    #[allow(clippy::too_many_arguments)]
    pub fn log_change(
        &mut self,
        db: &Database,
        subject: EntityId,
        change_type_id: i64,
        destination: Option<EntityId>,
        change_params: Value,
        change_by: Option<EntityId>,
        change_program: Option<&str>,
    ) -> Result<(), CerebrumError> {
        let change_by = change_by.or(self.default_change_by);
        let change_program = change_program
            .map(str::to_string)
            .or_else(|| self.default_change_program.clone());

        let change_by = match (change_by, &change_program) {
            (Some(by), _) => by,
            (None, Some(_)) => self.fallback_operator(db)?,
            (None, None) => {
                return Err(CerebrumError::ValidationError(
                    "log_change() needs change_by or change_program".to_string(),
                ));
            }
        };

        let params = match change_params {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        self.events.push(ChangeEvent {
            subject,
            change_type_id,
            destination,
            params,
            change_by,
            change_program,
        });
        Ok(())
    }

    fn fallback_operator(&mut self, db: &Database) -> Result<EntityId, CerebrumError> {
        if let Some(id) = self.initial_account {
            return Ok(id);
        }
        let id = initial_account(db)?;
        self.initial_account = Some(id);
        Ok(id)
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Put back events that could not be written, ahead of anything staged since.
    pub fn restore(&mut self, mut unwritten: Vec<ChangeEvent>) {
        unwritten.append(&mut self.events);
        self.events = unwritten;
    }

    pub fn clear_log(&mut self) {
        self.events.clear();
    }

    /// Persist `events` in order. On failure the unwritten tail is handed back.
    pub fn write_events(
        db: &Database,
        events: Vec<ChangeEvent>,
    ) -> Result<usize, (Vec<ChangeEvent>, CerebrumError)> {
        let mut builder = AuditRecordBuilder::new(db);
        let accessor = AuditLogAccessor::new(db);
        let total = events.len();
        let mut iter = events.into_iter();
        let mut written = 0;
        while let Some(event) = iter.next() {
            let result = builder
                .build(
                    event.subject,
                    event.change_type_id,
                    event.destination,
                    event.params.clone(),
                    event.change_by,
                    event.change_program.as_deref(),
                )
                .and_then(|record| accessor.append(&record));
            if let Err(err) = result {
                tracing::warn!(
                    change_type_id = event.change_type_id,
                    subject = %event.subject,
                    error = %err,
                    "unable to write change log event"
                );
                let mut unwritten = vec![event];
                unwritten.extend(iter);
                return Err((unwritten, err));
            }
            written += 1;
        }
        tracing::debug!(written, total, "flushed change log");
        Ok(written)
    }
}
