//! Audit log.
//!
//! Change-log events become [`record::AuditRecord`]s through the
//! [`builder::AuditRecordBuilder`], which resolves who/what each id refers to
//! and runs the parameter transforms from [`callbacks::CallbackRegistry`].
//! [`accessor::AuditLogAccessor`] stores and searches them.

pub mod accessor;
pub mod builder;
pub mod callbacks;
pub mod lookup;
pub mod record;

pub use accessor::{AuditLogAccessor, AuditSearch};
pub use builder::AuditRecordBuilder;
pub use callbacks::CallbackRegistry;
pub use record::{AuditMetadata, AuditRecord, DbAuditRecord};
