//! Cerebrum: change-tracking entities backed by SQLite, with an audit log.
//!
//! # Architecture
//!
//! - [`core::entity::Entity`] is the base record. Optional behaviour
//!   (contact info, addresses, external ids, quarantines, SAP data) plugs in as
//!   capabilities that stage facts with `populate_*` and reconcile them
//!   against stored rows in `write_db()`.
//! - Every mutation stages a change event on the owning
//!   [`core::db::Database`]. `commit()` turns the buffered events into audit
//!   records; `rollback()` drops them.
//! - [`core::audit`] builds, transforms and stores those records, and
//!   answers searches over them.
//! - [`modules::migrate`] replays the legacy change log into the audit log on
//!   a worker pool.

pub mod core;
pub mod modules;
