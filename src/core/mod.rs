//! Entity core, change log and audit pipeline.
//!
//! Everything that touches the database goes through [`db::Database`]; the
//! entity layer stages changes there and the audit modules turn them into
//! records on commit.

pub mod audit;
pub mod changelog;
pub mod config;
pub mod constants;
pub mod db;
pub mod entity;
pub mod error;
pub mod pool;
pub mod reconcile;
pub mod schemas;
pub mod time;
pub mod tracking;
