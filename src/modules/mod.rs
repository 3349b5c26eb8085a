//! Optional extensions layered on the entity core.

pub mod migrate;
pub mod sap;
