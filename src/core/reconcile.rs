//! Multi-valued attribute reconciliation.
//!
//! Turns "the persisted rows for one (entity, source system)" plus "the rows
//! the caller now wants" into the minimal set of insert/update/delete calls.
//! Contact info, addresses, quarantines and the SAP records all run through
//! [`reconcile`]; each supplies its own key, equality and SQL through a
//! [`ReconcileTarget`].

use crate::core::error::CerebrumError;
use std::collections::BTreeMap;
use std::fmt::Debug;

pub trait ReconcileTarget {
    type Key: Ord + Clone + Debug;
    type Value: Clone + Debug;

    fn key_of(&self, value: &Self::Value) -> Self::Key;

    /// Field-by-field value equality; `None` fields compare equal to `None`.
    fn equals(&self, persisted: &Self::Value, desired: &Self::Value) -> bool;

    fn insert(&mut self, key: &Self::Key, value: &Self::Value) -> Result<(), CerebrumError>;

    fn update(
        &mut self,
        key: &Self::Key,
        persisted: &Self::Value,
        desired: &Self::Value,
    ) -> Result<(), CerebrumError>;

    fn delete(&mut self, key: &Self::Key, persisted: &Self::Value) -> Result<(), CerebrumError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ReconcileSummary {
    /// Whether any database operation was issued.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0
    }
}

/// Make the persisted set equal to `desired`.
///
/// `current` is what is stored now. If it holds two rows with the same key
/// the later one wins; callers are expected to keep keys unique.
pub fn reconcile<T: ReconcileTarget>(
    target: &mut T,
    current: Vec<T::Value>,
    desired: &BTreeMap<T::Key, T::Value>,
) -> Result<ReconcileSummary, CerebrumError> {
    let mut old_state: BTreeMap<T::Key, T::Value> = current
        .into_iter()
        .map(|value| (target.key_of(&value), value))
        .collect();

    let mut summary = ReconcileSummary::default();
    for (key, new_value) in desired {
        match old_state.remove(key) {
            Some(old_value) => {
                if target.equals(&old_value, new_value) {
                    summary.unchanged += 1;
                } else {
                    target.update(key, &old_value, new_value)?;
                    summary.updated += 1;
                }
            }
            None => {
                target.insert(key, new_value)?;
                summary.inserted += 1;
            }
        }
    }
    for (key, old_value) in &old_state {
        target.delete(key, old_value)?;
        summary.deleted += 1;
    }
    Ok(summary)
}
