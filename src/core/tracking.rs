//! Per-field dirty tracking.
//!
//! Every entity-like type declares its fields once, in a table of
//! `(field, class)` pairs, and routes assignments to write-tracked fields
//! through a [`ChangeTracker`]. The tracker is what `write_db()` consults to
//! decide whether there is anything to write.

use crate::core::error::CerebrumError;
use std::collections::BTreeSet;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Set by `find()` or internal bookkeeping only.
    ReadOnly,
    /// Settable through `populate()`/setters; assignment marks the object dirty.
    WriteTracked,
    /// Survives `clear()`.
    NeverCleared,
}

pub trait TrackedFields: Copy + Ord + Debug + 'static {
    fn declarations() -> &'static [(Self, FieldClass)];

    fn class(self) -> Option<FieldClass> {
        Self::declarations()
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, class)| *class)
    }

    fn write_tracked() -> Vec<Self> {
        Self::declarations()
            .iter()
            .filter(|(_, class)| *class == FieldClass::WriteTracked)
            .map(|(field, _)| *field)
            .collect()
    }
}

/// Checks that every field is declared exactly once.
pub fn validate_declarations<F: TrackedFields>() -> Result<(), CerebrumError> {
    let mut seen = BTreeSet::new();
    for (field, _) in F::declarations() {
        if !seen.insert(*field) {
            return Err(CerebrumError::ProgrammingError(format!(
                "field {:?} declared more than once",
                field
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTracker<F: TrackedFields> {
    changed: BTreeSet<F>,
}

impl<F: TrackedFields> Default for ChangeTracker<F> {
    fn default() -> Self {
        Self {
            changed: BTreeSet::new(),
        }
    }
}

impl<F: TrackedFields> ChangeTracker<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, field: F) -> Result<(), CerebrumError> {
        match field.class() {
            Some(FieldClass::WriteTracked) => {
                self.changed.insert(field);
                Ok(())
            }
            other => Err(CerebrumError::ProgrammingError(format!(
                "field {:?} is not write-tracked ({:?})",
                field, other
            ))),
        }
    }

    /// Assign `value` to `slot` and mark `field` dirty.
    pub fn set<T>(&mut self, field: F, slot: &mut T, value: T) -> Result<(), CerebrumError> {
        self.mark(field)?;
        *slot = value;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn is_changed(&self, field: F) -> bool {
        self.changed.contains(&field)
    }

    pub fn changed(&self) -> impl Iterator<Item = F> + '_ {
        self.changed.iter().copied()
    }

    pub fn reset(&mut self) {
        self.changed.clear();
    }
}
