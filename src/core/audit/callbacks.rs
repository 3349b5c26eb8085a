//! Change-type specific parameter transforms.
//!
//! Transforms are registered against a `(category, type)` pair of regular
//! expressions, each anchored to the whole string. Every matching transform
//! runs, in registration order, on the output of the previous one. A
//! transform returning `None` empties the params. Transforms cannot fail.

use crate::core::constants::ChangeType;
use crate::core::db::Database;
use crate::core::error::CerebrumError;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, LazyLock};

pub type ParamTransform = Arc<dyn Fn(&Database, &ChangeType, Value) -> Option<Value> + Send + Sync>;

pub const REDACTED: &str = "[REDACTED]";

/// Credentials embedded in free-text values.
static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)bearer\s+[a-zA-Z0-9_\-\.]{20,}").unwrap(),
            "[BEARER_REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(password|passwd|pwd)['"]?\s*[:=]\s*['"]?[^\s'"]{8,}['"]?"#)
                .unwrap(),
            "[PASSWORD_REDACTED]",
        ),
    ]
});

struct Entry {
    category: Regex,
    type_: Regex,
    transform: ParamTransform,
}

#[derive(Default)]
pub struct CallbackRegistry {
    entries: Vec<Entry>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|e| format!("{}:{}", e.category.as_str(), e.type_.as_str())),
            )
            .finish()
    }
}

fn anchored(pattern: &str) -> Result<Regex, CerebrumError> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| CerebrumError::ConfigError(format!("bad pattern '{}': {}", pattern, e)))
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry installed on every connection unless replaced.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        // Both patterns are literals known to compile.
        let _ = registry.register("account", "password", |_, _, params| Some(strip_password(params)));
        let _ = registry.register(".*", ".*", |_, _, params| Some(redact_sensitive(params)));
        registry
    }

    pub fn register<F>(&mut self, category: &str, type_: &str, transform: F) -> Result<(), CerebrumError>
    where
        F: Fn(&Database, &ChangeType, Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            category: anchored(category)?,
            type_: anchored(type_)?,
            transform: Arc::new(transform),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matching(&self, change_type: &ChangeType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.category.is_match(&change_type.category) && e.type_.is_match(&change_type.type_))
            .count()
    }

    pub fn transform(&self, db: &Database, change_type: &ChangeType, params: Value) -> Value {
        let mut current = params;
        for entry in &self.entries {
            if !(entry.category.is_match(&change_type.category)
                && entry.type_.is_match(&change_type.type_))
            {
                continue;
            }
            current = match (entry.transform)(db, change_type, current) {
                Some(value) => value,
                None => Value::Object(Map::new()),
            };
        }
        current
    }
}

/// Drop the plaintext `password` parameter.
pub fn strip_password(params: Value) -> Value {
    match params {
        Value::Object(mut map) => {
            map.remove("password");
            Value::Object(map)
        }
        other => other,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.contains("password") || lower.contains("secret") || lower.contains("token")
}

pub fn redact_string(input: &str) -> String {
    let mut result = input.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Recursively replace values stored under sensitive keys and scrub
/// credentials out of string values.
pub fn redact_sensitive(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_sensitive(val))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_sensitive).collect()),
        Value::String(s) => Value::String(redact_string(&s)),
        other => other,
    }
}
