//! Environment mapping for batch scripts
//!
//! Precedence for defaulted variables is: values already in the mapping
//! (the caller's), then the host environment snapshot, then the literal
//! default.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Separator for search-path variables
pub const PATH_SEPARATOR: char = ':';

/// Snapshot of the host process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Environment variables exported by a batch script (unique keys)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BatchEnvironment {
    vars: BTreeMap<String, String>,
}

impl BatchEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.vars.insert(key.into(), value.to_string());
    }

    /// Get a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether the key is present
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set `key` unless present, preferring the snapshot value over `default`
    pub fn set_if_absent(&mut self, key: &str, default: impl ToString, snapshot: &EnvSnapshot) {
        if self.vars.contains_key(key) {
            return;
        }
        let value = snapshot
            .get(key)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string());
        self.vars.insert(key.to_string(), value);
    }

    /// Prepend a segment to a search-path variable
    ///
    /// An absent key is based on the inherited snapshot value; when that is
    /// missing or empty the result is the prefix alone.
    pub fn prepend_path(&mut self, key: &str, prefix: &str, snapshot: &EnvSnapshot) {
        let base = match self.vars.get(key) {
            Some(existing) => Some(existing.clone()),
            None => snapshot.get(key).map(str::to_string),
        };
        let value = match base {
            Some(base) if !base.is_empty() => format!("{}{}{}", prefix, PATH_SEPARATOR, base),
            _ => prefix.to_string(),
        };
        self.vars.insert(key.to_string(), value);
    }

    /// Merge another environment on top of this one (other wins)
    pub fn extend(&mut self, other: BatchEnvironment) {
        self.vars.extend(other.vars);
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for BatchEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        }
    }
}
