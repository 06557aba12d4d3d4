//! Environment composition for child processes.
//!
//! Each child receives exactly one [`EnvironmentSet`], built by layering the
//! parent's environment, the optional `.env` overrides and the per-run
//! computed values, lowest precedence first. Names and values are kept as
//! `OsString` so that nothing from the parent is lost on the way to a child.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};

/// Insertion-ordered set of environment variables with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
    entries: Vec<(OsString, OsString)>,
    index: HashMap<OsString, usize>,
}

impl EnvironmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment, byte for byte.
    pub fn from_process() -> Self {
        std::env::vars_os().collect()
    }

    /// Sets `key`, replacing an existing value in place.
    pub fn insert(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&idx) => self.entries[idx].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Value of `key`, if set and valid UTF-8.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_os(key).and_then(OsStr::to_str)
    }

    pub fn get_os(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.index
            .get(key.as_ref())
            .map(|&idx| self.entries[idx].1.as_os_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for EnvironmentSet
where
    K: Into<OsString>,
    V: Into<OsString>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = EnvironmentSet::new();
        set.extend(iter);
        set
    }
}

impl<K, V> Extend<(K, V)> for EnvironmentSet
where
    K: Into<OsString>,
    V: Into<OsString>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

/// Merges `base < overrides < extra`.
///
/// The result holds the union of all keys; on conflict the highest
/// precedence source wins. Nothing is ever removed.
pub fn compose<K, V>(
    base: &EnvironmentSet,
    overrides: Option<&EnvironmentSet>,
    extra: impl IntoIterator<Item = (K, V)>,
) -> EnvironmentSet
where
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut merged = base.clone();
    if let Some(overrides) = overrides {
        merged.extend(overrides.iter());
    }
    merged.extend(extra);
    merged
}
