//! Typed, guarded key/value registries (component K).
//!
//! Distinct from [`crate::config::Config`]: `Config` is the file-backed
//! process configuration loaded once at startup. A [`Registry`] is a live,
//! runtime-mutable store the rest of the core reads and writes through —
//! options, aliases, key bindings, per-JID crypto preferences — each with
//! an optional guard closure that runs before every write and may rewrite
//! or veto the value, the way `original_source/mcabber/mcabber/settings.c`'s
//! `settings_set_guard` does.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("write to {key:?} vetoed by guard")]
    VetoedByGuard { key: String },
    #[error("no such key: {0:?}")]
    NoSuchKey(String),
}

/// A guard inspects a proposed write and may substitute a different value,
/// or veto the write entirely by returning `None`.
pub type Guard = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// A single guarded string registry, e.g. "options" or "aliases".
#[derive(Default)]
pub struct Registry {
    values: HashMap<String, String>,
    guards: HashMap<String, Guard>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the guard for `key`. Matches
    /// `settings_set_guard`/`settings_del_guard` from the original: passing
    /// `None` removes any existing guard.
    pub fn set_guard(&mut self, key: impl Into<String>, guard: Option<Guard>) {
        let key = key.into();
        match guard {
            Some(guard) => {
                self.guards.insert(key, guard);
            }
            None => {
                self.guards.remove(&key);
            }
        }
    }

    /// Write `value` for `key`, running the guard (if any) first.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), SettingsError> {
        let key = key.into();
        let value = value.into();
        let final_value = match self.guards.get(&key) {
            Some(guard) => guard(&key, &value).ok_or_else(|| SettingsError::VetoedByGuard {
                key: key.clone(),
            })?,
            None => value,
        };
        self.values.insert(key, final_value);
        Ok(())
    }

    pub fn del(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn foreach<F: FnMut(&str, &str)>(&self, mut f: F) {
        for (k, v) in &self.values {
            f(k, v);
        }
    }
}

/// The four guarded registries the core and its collaborators read and
/// write at runtime.
#[derive(Default)]
pub struct SettingsStore {
    pub options: Registry,
    pub aliases: Registry,
    pub bindings: Registry,
    /// Per-bare-JID crypto preferences (OTR policy, PGP key id, etc), keyed
    /// `"<bare-jid>.<pref>"`.
    pub crypto_prefs: Registry,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}
