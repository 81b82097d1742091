//! Per-request transport metadata, filled in by the native side before dispatch.

use std::collections::HashMap;
use std::collections::hash_map;

use tracing::debug;

use crate::native::RequestHandle;
use crate::registry::HandleRegistry;

/// CGI-style variables describing one request (`REQUEST_METHOD`, `PATH_INFO`, `HTTP_*`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later writes to the same key win.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.vars.insert(key.into(), value.into())
    }

    /// Insert raw bytes from the core, decoding them as (lossy) UTF-8.
    pub fn insert_raw(&mut self, key: &[u8], value: &[u8]) {
        let key = String::from_utf8_lossy(key).into_owned();
        let value = String::from_utf8_lossy(value).into_owned();
        self.vars.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get) but treats an empty value as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        for (key, value) in iter {
            env.insert(key, value);
        }
        env
    }
}

impl IntoIterator for Environment {
    type Item = (String, String);
    type IntoIter = hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

/// Environments waiting for dispatch, keyed by their request.
///
/// The reference handed back to the core is the request handle itself, so
/// nothing that points into Rust memory crosses the boundary.
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    pending: HandleRegistry<RequestHandle, Environment>,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty environment for `req` and return the reference the core uses for it.
    pub fn create(&self, req: RequestHandle) -> RequestHandle {
        if self.pending.retain(req, Environment::new()).is_some() {
            debug!(?req, "discarding stale environment for reused request handle");
        }
        req
    }

    /// Add one variable. Unknown references are ignored; returns whether it was stored.
    pub fn add(&self, env: RequestHandle, key: &[u8], value: &[u8]) -> bool {
        let stored = self.pending.with_mut(&env, |vars| vars.insert_raw(key, value));
        if stored.is_none() {
            debug!(?env, "ignoring variable for unknown environment");
        }
        stored.is_some()
    }

    /// Hand the environment over for dispatch, releasing the registry entry.
    pub fn take(&self, env: RequestHandle) -> Option<Environment> {
        self.pending.release(&env)
    }

    /// Drop an environment whose request will never be dispatched.
    pub fn discard(&self, env: RequestHandle) -> bool {
        self.pending.release(&env).is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
