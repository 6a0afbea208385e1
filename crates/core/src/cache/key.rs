//! Typed cache keys: a route identifier plus a normalized parameter record.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use super::hash::compute_key_fingerprint;
use crate::Error;

/// Identifies one logical collection in the cache, e.g. the posts of a world.
///
/// Keys compare structurally: two keys are equal iff their routes match and
/// their parameters match after normalization. Normalization sorts object
/// keys at every depth and drops top-level `null` parameters, so
/// `{a: 1, b: null}` and `{a: 1}` name the same collection.
#[derive(Clone)]
pub struct CacheKey {
    route: String,
    params: BTreeMap<String, Value>,
    canonical: String,
}

impl CacheKey {
    /// Key for a route without parameters.
    pub fn new(route: impl Into<String>) -> Self {
        let mut key = Self { route: route.into(), params: BTreeMap::new(), canonical: String::new() };
        key.recompute();
        key
    }

    /// Build a key from a JSON object of parameters.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the route is empty or `params` is
    /// neither an object nor `null`.
    pub fn from_params(route: impl Into<String>, params: Value) -> Result<Self, Error> {
        let route = route.into();
        if route.trim().is_empty() {
            return Err(Error::InvalidInput("cache key route must not be empty".into()));
        }

        let mut key = Self::new(route);
        match params {
            Value::Null => {}
            Value::Object(map) => {
                for (name, value) in map {
                    if !value.is_null() {
                        key.params.insert(name, value);
                    }
                }
                key.recompute();
            }
            other => {
                return Err(Error::InvalidInput(format!("cache key params must be an object, got {other}")));
            }
        }
        Ok(key)
    }

    /// Add (or replace) a parameter. `null` removes it.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        if value.is_null() {
            self.params.remove(&name);
        } else {
            self.params.insert(name, value);
        }
        self.recompute();
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Parameter as a string, for path segments and ids.
    pub fn param_str(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Canonical JSON rendering of the parameters (sorted keys, no nulls).
    pub fn canonical_params(&self) -> &str {
        &self.canonical
    }

    /// Stable SHA-256 fingerprint, handy as a compact log field.
    pub fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.route, &self.canonical)
    }

    fn recompute(&mut self) {
        // serde_json's default map is ordered, so nested objects render with sorted keys too.
        self.canonical = Value::Object(self.params.clone().into_iter().collect()).to_string();
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.route == other.route && self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.route.hash(state);
        self.canonical.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() { write!(f, "{}", self.route) } else { write!(f, "{}{}", self.route, self.canonical) }
    }
}
