//! Case-insensitive document metadata with deferred values
//!
//! A [`Metadata`] snapshot is immutable and cheap to clone. Keys keep the
//! spelling they were inserted with but are matched through [`fold_key`], so
//! `"Title"` and `"title"` name the same entry. A value may be a
//! [`DeferredValue`], which is resolved against the owning snapshot every time
//! it is read.

use crate::config::DEFAULT_RESOLUTION_LIMIT;
use crate::document::Document;
use crate::error::{DocflowError, DocflowResult};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Normalize a metadata key for comparison
///
/// Uses Unicode lowercase mapping, independent of any locale.
pub fn fold_key(key: &str) -> String {
    key.to_lowercase()
}

/// A value computed on access from the metadata that holds it
pub trait DeferredValue: Send + Sync {
    fn resolve(&self, metadata: &Metadata) -> DocflowResult<MetaValue>;
}

impl<F> DeferredValue for F
where
    F: Fn(&Metadata) -> DocflowResult<MetaValue> + Send + Sync,
{
    fn resolve(&self, metadata: &Metadata) -> DocflowResult<MetaValue> {
        self(metadata)
    }
}

/// A stored metadata value
#[derive(Clone)]
pub enum MetaValue {
    Json(Value),
    Documents(Vec<Document>),
    Deferred(Arc<dyn DeferredValue>),
}

impl MetaValue {
    /// Wrap a closure as a deferred value
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(&Metadata) -> DocflowResult<MetaValue> + Send + Sync + 'static,
    {
        MetaValue::Deferred(Arc::new(f))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, MetaValue::Deferred(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            MetaValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(Value::as_bool)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    pub fn as_documents(&self) -> Option<&[Document]> {
        match self {
            MetaValue::Documents(documents) => Some(documents),
            _ => None,
        }
    }
}

impl fmt::Debug for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Json(value) => write!(f, "{}", value),
            MetaValue::Documents(documents) => {
                f.debug_list().entries(documents.iter().map(|d| d.id())).finish()
            }
            MetaValue::Deferred(_) => f.write_str("<deferred>"),
        }
    }
}

impl PartialEq for MetaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MetaValue::Json(a), MetaValue::Json(b)) => a == b,
            (MetaValue::Documents(a), MetaValue::Documents(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id() == y.id())
            }
            (MetaValue::Deferred(a), MetaValue::Deferred(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for MetaValue {
    fn from(value: Value) -> Self {
        MetaValue::Json(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Json(Value::String(value))
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Json(Value::Bool(value))
    }
}

impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        MetaValue::Json(Value::from(value))
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Json(Value::from(value))
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Json(Value::from(value))
    }
}

impl From<Vec<Document>> for MetaValue {
    fn from(value: Vec<Document>) -> Self {
        MetaValue::Documents(value)
    }
}

struct Entry {
    key: String,
    value: MetaValue,
}

struct MetadataInner {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

/// Immutable, ordered, case-insensitive metadata snapshot
#[derive(Clone)]
pub struct Metadata {
    inner: Arc<MetadataInner>,
    resolution_limit: usize,
    /// Deferred steps already taken by enclosing lookups
    depth: usize,
}

impl Metadata {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetadataInner {
                entries: Vec::new(),
                index: HashMap::new(),
            }),
            resolution_limit: DEFAULT_RESOLUTION_LIMIT,
            depth: 0,
        }
    }

    /// Build a snapshot from pairs; later keys replace earlier ones that fold equal
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetaValue>,
    {
        Self::new().clone_with(pairs)
    }

    /// Same entries with a different deferred resolution limit
    pub fn with_resolution_limit(mut self, limit: usize) -> Self {
        self.resolution_limit = limit.max(1);
        self
    }

    pub fn resolution_limit(&self) -> usize {
        self.resolution_limit
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.index.contains_key(&fold_key(key))
    }

    /// Keys in insertion order, as originally spelled
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.entries.iter().map(|e| e.key.as_str())
    }

    /// Raw entries in insertion order; deferred values are not resolved
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.inner.entries.iter().map(|e| (e.key.as_str(), &e.value))
    }

    /// Stored value without deferred resolution
    pub fn get_raw(&self, key: &str) -> Option<&MetaValue> {
        self.inner
            .index
            .get(&fold_key(key))
            .map(|&i| &self.inner.entries[i].value)
    }

    /// Look up a key and resolve any deferred chain
    pub fn get(&self, key: &str) -> DocflowResult<Option<MetaValue>> {
        match self.get_raw(key) {
            Some(raw) => self.resolve(key, raw.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Look up a key that must be present
    pub fn get_required(&self, key: &str) -> DocflowResult<MetaValue> {
        self.get(key)?
            .ok_or_else(|| DocflowError::MissingMetadata(key.to_string()))
    }

    pub fn get_string(&self, key: &str) -> DocflowResult<String> {
        match self.get_required(key)? {
            MetaValue::Json(Value::String(s)) => Ok(s),
            _ => Err(type_error(key, "string")),
        }
    }

    pub fn get_bool(&self, key: &str) -> DocflowResult<bool> {
        self.get_required(key)?
            .as_bool()
            .ok_or_else(|| type_error(key, "boolean"))
    }

    pub fn get_i64(&self, key: &str) -> DocflowResult<i64> {
        self.get_required(key)?
            .as_i64()
            .ok_or_else(|| type_error(key, "integer"))
    }

    pub fn get_f64(&self, key: &str) -> DocflowResult<f64> {
        self.get_required(key)?
            .as_f64()
            .ok_or_else(|| type_error(key, "number"))
    }

    pub fn get_documents(&self, key: &str) -> DocflowResult<Vec<Document>> {
        match self.get_required(key)? {
            MetaValue::Documents(documents) => Ok(documents),
            _ => Err(type_error(key, "document list")),
        }
    }

    /// Every entry with deferred values resolved, in insertion order
    pub fn resolved(&self) -> DocflowResult<Vec<(String, MetaValue)>> {
        self.inner
            .entries
            .iter()
            .map(|e| Ok((e.key.clone(), self.resolve(&e.key, e.value.clone())?)))
            .collect()
    }

    /// New snapshot with `overrides` applied last-wins
    pub fn clone_with<I, K, V>(&self, overrides: I) -> Metadata
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetaValue>,
    {
        let mut entries: Vec<Entry> = self
            .inner
            .entries
            .iter()
            .map(|e| Entry {
                key: e.key.clone(),
                value: e.value.clone(),
            })
            .collect();
        let mut index = self.inner.index.clone();

        for (key, value) in overrides {
            let key = key.into();
            let value = value.into();
            match index.get(&fold_key(&key)) {
                Some(&i) => entries[i] = Entry { key, value },
                None => {
                    index.insert(fold_key(&key), entries.len());
                    entries.push(Entry { key, value });
                }
            }
        }

        Metadata {
            inner: Arc::new(MetadataInner { entries, index }),
            resolution_limit: self.resolution_limit,
            depth: 0,
        }
    }

    /// Snapshot restricted to the given keys that are present
    pub fn subset(&self, keys: &[&str]) -> Metadata {
        let pairs: Vec<(String, MetaValue)> = self
            .iter()
            .filter(|(key, _)| {
                let folded = fold_key(key);
                keys.iter().any(|k| fold_key(k) == folded)
            })
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        Metadata::new()
            .with_resolution_limit(self.resolution_limit)
            .clone_with(pairs)
    }

    /// Follow a deferred chain, counting steps taken by nested lookups too
    ///
    /// Each deferred value resolves against a view of this snapshot that
    /// carries the depth reached so far, so a `get` inside a deferred value
    /// continues the count instead of restarting it.
    fn resolve(&self, key: &str, mut value: MetaValue) -> DocflowResult<MetaValue> {
        let mut depth = self.depth;
        while let MetaValue::Deferred(deferred) = value {
            if depth >= self.resolution_limit {
                return Err(DocflowError::MetadataResolution {
                    key: key.to_string(),
                    limit: self.resolution_limit,
                });
            }
            depth += 1;
            let view = Metadata {
                inner: Arc::clone(&self.inner),
                resolution_limit: self.resolution_limit,
                depth,
            };
            value = deferred.resolve(&view)?;
        }
        Ok(value)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

fn type_error(key: &str, expected: &'static str) -> DocflowError {
    DocflowError::MetadataType {
        key: key.to_string(),
        expected,
    }
}
