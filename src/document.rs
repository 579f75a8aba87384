//! Documents: self-describing field/value records
//!
//! Fields are addressed by name or by dotted path (`productos.productoId`,
//! `tags.0`). Traversing an array of sub-documents fans out over its elements.

use crate::error::{DbError, Result};
use crate::types::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the primary-key field
pub const ID_FIELD: &str = "_id";

/// Build a [`Document`] from `key => value` pairs
///
/// ```
/// use tienda_core::doc;
///
/// let producto = doc! {
///     "_id" => 11,
///     "nombre" => "Chocolatina de borojó",
///     "tags" => vec!["dulce", "energía"],
/// };
/// assert_eq!(producto.len(), 3);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut document = $crate::Document::new();
        $( document.insert($key, $value); )+
        document
    }};
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Document {
            fields: BTreeMap::new(),
        }
    }

    /// Set a top-level field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The document's `_id`, if set
    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD)
    }

    /// Look up a dotted path without fanning out over arrays
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;

        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// All values reachable through a dotted path, fanning out over arrays
    /// of sub-documents. Leaf arrays are returned whole.
    pub fn resolve_path(&self, path: &str) -> Vec<&Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut out = Vec::new();

        if let Some(first) = self.fields.get(segments[0]) {
            collect_path(first, &segments[1..], &mut out);
        }
        out
    }

    /// Value of a dotted path as seen by expressions: traversing an array of
    /// sub-documents yields an array of the addressed values
    pub fn path_value(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let first = self.fields.get(segments[0])?;
        extract_path(first, &segments[1..])
    }

    /// Mutable access to a dotted path
    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get_mut(segments.next()?)?;

        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.fields.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a dotted path, creating intermediate sub-documents
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let (parent_path, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, path),
        };

        let parent = match parent_path {
            None => {
                self.fields.insert(leaf.to_string(), value);
                return Ok(());
            }
            Some(parent_path) => self.ensure_document_path(parent_path)?,
        };

        match parent {
            Value::Document(doc) => {
                doc.fields.insert(leaf.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let index = leaf.parse::<usize>().map_err(|_| {
                    DbError::InvalidUpdate(format!("cannot create field '{}' in an array", leaf))
                })?;
                while items.len() <= index {
                    items.push(Value::Null);
                }
                items[index] = value;
                Ok(())
            }
            other => Err(DbError::type_mismatch(path, "object", other)),
        }
    }

    /// Remove a dotted path, returning the removed value
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        match path.rsplit_once('.') {
            None => self.fields.remove(path),
            Some((parent, leaf)) => match self.get_path_mut(parent)? {
                Value::Document(doc) => doc.fields.remove(leaf),
                Value::Array(items) => {
                    let index = leaf.parse::<usize>().ok()?;
                    items.get_mut(index).map(|slot| std::mem::replace(slot, Value::Null))
                }
                _ => None,
            },
        }
    }

    fn ensure_document_path(&mut self, path: &str) -> Result<&mut Value> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or(path);
        let mut current = self
            .fields
            .entry(first.to_string())
            .or_insert_with(|| Value::Document(Document::new()));

        for segment in segments {
            current = match current {
                Value::Document(doc) => doc
                    .fields
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Document(Document::new())),
                Value::Array(items) => {
                    let index = segment.parse::<usize>().map_err(|_| {
                        DbError::InvalidUpdate(format!("cannot create field '{}' in an array", segment))
                    })?;
                    items
                        .get_mut(index)
                        .ok_or_else(|| DbError::InvalidUpdate(format!("array index {} out of range", index)))?
                }
                other => return Err(DbError::type_mismatch(path, "object", other)),
            };
        }
        Ok(current)
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| DbError::type_mismatch(key, "string", value))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        match value {
            Value::Int(v) => Ok(*v),
            Value::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            other => Err(DbError::type_mismatch(key, "int", other)),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        let value = self.require(key)?;
        value.as_f64().ok_or_else(|| DbError::type_mismatch(key, "number", value))
    }

    pub fn get_datetime(&self, key: &str) -> Result<DateTime<Utc>> {
        let value = self.require(key)?;
        value
            .as_datetime()
            .copied()
            .ok_or_else(|| DbError::type_mismatch(key, "date", value))
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<Value>> {
        let value = self.require(key)?;
        value.as_array().ok_or_else(|| DbError::type_mismatch(key, "array", value))
    }

    pub fn get_document(&self, key: &str) -> Result<&Document> {
        let value = self.require(key)?;
        value.as_document().ok_or_else(|| DbError::type_mismatch(key, "object", value))
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.get_path(key)
            .ok_or_else(|| DbError::NotFound(format!("field '{}'", key)))
    }

    /// Build a document from a JSON object
    pub fn from_json(json: serde_json::Value) -> Result<Document> {
        match json {
            serde_json::Value::Object(map) => Document::from_json_map(map),
            other => Err(DbError::InvalidQuery(format!("expected a JSON object, got {}", other))),
        }
    }

    pub(crate) fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Document> {
        let mut document = Document::new();
        for (key, value) in map {
            document.fields.insert(key, Value::from_json(value)?);
        }
        Ok(document)
    }

    /// Render as extended JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

fn collect_path<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Document(doc) => {
            if let Some(child) = doc.get(segment) {
                collect_path(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect_path(item, rest, out);
                }
            }
            for item in items {
                if matches!(item, Value::Document(_)) {
                    collect_path(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

fn extract_path(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Document(doc) => extract_path(doc.get(segment)?, rest),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| matches!(item, Value::Document(_)))
                .filter_map(|item| extract_path(item, segments))
                .collect(),
        )),
        _ => None,
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document {
            fields: iter.into_iter().collect(),
        }
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = DbError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        Document::from_json(json)
    }
}
