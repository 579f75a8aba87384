//! Secondary indexes
//!
//! Ordered (B-tree) indexes over one or more document fields, with optional
//! uniqueness. Single-field indexes over arrays are multikey: one entry per
//! element. Missing fields are indexed as null.

use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::types::{compare_floats, compare_int_float, ObjectId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Index key - orderable image of a [`Value`], usable as a BTreeMap key.
///
/// Variant order matches the cross-type sort order of values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    Null,
    Number(NumberKey),
    String(String),
    Document(Vec<(String, IndexKey)>),
    Array(Vec<IndexKey>),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

/// Numeric key. Integers keep their exact value; integers and floats mix
/// in numeric order, so 5 and 5.0 are the same key.
#[derive(Debug, Clone, Copy)]
pub enum NumberKey {
    Int(i64),
    Float(f64),
}

impl PartialEq for NumberKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for NumberKey {}

impl PartialOrd for NumberKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumberKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (*self, *other) {
            (NumberKey::Int(a), NumberKey::Int(b)) => a.cmp(&b),
            (NumberKey::Int(a), NumberKey::Float(b)) => compare_int_float(a, b),
            (NumberKey::Float(a), NumberKey::Int(b)) => compare_int_float(b, a).reverse(),
            (NumberKey::Float(a), NumberKey::Float(b)) => compare_floats(a, b),
        }
    }
}

impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Int(i) => IndexKey::Number(NumberKey::Int(*i)),
            Value::Float(f) => IndexKey::Number(NumberKey::Float(*f)),
            Value::String(s) => IndexKey::String(s.clone()),
            Value::DateTime(d) => IndexKey::DateTime(*d),
            Value::ObjectId(oid) => IndexKey::ObjectId(*oid),
            Value::Array(items) => IndexKey::Array(items.iter().map(IndexKey::from).collect()),
            Value::Document(doc) => IndexKey::Document(
                doc.iter()
                    .map(|(k, v)| (k.clone(), IndexKey::from(v)))
                    .collect(),
            ),
        }
    }
}

impl IndexKey {
    /// Type class, used to keep range scans within one type
    pub fn class(&self) -> u8 {
        match self {
            IndexKey::Null => 0,
            IndexKey::Number(_) => 1,
            IndexKey::String(_) => 2,
            IndexKey::Document(_) => 3,
            IndexKey::Array(_) => 4,
            IndexKey::ObjectId(_) => 5,
            IndexKey::Bool(_) => 6,
            IndexKey::DateTime(_) => 7,
        }
    }
}

/// Key direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Index specification, as passed to `create_index`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexModel {
    pub keys: Vec<(String, SortOrder)>,
    pub unique: bool,
    pub name: Option<String>,
}

impl IndexModel {
    pub fn new() -> Self {
        IndexModel {
            keys: Vec::new(),
            unique: false,
            name: None,
        }
    }

    /// Ascending index over the given fields, in order
    pub fn ascending<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndexModel {
            keys: fields
                .into_iter()
                .map(|f| (f.into(), SortOrder::Ascending))
                .collect(),
            unique: false,
            name: None,
        }
    }

    pub fn key(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push((field.into(), order));
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name derived from the key pattern: `categoria_1_precio_1`
    pub fn default_name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| format!("{}_{}", field, order.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.default_name())
    }

    /// Key pattern as a document, e.g. `{categoria: 1, precio: 1}`
    pub fn key_pattern(&self) -> Document {
        let mut pattern = Document::new();
        for (field, order) in &self.keys {
            pattern.insert(field.clone(), order.as_i32());
        }
        pattern
    }
}

impl Default for IndexModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of scanning an index
#[derive(Debug, Clone, Default)]
pub struct IndexScan {
    /// Primary keys of matching documents (may repeat for multikey indexes)
    pub ids: Vec<IndexKey>,
    pub keys_examined: usize,
}

/// B-tree index for fast lookups
#[derive(Debug, Clone)]
pub struct Index {
    pub model: IndexModel,
    /// Index name
    pub name: String,
    /// Mapping from key tuple to the `_id` keys of the documents holding it
    tree: BTreeMap<Vec<IndexKey>, Vec<IndexKey>>,
    multikey: bool,
}

impl Index {
    /// Create a new empty index
    pub fn new(model: IndexModel) -> Self {
        let name = model.resolved_name();
        Index {
            model,
            name,
            tree: BTreeMap::new(),
            multikey: false,
        }
    }

    /// The implicit unique index on `_id`
    pub fn primary() -> Self {
        Index::new(
            IndexModel::ascending([ID_FIELD])
                .unique(true)
                .name("_id_"),
        )
    }

    pub fn is_unique(&self) -> bool {
        self.model.unique
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    /// Leading field of the key pattern
    pub fn leading_field(&self) -> Option<&str> {
        self.model.keys.first().map(|(field, _)| field.as_str())
    }

    /// All key tuples a document contributes to this index
    fn keys_for(&self, doc: &Document) -> (Vec<Vec<IndexKey>>, bool) {
        let mut tuples: Vec<Vec<IndexKey>> = vec![Vec::new()];
        let mut multikey = false;

        for (field, _) in &self.model.keys {
            let values = doc.resolve_path(field);
            // Fan-out through an array of sub-documents yields several values
            multikey |= values.len() > 1;

            let mut parts = Vec::new();
            for value in values {
                match value {
                    Value::Array(items) if !items.is_empty() => {
                        multikey = true;
                        parts.extend(items.iter().map(IndexKey::from));
                    }
                    other => parts.push(IndexKey::from(other)),
                }
            }
            if parts.is_empty() {
                parts.push(IndexKey::Null);
            }
            parts.sort();
            parts.dedup();

            tuples = tuples
                .into_iter()
                .flat_map(|prefix| {
                    parts.iter().map(move |part| {
                        let mut tuple = prefix.clone();
                        tuple.push(part.clone());
                        tuple
                    })
                })
                .collect();
        }

        (tuples, multikey)
    }

    /// Check that inserting `doc` under `doc_id` would not violate uniqueness
    pub fn check_unique(&self, collection: &str, doc_id: &IndexKey, doc: &Document) -> Result<()> {
        if !self.model.unique {
            return Ok(());
        }

        let (tuples, _) = self.keys_for(doc);
        for tuple in tuples {
            if let Some(ids) = self.tree.get(&tuple) {
                if ids.iter().any(|id| id != doc_id) {
                    return Err(DbError::DuplicateKey {
                        collection: collection.to_string(),
                        index: self.name.clone(),
                        key: self.describe_key(doc),
                    });
                }
            }
        }
        Ok(())
    }

    /// Insert a document's keys into the index
    pub fn insert(&mut self, doc_id: &IndexKey, doc: &Document) {
        let (tuples, multikey) = self.keys_for(doc);
        self.multikey |= multikey;

        for tuple in tuples {
            self.tree
                .entry(tuple)
                .or_insert_with(Vec::new)
                .push(doc_id.clone());
        }
    }

    /// Remove a document's keys from the index
    pub fn remove(&mut self, doc_id: &IndexKey, doc: &Document) {
        let (tuples, _) = self.keys_for(doc);

        for tuple in tuples {
            if let Some(ids) = self.tree.get_mut(&tuple) {
                ids.retain(|id| id != doc_id);
                if ids.is_empty() {
                    self.tree.remove(&tuple);
                }
            }
        }
    }

    /// Scan entries whose leading key lies within the bounds. Both bounds,
    /// when present, must be of the same type class; entries of other
    /// classes are never returned.
    pub fn scan(&self, lower: Bound<&IndexKey>, upper: Bound<&IndexKey>) -> IndexScan {
        let class = match (&lower, &upper) {
            (Bound::Included(k) | Bound::Excluded(k), _) => k.class(),
            (_, Bound::Included(k) | Bound::Excluded(k)) => k.class(),
            _ => return self.full_scan(),
        };

        let start = match lower {
            Bound::Included(k) | Bound::Excluded(k) => Bound::Included(vec![k.clone()]),
            Bound::Unbounded => Bound::Unbounded,
        };

        let mut scan = IndexScan::default();
        for (tuple, ids) in self.tree.range((start, Bound::Unbounded)) {
            let Some(first) = tuple.first() else { continue };
            if first.class() < class {
                continue;
            }
            if first.class() > class {
                break;
            }
            match upper {
                Bound::Included(k) if first > k => break,
                Bound::Excluded(k) if first >= k => break,
                _ => {}
            }
            scan.keys_examined += 1;

            if let Bound::Excluded(k) = lower {
                if first == k {
                    continue;
                }
            }
            scan.ids.extend(ids.iter().cloned());
        }
        scan
    }

    /// Every entry in key order
    pub fn full_scan(&self) -> IndexScan {
        let mut scan = IndexScan::default();
        for ids in self.tree.values() {
            scan.keys_examined += 1;
            scan.ids.extend(ids.iter().cloned());
        }
        scan
    }

    /// Get index size (number of unique keys)
    pub fn size(&self) -> usize {
        self.tree.len()
    }

    /// Get total number of indexed entries
    pub fn total_entries(&self) -> usize {
        self.tree.values().map(|v| v.len()).sum()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            name: self.name.clone(),
            key_pattern: self.model.key_pattern(),
            unique: self.model.unique,
            multikey: self.multikey,
            size: self.size(),
            total_entries: self.total_entries(),
        }
    }

    fn describe_key(&self, doc: &Document) -> String {
        let parts: Vec<String> = self
            .model
            .keys
            .iter()
            .map(|(field, _)| {
                let value = doc.get_path(field).cloned().unwrap_or(Value::Null);
                format!("{}: {}", field, value)
            })
            .collect();
        format!("{{ {} }}", parts.join(", "))
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub key_pattern: Document,
    pub unique: bool,
    pub multikey: bool,
    pub size: usize,
    pub total_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn key(value: impl Into<Value>) -> IndexKey {
        IndexKey::from(&value.into())
    }

    #[test]
    fn test_btree_index_insert_lookup() {
        let mut index = Index::new(IndexModel::ascending(["stock"]));

        index.insert(&key(1), &doc! { "_id" => 1, "stock" => 30 });
        index.insert(&key(2), &doc! { "_id" => 2, "stock" => 25 });
        index.insert(&key(3), &doc! { "_id" => 3, "stock" => 30 });

        let k = key(30);
        let result = index.scan(Bound::Included(&k), Bound::Included(&k));
        assert_eq!(result.ids, vec![key(1), key(3)]);
        assert_eq!(result.keys_examined, 1);
    }

    #[test]
    fn test_unique_index() {
        let mut index = Index::new(IndexModel::ascending(["email"]).unique(true));
        let first = doc! { "_id" => 1, "email" => "ana@email.com" };
        index.check_unique("clientes", &key(1), &first).unwrap();
        index.insert(&key(1), &first);

        let duplicate = doc! { "_id" => 2, "email" => "ana@email.com" };
        let err = index.check_unique("clientes", &key(2), &duplicate).unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey { ref index, .. } if index == "email_1"));

        // Re-checking the same document is not a violation
        index.check_unique("clientes", &key(1), &first).unwrap();
    }

    #[test]
    fn test_range_scan_stays_in_type() {
        let mut index = Index::new(IndexModel::ascending(["stock"]));
        index.insert(&key(1), &doc! { "_id" => 1, "stock" => 20 });
        index.insert(&key(2), &doc! { "_id" => 2, "stock" => 25 });
        index.insert(&key(3), &doc! { "_id" => 3, "stock" => "muchos" });
        index.insert(&key(4), &doc! { "_id" => 4 });

        let lower = key(20);
        let result = index.scan(Bound::Excluded(&lower), Bound::Unbounded);
        assert_eq!(result.ids, vec![key(2)]);

        let upper = key(25);
        let result = index.scan(Bound::Unbounded, Bound::Excluded(&upper));
        assert_eq!(result.ids, vec![key(1)]);
    }

    #[test]
    fn test_multikey_and_compound() {
        let mut tags = Index::new(IndexModel::ascending(["tags"]));
        tags.insert(&key(1), &doc! { "_id" => 1, "tags" => vec!["natural", "orgánico"] });
        assert!(tags.is_multikey());
        assert_eq!(tags.size(), 2);

        let mut compound = Index::new(IndexModel::ascending(["categoria", "precio"]));
        assert_eq!(compound.name, "categoria_1_precio_1");
        compound.insert(&key(1), &doc! { "_id" => 1, "categoria" => "Bebida", "precio" => 4000 });
        compound.insert(&key(2), &doc! { "_id" => 2, "categoria" => "Bebida", "precio" => 7000 });
        compound.insert(&key(3), &doc! { "_id" => 3, "categoria" => "Snack", "precio" => 3500 });

        let k = key("Bebida");
        let result = compound.scan(Bound::Included(&k), Bound::Included(&k));
        assert_eq!(result.ids, vec![key(1), key(2)]);
    }

    #[test]
    fn test_index_remove() {
        let mut index = Index::new(IndexModel::ascending(["nombre"]));
        let doc = doc! { "_id" => 1, "nombre" => "Borojó fresco" };
        index.insert(&key(1), &doc);
        assert_eq!(index.total_entries(), 1);

        index.remove(&key(1), &doc);
        assert_eq!(index.total_entries(), 0);
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_numeric_keys_are_exact() {
        let big = 1i64 << 53;
        assert_ne!(key(big), key(big + 1));
        assert!(key(big) < key(big + 1));
        assert_eq!(key(5), key(5.0));
        assert!(key(2.5) < key(3));

        let mut index = Index::new(IndexModel::ascending(["stock"]));
        index.insert(&key(1), &doc! { "_id" => 1, "stock" => big });
        index.insert(&key(2), &doc! { "_id" => 2, "stock" => big + 1 });
        let lower = key(big);
        let result = index.scan(Bound::Excluded(&lower), Bound::Unbounded);
        assert_eq!(result.ids, vec![key(2)]);
    }

    #[test]
    fn test_default_names() {
        let model = IndexModel::new()
            .key("fecha", SortOrder::Descending)
            .key("total", SortOrder::Ascending);
        assert_eq!(model.default_name(), "fecha_-1_total_1");
        assert_eq!(model.clone().name("por_fecha").resolved_name(), "por_fecha");
    }
}
