//! Sort specifications, find options and result cursors

use crate::document::Document;
use crate::error::{DbError, Result};
use crate::index::SortOrder;
use crate::types::Value;
use std::cmp::Ordering;

/// Ordered list of sort keys, e.g. `{stock: -1}`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    keys: Vec<(String, SortOrder)>,
}

impl SortSpec {
    pub fn new() -> Self {
        SortSpec { keys: Vec::new() }
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Ascending));
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Descending));
        self
    }

    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare two documents; missing fields sort as null
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, order) in &self.keys {
            let left = sort_key(a, field, *order);
            let right = sort_key(b, field, *order);
            let ordering = match order {
                SortOrder::Ascending => left.compare(right),
                SortOrder::Descending => right.compare(left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable sort in place
    pub fn sort(&self, docs: &mut [Document]) {
        if !self.keys.is_empty() {
            docs.sort_by(|a, b| self.compare(a, b));
        }
    }

    /// Parse `{"campo": 1, "otro": -1}`
    pub fn from_json(json: &serde_json::Value) -> Result<SortSpec> {
        let map = json
            .as_object()
            .ok_or_else(|| DbError::InvalidQuery(format!("sort must be an object, got {}", json)))?;

        let mut spec = SortSpec::new();
        for (field, direction) in map {
            spec = match direction.as_i64() {
                Some(1) => spec.asc(field.clone()),
                Some(-1) => spec.desc(field.clone()),
                _ => {
                    return Err(DbError::InvalidQuery(format!(
                        "invalid sort direction for '{}': {}",
                        field, direction
                    )))
                }
            };
        }
        if spec.is_empty() {
            return Err(DbError::InvalidQuery("sort specification must not be empty".to_string()));
        }
        Ok(spec)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.keys
                .iter()
                .map(|(field, order)| (field.clone(), serde_json::Value::from(order.as_i32())))
                .collect(),
        )
    }
}

/// Value a document sorts by: over arrays, the smallest element when
/// ascending and the largest when descending
fn sort_key<'a>(doc: &'a Document, field: &str, order: SortOrder) -> &'a Value {
    let mut candidates = Vec::new();
    for value in doc.resolve_path(field) {
        match value {
            Value::Array(items) if !items.is_empty() => candidates.extend(items.iter()),
            other => candidates.push(other),
        }
    }

    let picked = match order {
        SortOrder::Ascending => candidates.into_iter().min_by(|a, b| a.compare(b)),
        SortOrder::Descending => candidates.into_iter().max_by(|a, b| a.compare(b)),
    };
    picked.unwrap_or(&Value::Null)
}

/// Options applied after filtering, in the order sort, skip, limit
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub(crate) fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(sort) = &self.sort {
            sort.sort(&mut docs);
        }
        let limit = self.effective_limit().unwrap_or(usize::MAX);
        docs.into_iter().skip(self.skip).take(limit).collect()
    }

    /// The result cap, with a limit of 0 read as unbounded
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }
}

/// Sequence of query results
///
/// Results are materialized when the cursor is opened, so iterating never
/// blocks writers.
#[derive(Debug)]
pub struct Cursor {
    documents: std::vec::IntoIter<Document>,
}

impl Cursor {
    pub(crate) fn new(documents: Vec<Document>) -> Self {
        Cursor {
            documents: documents.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.documents.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use serde_json::json;

    #[test]
    fn test_sort_desc_then_asc() {
        let mut docs = vec![
            doc! { "_id" => 1, "stock" => 30 },
            doc! { "_id" => 2, "stock" => 50 },
            doc! { "_id" => 3, "stock" => 30 },
            doc! { "_id" => 4 },
        ];
        let spec = SortSpec::from_json(&json!({ "stock": -1 })).unwrap();
        spec.sort(&mut docs);

        let ids: Vec<i64> = docs.iter().map(|d| d.get_i64("_id").unwrap()).collect();
        assert_eq!(ids, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_find_options_skip_limit() {
        let docs: Vec<Document> = (1..=10).map(|i| doc! { "_id" => i as i64 }).collect();
        let options = FindOptions {
            sort: Some(SortSpec::new().desc("_id")),
            skip: 1,
            limit: Some(3),
        };
        let ids: Vec<i64> = options
            .apply(docs)
            .iter()
            .map(|d| d.get_i64("_id").unwrap())
            .collect();
        assert_eq!(ids, vec![9, 8, 7]);
    }

    #[test]
    fn test_sort_through_array_of_documents() {
        let mut docs = vec![
            doc! { "_id" => 1, "productos" => vec![doc! { "cantidad" => 2 }, doc! { "cantidad" => 1 }] },
            doc! { "_id" => 2, "productos" => vec![doc! { "cantidad" => 3 }] },
            doc! { "_id" => 3, "productos" => vec![doc! { "cantidad" => 4 }, doc! { "cantidad" => 0 }] },
        ];

        SortSpec::new().asc("productos.cantidad").sort(&mut docs);
        let ids: Vec<i64> = docs.iter().map(|d| d.get_i64("_id").unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        SortSpec::new().desc("productos.cantidad").sort(&mut docs);
        let ids: Vec<i64> = docs.iter().map(|d| d.get_i64("_id").unwrap()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let docs: Vec<Document> = (1..=4).map(|i| doc! { "_id" => i as i64 }).collect();
        let options = FindOptions {
            sort: None,
            skip: 1,
            limit: Some(0),
        };
        assert_eq!(options.effective_limit(), None);
        assert_eq!(options.apply(docs).len(), 3);
    }

    #[test]
    fn test_invalid_sort() {
        assert!(SortSpec::from_json(&json!({ "stock": 2 })).is_err());
        assert!(SortSpec::from_json(&json!({})).is_err());
    }
}
