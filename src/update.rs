//! Update operators: `$set`, `$unset`, `$inc`, `$push`, `$pull`

use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::types::Value;
use serde_json::json;

/// A single field modification
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    /// Add to a numeric field; a missing field starts at zero
    Inc(String, Value),
    /// Append to an array field; a missing field becomes a new array
    Push(String, Vec<Value>),
    /// Remove every element equal to the value
    Pull(String, Value),
}

impl UpdateOp {
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set(path, _)
            | UpdateOp::Unset(path)
            | UpdateOp::Inc(path, _)
            | UpdateOp::Push(path, _)
            | UpdateOp::Pull(path, _) => path,
        }
    }
}

/// Ordered list of modifications applied to each matched document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Update { ops: Vec::new() }
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, amount: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Inc(path.into(), amount.into()));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push(path.into(), vec![value.into()]));
        self
    }

    pub fn push_each<I, V>(mut self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ops.push(UpdateOp::Push(
            path.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull(path.into(), value.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Reject updates the engine would refuse regardless of the document
    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(DbError::InvalidUpdate(
                "update document requires atomic operators".to_string(),
            ));
        }

        for op in &self.ops {
            let path = op.path();
            if path == ID_FIELD || path.starts_with("_id.") {
                return Err(DbError::InvalidUpdate(format!(
                    "performing an update on the path '{}' would modify the immutable field '_id'",
                    path
                )));
            }
            if let UpdateOp::Inc(_, amount) = op {
                if !amount.is_number() {
                    return Err(DbError::InvalidUpdate(format!(
                        "cannot increment with non-numeric argument: {{ {}: {} }}",
                        path, amount
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply to a document in place; returns whether anything changed
    pub fn apply(&self, doc: &mut Document) -> Result<bool> {
        let mut modified = false;

        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => {
                    if doc.get_path(path) != Some(value) {
                        doc.set_path(path, value.clone())?;
                        modified = true;
                    }
                }
                UpdateOp::Unset(path) => {
                    modified |= doc.remove_path(path).is_some();
                }
                UpdateOp::Inc(path, amount) => {
                    let next = match doc.get_path(path) {
                        None => amount.clone(),
                        Some(current) => add_numbers(path, current, amount)?,
                    };
                    let changed = doc.get_path(path) != Some(&next);
                    doc.set_path(path, next)?;
                    modified |= changed;
                }
                UpdateOp::Push(path, values) => {
                    match doc.get_path_mut(path) {
                        None => doc.set_path(path, Value::Array(values.clone()))?,
                        Some(Value::Array(items)) => items.extend(values.iter().cloned()),
                        Some(other) => {
                            return Err(DbError::type_mismatch(path, "array", other));
                        }
                    }
                    modified |= !values.is_empty();
                }
                UpdateOp::Pull(path, target) => match doc.get_path_mut(path) {
                    None => {}
                    Some(Value::Array(items)) => {
                        let before = items.len();
                        items.retain(|item| !item.loose_eq(target));
                        modified |= items.len() != before;
                    }
                    Some(other) => {
                        return Err(DbError::type_mismatch(path, "array", other));
                    }
                },
            }
        }

        Ok(modified)
    }

    /// Parse the JSON update syntax, e.g. `{"$inc": {"stock": 10}}`
    pub fn from_json(json: &serde_json::Value) -> Result<Update> {
        let map = json
            .as_object()
            .ok_or_else(|| DbError::InvalidUpdate(format!("update must be an object, got {}", json)))?;

        let mut update = Update::new();
        for (op, fields) in map {
            let fields = fields.as_object().ok_or_else(|| {
                DbError::InvalidUpdate(format!("modifiers for {} must be an object", op))
            })?;

            for (path, arg) in fields {
                let path = path.clone();
                let update_op = match op.as_str() {
                    "$set" => UpdateOp::Set(path, Value::from_json(arg.clone())?),
                    "$unset" => UpdateOp::Unset(path),
                    "$inc" => UpdateOp::Inc(path, Value::from_json(arg.clone())?),
                    "$push" => match arg.as_object().and_then(|o| o.get("$each")) {
                        Some(serde_json::Value::Array(items)) => UpdateOp::Push(
                            path,
                            items
                                .iter()
                                .cloned()
                                .map(Value::from_json)
                                .collect::<Result<Vec<_>>>()?,
                        ),
                        Some(_) => {
                            return Err(DbError::InvalidUpdate("$each must be an array".to_string()))
                        }
                        None => UpdateOp::Push(path, vec![Value::from_json(arg.clone())?]),
                    },
                    "$pull" => UpdateOp::Pull(path, Value::from_json(arg.clone())?),
                    other => {
                        return Err(DbError::InvalidUpdate(format!("unknown modifier: {}", other)))
                    }
                };
                update.ops.push(update_op);
            }
        }

        update.validate()?;
        Ok(update)
    }

    /// Render in the JSON update syntax
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for op in &self.ops {
            let (name, path, arg) = match op {
                UpdateOp::Set(path, v) => ("$set", path, v.to_json()),
                UpdateOp::Unset(path) => ("$unset", path, json!("")),
                UpdateOp::Inc(path, v) => ("$inc", path, v.to_json()),
                UpdateOp::Push(path, vs) if vs.len() == 1 => ("$push", path, vs[0].to_json()),
                UpdateOp::Push(path, vs) => (
                    "$push",
                    path,
                    json!({ "$each": vs.iter().map(Value::to_json).collect::<Vec<_>>() }),
                ),
                UpdateOp::Pull(path, v) => ("$pull", path, v.to_json()),
            };
            let fields = out.entry(name.to_string()).or_insert_with(|| json!({}));
            if let Some(fields) = fields.as_object_mut() {
                fields.insert(path.clone(), arg);
            }
        }
        serde_json::Value::Object(out)
    }
}

fn add_numbers(path: &str, current: &Value, amount: &Value) -> Result<Value> {
    match (current, amount) {
        (Value::Int(a), Value::Int(b)) => Ok(a
            .checked_add(*b)
            .map(Value::Int)
            .unwrap_or(Value::Float(*a as f64 + *b as f64))),
        (a, b) if a.is_number() && b.is_number() => {
            Ok(Value::Float(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default()))
        }
        (other, _) => Err(DbError::TypeMismatch {
            field: path.to_string(),
            expected: "number".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}
