//! Stored functions (`system.js`)
//!
//! Named server-side functions callable by name with positional arguments.
//! Each receives the database handle, so it can run queries of its own.

use crate::database::Database;
use crate::error::{DbError, Result};
use crate::types::Value;
use dashmap::DashMap;
use std::sync::Arc;

/// Body of a stored function
pub type StoredFunction = Arc<dyn Fn(&Database, &[Value]) -> Result<Value> + Send + Sync>;

/// Lock-free registry of stored functions
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, StoredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry {
            functions: DashMap::new(),
        }
    }

    /// Register or replace a function; returns true if it replaced one
    pub fn register<F>(&self, name: impl Into<String>, function: F) -> bool
    where
        F: Fn(&Database, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.into(), Arc::new(function))
            .is_some()
    }

    /// Look up a function. The map guard is released before returning, so
    /// a function may itself use the registry.
    pub fn get(&self, name: &str) -> Result<StoredFunction> {
        self.functions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DbError::FunctionNotFound(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Positional argument `index` of a call to `function`
pub fn argument<'a>(function: &str, args: &'a [Value], index: usize) -> Result<&'a Value> {
    args.get(index).ok_or_else(|| DbError::FunctionFailed {
        name: function.to_string(),
        reason: format!("missing argument {}", index + 1),
    })
}

/// Numeric positional argument
pub fn number_argument(function: &str, args: &[Value], index: usize) -> Result<f64> {
    let value = argument(function, args, index)?;
    value.as_f64().ok_or_else(|| DbError::FunctionFailed {
        name: function.to_string(),
        reason: format!("argument {} must be a number, got {}", index + 1, value.type_name()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_call_remove() {
        let db = Database::new("pruebas");
        let registry = FunctionRegistry::new();

        assert!(!registry.register("doble", |_, args| {
            Ok(Value::Float(number_argument("doble", args, 0)? * 2.0))
        }));
        assert!(registry.contains("doble"));

        let doble = registry.get("doble").unwrap();
        assert_eq!(doble(&db, &[Value::Int(21)]).unwrap(), Value::Float(42.0));
        assert!(doble(&db, &[]).is_err());
        assert!(doble(&db, &[Value::from("x")]).is_err());

        assert!(registry.remove("doble"));
        assert!(matches!(registry.get("doble"), Err(DbError::FunctionNotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_sorted() {
        let registry = FunctionRegistry::new();
        registry.register("verificarStock", |_, _| Ok(Value::Bool(true)));
        registry.register("calcularDescuento", |_, _| Ok(Value::Null));
        assert_eq!(registry.names(), vec!["calcularDescuento", "verificarStock"]);
        assert_eq!(registry.len(), 2);
    }
}
