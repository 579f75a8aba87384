//! Filter predicates
//!
//! Selects documents for find, update, delete and `$match`. Equality against
//! an array field matches when any element matches; comparisons only match
//! values of the same type class; `{campo: null}` also matches documents
//! where the field is absent.

use crate::document::Document;
use crate::error::{DbError, Result};
use crate::expr::{CompareOp, Expr};
use crate::types::Value;
use regex::{Regex, RegexBuilder};
use serde_json::json;
use std::fmt;

/// Compiled regular expression with its original pattern and options
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    pattern: String,
    options: String,
    regex: Regex,
}

impl RegexMatcher {
    /// Compile with options `i` (case-insensitive), `m`, `s` and `x`
    pub fn new(pattern: &str, options: &str) -> Result<Self> {
        let mut builder = RegexBuilder::new(pattern);
        for option in options.chars() {
            match option {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(DbError::InvalidQuery(format!("invalid regex option '{}'", other)))
                }
            };
        }

        Ok(RegexMatcher {
            pattern: pattern.to_string(),
            options: options.to_string(),
            regex: builder.build()?,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> &str {
        &self.options
    }
}

/// Condition applied to the values at one field path
#[derive(Debug, Clone)]
pub enum Condition {
    Compare(CompareOp, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(RegexMatcher),
    /// Array contains every listed value
    All(Vec<Value>),
    /// Array has exactly this many elements
    Size(usize),
    Not(Box<Condition>),
}

/// Filter predicate
#[derive(Debug, Clone)]
pub enum Filter {
    Field { path: String, condition: Condition },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Expr(Expr),
}

impl Filter {
    /// Matches every document
    pub fn empty() -> Self {
        Filter::And(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::And(items) if items.is_empty())
    }

    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Filter::Field {
            path: path.into(),
            condition,
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(path, Condition::Compare(CompareOp::Eq, value.into()))
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(path, Condition::Compare(CompareOp::Ne, value.into()))
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(path, Condition::Compare(CompareOp::Gt, value.into()))
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(path, Condition::Compare(CompareOp::Gte, value.into()))
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(path, Condition::Compare(CompareOp::Lt, value.into()))
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(path, Condition::Compare(CompareOp::Lte, value.into()))
    }

    pub fn is_in<I, V>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::field(path, Condition::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<I, V>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::field(path, Condition::Nin(values.into_iter().map(Into::into).collect()))
    }

    pub fn exists(path: impl Into<String>, exists: bool) -> Self {
        Filter::field(path, Condition::Exists(exists))
    }

    pub fn regex(path: impl Into<String>, pattern: &str) -> Result<Self> {
        Filter::regex_with_options(path, pattern, "")
    }

    pub fn regex_with_options(path: impl Into<String>, pattern: &str, options: &str) -> Result<Self> {
        Ok(Filter::field(path, Condition::Regex(RegexMatcher::new(pattern, options)?)))
    }

    pub fn all<I, V>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::field(path, Condition::All(values.into_iter().map(Into::into).collect()))
    }

    pub fn size(path: impl Into<String>, len: usize) -> Self {
        Filter::field(path, Condition::Size(len))
    }

    pub fn expr(expr: Expr) -> Self {
        Filter::Expr(expr)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn nor(filters: Vec<Filter>) -> Self {
        Filter::Nor(filters)
    }

    /// Test a document against the filter
    pub fn matches(&self, doc: &Document) -> Result<bool> {
        match self {
            Filter::Field { path, condition } => Ok(condition_matches(&doc.resolve_path(path), condition)),
            Filter::And(filters) => {
                for filter in filters {
                    if !filter.matches(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(filters) => {
                for filter in filters {
                    if filter.matches(doc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Nor(filters) => {
                for filter in filters {
                    if filter.matches(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Expr(expr) => Ok(expr.evaluate(doc)?.is_truthy()),
        }
    }

    /// Top-level conditions that all must hold (the filter itself unless it is an `And`)
    pub(crate) fn conjuncts(&self) -> Vec<&Filter> {
        match self {
            Filter::And(items) => items.iter().flat_map(|f| f.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Parse the JSON query syntax, e.g. `{"stock": {"$gt": 20}}`
    pub fn from_json(json: &serde_json::Value) -> Result<Filter> {
        let map = match json {
            serde_json::Value::Object(map) => map,
            other => return Err(DbError::InvalidQuery(format!("filter must be an object, got {}", other))),
        };

        let mut filters = Vec::new();
        for (key, value) in map {
            match key.as_str() {
                "$and" => filters.push(Filter::And(parse_filter_list(key, value)?)),
                "$or" => filters.push(Filter::Or(parse_filter_list(key, value)?)),
                "$nor" => filters.push(Filter::Nor(parse_filter_list(key, value)?)),
                "$expr" => filters.push(Filter::Expr(Expr::from_json(value)?)),
                op if op.starts_with('$') => {
                    return Err(DbError::InvalidQuery(format!("unknown top level operator: {}", op)))
                }
                path => filters.extend(parse_field(path, value)?),
            }
        }

        Ok(if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        })
    }

    /// Render in the JSON query syntax
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Filter::Field { path, condition } => json!({ path.as_str(): condition.to_json() }),
            Filter::And(items) if items.is_empty() => json!({}),
            Filter::And(items) => json!({ "$and": items.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Or(items) => json!({ "$or": items.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Nor(items) => json!({ "$nor": items.iter().map(Filter::to_json).collect::<Vec<_>>() }),
            Filter::Expr(expr) => json!({ "$expr": expr.to_json() }),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TryFrom<serde_json::Value> for Filter {
    type Error = DbError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        Filter::from_json(&json)
    }
}

impl Condition {
    pub fn to_json(&self) -> serde_json::Value {
        let values = |vs: &[Value]| vs.iter().map(Value::to_json).collect::<Vec<_>>();
        match self {
            Condition::Compare(CompareOp::Eq, value) => value.to_json(),
            Condition::Compare(op, value) => json!({ op.operator(): value.to_json() }),
            Condition::In(vs) => json!({ "$in": values(vs) }),
            Condition::Nin(vs) => json!({ "$nin": values(vs) }),
            Condition::Exists(b) => json!({ "$exists": b }),
            Condition::Regex(re) if re.options().is_empty() => json!({ "$regex": re.pattern() }),
            Condition::Regex(re) => json!({ "$regex": re.pattern(), "$options": re.options() }),
            Condition::All(vs) => json!({ "$all": values(vs) }),
            Condition::Size(n) => json!({ "$size": n }),
            Condition::Not(inner) => json!({ "$not": inner.to_json() }),
        }
    }
}

fn eq_matches(values: &[&Value], target: &Value) -> bool {
    if target.is_null() && values.is_empty() {
        return true;
    }

    values.iter().any(|v| {
        v.loose_eq(target)
            || matches!(v, Value::Array(items) if items.iter().any(|item| item.loose_eq(target)))
    })
}

/// Candidate scalars for comparisons and regexes: values plus array elements
fn candidates<'a>(values: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for value in values {
        out.push(*value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn condition_matches(values: &[&Value], condition: &Condition) -> bool {
    match condition {
        Condition::Compare(CompareOp::Eq, target) => eq_matches(values, target),
        Condition::Compare(CompareOp::Ne, target) => !eq_matches(values, target),
        Condition::Compare(op, target) => candidates(values).into_iter().any(|v| {
            v.type_rank() == target.type_rank() && op.holds(v.compare(target))
        }),
        Condition::In(targets) => targets.iter().any(|t| eq_matches(values, t)),
        Condition::Nin(targets) => !targets.iter().any(|t| eq_matches(values, t)),
        Condition::Exists(expected) => !values.is_empty() == *expected,
        Condition::Regex(re) => candidates(values)
            .into_iter()
            .any(|v| v.as_str().map(|s| re.is_match(s)).unwrap_or(false)),
        Condition::All(targets) => !targets.is_empty() && targets.iter().all(|t| eq_matches(values, t)),
        Condition::Size(len) => values
            .iter()
            .any(|v| matches!(v, Value::Array(items) if items.len() == *len)),
        Condition::Not(inner) => !condition_matches(values, inner),
    }
}

fn parse_filter_list(op: &str, value: &serde_json::Value) -> Result<Vec<Filter>> {
    match value {
        serde_json::Value::Array(items) if !items.is_empty() => items.iter().map(Filter::from_json).collect(),
        _ => Err(DbError::InvalidQuery(format!("{} must be a nonempty array", op))),
    }
}

fn is_operator_object(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            !map.is_empty()
                && map.keys().all(|k| k.starts_with('$'))
                && !(map.len() == 1 && (map.contains_key("$date") || map.contains_key("$oid")))
        }
        _ => false,
    }
}

fn parse_field(path: &str, value: &serde_json::Value) -> Result<Vec<Filter>> {
    if !is_operator_object(value) {
        return Ok(vec![Filter::field(
            path,
            Condition::Compare(CompareOp::Eq, Value::from_json(value.clone())?),
        )]);
    }

    let map = value.as_object().map(|m| m.iter().collect::<Vec<_>>()).unwrap_or_default();
    let options = map
        .iter()
        .find(|(k, _)| k.as_str() == "$options")
        .map(|(_, v)| v.as_str().unwrap_or_default().to_string());

    let mut filters = Vec::new();
    for (op, arg) in map {
        if op == "$options" {
            continue;
        }
        let condition = parse_condition(op, arg, options.as_deref())?;
        filters.push(Filter::field(path, condition));
    }
    Ok(filters)
}

fn value_list(op: &str, arg: &serde_json::Value) -> Result<Vec<Value>> {
    match arg {
        serde_json::Value::Array(items) => items.iter().cloned().map(Value::from_json).collect(),
        _ => Err(DbError::InvalidQuery(format!("{} needs an array", op))),
    }
}

fn parse_condition(op: &str, arg: &serde_json::Value, options: Option<&str>) -> Result<Condition> {
    if let Some(compare) = CompareOp::from_operator(op) {
        return Ok(Condition::Compare(compare, Value::from_json(arg.clone())?));
    }

    Ok(match op {
        "$in" => Condition::In(value_list(op, arg)?),
        "$nin" => Condition::Nin(value_list(op, arg)?),
        "$all" => Condition::All(value_list(op, arg)?),
        "$exists" => Condition::Exists(arg.as_bool().unwrap_or_else(|| {
            Value::from_json(arg.clone()).map(|v| v.is_truthy()).unwrap_or(false)
        })),
        "$size" => {
            let len = arg
                .as_u64()
                .ok_or_else(|| DbError::InvalidQuery("$size needs a non-negative integer".to_string()))?;
            Condition::Size(len as usize)
        }
        "$regex" => {
            let pattern = arg
                .as_str()
                .ok_or_else(|| DbError::InvalidQuery("$regex has to be a string".to_string()))?;
            Condition::Regex(RegexMatcher::new(pattern, options.unwrap_or_default())?)
        }
        "$not" => {
            let inner = match arg {
                serde_json::Value::Object(map) if map.len() == 1 || map.contains_key("$regex") => {
                    let options = map.get("$options").and_then(|v| v.as_str());
                    let (op, arg) = map
                        .iter()
                        .find(|(k, _)| k.as_str() != "$options")
                        .ok_or_else(|| DbError::InvalidQuery("$not cannot be empty".to_string()))?;
                    parse_condition(op, arg, options)?
                }
                _ => {
                    return Err(DbError::InvalidQuery(
                        "$not needs a single operator expression".to_string(),
                    ))
                }
            };
            Condition::Not(Box::new(inner))
        }
        other => return Err(DbError::InvalidQuery(format!("unknown operator: {}", other))),
    })
}
