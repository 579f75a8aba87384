//! Aggregation expressions
//!
//! Evaluated against a single document. Used by `$expr` filters, `$group`
//! keys and accumulators, and computed `$project` fields.

use crate::document::Document;
use crate::error::{DbError, Result};
use crate::types::Value;
use chrono::Datelike;
use serde_json::json;
use std::cmp::Ordering;

/// Comparison operators shared by expressions and filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    pub fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => CompareOp::Eq,
            "$ne" => CompareOp::Ne,
            "$gt" => CompareOp::Gt,
            "$gte" => CompareOp::Gte,
            "$lt" => CompareOp::Lt,
            "$lte" => CompareOp::Lte,
            _ => return None,
        })
    }
}

/// Date part extracted by `$year`, `$month`, `$dayOfMonth`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    DayOfMonth,
}

impl DatePart {
    fn operator(&self) -> &'static str {
        match self {
            DatePart::Year => "$year",
            DatePart::Month => "$month",
            DatePart::DayOfMonth => "$dayOfMonth",
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field path, written `"$campo.sub"`
    Field(String),
    Literal(Value),
    /// Document-shaped expression, e.g. `{mes: {$month: "$fecha"}}`
    Document(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Size(Box<Expr>),
    DatePart(DatePart, Box<Expr>),
    Add(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn document<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        Expr::Document(fields.into_iter().map(|(k, e)| (k.into(), e)).collect())
    }

    pub fn size(inner: Expr) -> Self {
        Expr::Size(Box::new(inner))
    }

    pub fn month(inner: Expr) -> Self {
        Expr::DatePart(DatePart::Month, Box::new(inner))
    }

    pub fn year(inner: Expr) -> Self {
        Expr::DatePart(DatePart::Year, Box::new(inner))
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare(op, Box::new(left), Box::new(right))
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Expr::compare(CompareOp::Gt, left, right)
    }

    pub fn multiply(factors: Vec<Expr>) -> Self {
        Expr::Multiply(factors)
    }

    /// Evaluate against a document. Missing fields evaluate to null.
    pub fn evaluate(&self, doc: &Document) -> Result<Value> {
        match self {
            Expr::Field(path) => Ok(doc.path_value(path).unwrap_or(Value::Null)),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Document(fields) => {
                let mut out = Document::new();
                for (key, expr) in fields {
                    out.insert(key.clone(), expr.evaluate(doc)?);
                }
                Ok(Value::Document(out))
            }
            Expr::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|e| e.evaluate(doc))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Expr::Size(inner) => match inner.evaluate(doc)? {
                Value::Array(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(DbError::InvalidPipeline(format!(
                    "$size requires an array, got {}",
                    other.type_name()
                ))),
            },
            Expr::DatePart(part, inner) => match inner.evaluate(doc)? {
                Value::Null => Ok(Value::Null),
                Value::DateTime(date) => Ok(Value::Int(match part {
                    DatePart::Year => date.year() as i64,
                    DatePart::Month => date.month() as i64,
                    DatePart::DayOfMonth => date.day() as i64,
                })),
                other => Err(DbError::InvalidPipeline(format!(
                    "{} requires a date, got {}",
                    part.operator(),
                    other.type_name()
                ))),
            },
            Expr::Add(terms) => fold_numbers(terms, doc, "$add", 0, |a, b| a.checked_add(b), |a, b| a + b),
            Expr::Multiply(factors) => {
                fold_numbers(factors, doc, "$multiply", 1, |a, b| a.checked_mul(b), |a, b| a * b)
            }
            Expr::Subtract(left, right) => {
                let (a, b) = (left.evaluate(doc)?, right.evaluate(doc)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => Ok(x
                        .checked_sub(*y)
                        .map(Value::Int)
                        .unwrap_or(Value::Float(*x as f64 - *y as f64))),
                    (Value::DateTime(x), Value::DateTime(y)) => {
                        Ok(Value::Int((*x - *y).num_milliseconds()))
                    }
                    _ => Ok(Value::Float(number(&a, "$subtract")? - number(&b, "$subtract")?)),
                }
            }
            Expr::Divide(left, right) => {
                let (a, b) = (left.evaluate(doc)?, right.evaluate(doc)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                let divisor = number(&b, "$divide")?;
                if divisor == 0.0 {
                    return Err(DbError::InvalidPipeline("can't $divide by zero".to_string()));
                }
                Ok(Value::Float(number(&a, "$divide")? / divisor))
            }
            Expr::Compare(op, left, right) => {
                let ordering = left.evaluate(doc)?.compare(&right.evaluate(doc)?);
                Ok(Value::Bool(op.holds(ordering)))
            }
            Expr::And(items) => {
                for item in items {
                    if !item.evaluate(doc)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(items) => {
                for item in items {
                    if item.evaluate(doc)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not(inner) => Ok(Value::Bool(!inner.evaluate(doc)?.is_truthy())),
        }
    }

    /// Parse the JSON expression syntax
    pub fn from_json(json: &serde_json::Value) -> Result<Expr> {
        match json {
            serde_json::Value::String(s) if s.starts_with("$$") => Err(DbError::InvalidPipeline(
                format!("variables are not supported: {}", s),
            )),
            serde_json::Value::String(s) if s.starts_with('$') => Ok(Expr::Field(s[1..].to_string())),
            serde_json::Value::Array(items) => Ok(Expr::Array(
                items.iter().map(Expr::from_json).collect::<Result<Vec<_>>>()?,
            )),
            serde_json::Value::Object(map) => {
                let operator = map.keys().find(|k| k.starts_with('$'));
                match operator {
                    Some(op) if map.len() == 1 => parse_operator(op, &map[op]),
                    Some(op) => Err(DbError::InvalidPipeline(format!(
                        "operator {} must be the only field of its object",
                        op
                    ))),
                    None => Ok(Expr::Document(
                        map.iter()
                            .map(|(k, v)| Ok((k.clone(), Expr::from_json(v)?)))
                            .collect::<Result<Vec<_>>>()?,
                    )),
                }
            }
            other => Ok(Expr::Literal(Value::from_json(other.clone())?)),
        }
    }

    /// Render in the JSON expression syntax
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Expr::Field(path) => json!(format!("${}", path)),
            Expr::Literal(value) => match value {
                Value::String(s) if s.starts_with('$') => json!({ "$literal": s }),
                other => other.to_json(),
            },
            Expr::Document(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, e)| (k.clone(), e.to_json())).collect(),
            ),
            Expr::Array(items) => serde_json::Value::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Size(inner) => json!({ "$size": inner.to_json() }),
            Expr::DatePart(part, inner) => json!({ part.operator(): inner.to_json() }),
            Expr::Add(items) => json!({ "$add": items.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Multiply(items) => {
                json!({ "$multiply": items.iter().map(Expr::to_json).collect::<Vec<_>>() })
            }
            Expr::Subtract(a, b) => json!({ "$subtract": [a.to_json(), b.to_json()] }),
            Expr::Divide(a, b) => json!({ "$divide": [a.to_json(), b.to_json()] }),
            Expr::Compare(op, a, b) => json!({ op.operator(): [a.to_json(), b.to_json()] }),
            Expr::And(items) => json!({ "$and": items.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Or(items) => json!({ "$or": items.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Not(inner) => json!({ "$not": [inner.to_json()] }),
        }
    }
}

fn number(value: &Value, op: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        DbError::InvalidPipeline(format!("{} only supports numeric types, not {}", op, value.type_name()))
    })
}

fn fold_numbers(
    terms: &[Expr],
    doc: &Document,
    op: &str,
    identity: i64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    let mut acc = Value::Int(identity);
    for term in terms {
        let value = term.evaluate(doc)?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        acc = match (&acc, &value) {
            (Value::Int(a), Value::Int(b)) => match int_op(*a, *b) {
                Some(v) => Value::Int(v),
                None => Value::Float(float_op(*a as f64, *b as f64)),
            },
            _ => Value::Float(float_op(number(&acc, op)?, number(&value, op)?)),
        };
    }
    Ok(acc)
}

fn unary_arg(args: &serde_json::Value) -> &serde_json::Value {
    match args {
        serde_json::Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn list_args(op: &str, args: &serde_json::Value) -> Result<Vec<Expr>> {
    match args {
        serde_json::Value::Array(items) => items.iter().map(Expr::from_json).collect(),
        _ => Err(DbError::InvalidPipeline(format!("{} expects an array of arguments", op))),
    }
}

fn pair_args(op: &str, args: &serde_json::Value) -> Result<(Box<Expr>, Box<Expr>)> {
    let mut items = list_args(op, args)?;
    if items.len() != 2 {
        return Err(DbError::InvalidPipeline(format!(
            "{} expects exactly 2 arguments, got {}",
            op,
            items.len()
        )));
    }
    let right = items.pop().map(Box::new);
    let left = items.pop().map(Box::new);
    match (left, right) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(DbError::InvalidPipeline(format!("{} expects exactly 2 arguments", op))),
    }
}

fn parse_operator(op: &str, args: &serde_json::Value) -> Result<Expr> {
    if let Some(compare) = CompareOp::from_operator(op) {
        let (left, right) = pair_args(op, args)?;
        return Ok(Expr::Compare(compare, left, right));
    }

    Ok(match op {
        "$literal" => Expr::Literal(Value::from_json(args.clone())?),
        "$size" => Expr::size(Expr::from_json(unary_arg(args))?),
        "$month" => Expr::DatePart(DatePart::Month, Box::new(Expr::from_json(unary_arg(args))?)),
        "$year" => Expr::DatePart(DatePart::Year, Box::new(Expr::from_json(unary_arg(args))?)),
        "$dayOfMonth" => {
            Expr::DatePart(DatePart::DayOfMonth, Box::new(Expr::from_json(unary_arg(args))?))
        }
        "$add" => Expr::Add(list_args(op, args)?),
        "$multiply" => Expr::Multiply(list_args(op, args)?),
        "$subtract" => {
            let (a, b) = pair_args(op, args)?;
            Expr::Subtract(a, b)
        }
        "$divide" => {
            let (a, b) = pair_args(op, args)?;
            Expr::Divide(a, b)
        }
        "$and" => Expr::And(list_args(op, args)?),
        "$or" => Expr::Or(list_args(op, args)?),
        "$not" => Expr::Not(Box::new(Expr::from_json(unary_arg(args))?)),
        other => {
            return Err(DbError::InvalidPipeline(format!(
                "unrecognized expression operator '{}'",
                other
            )))
        }
    })
}
