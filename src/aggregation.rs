//! Aggregation pipelines
//!
//! Stages run in order over the documents of one collection:
//! `$match`, `$unwind`, `$group`, `$sort`, `$skip`, `$limit`, `$project`, `$count`.

use crate::cursor::SortSpec;
use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::expr::Expr;
use crate::filter::Filter;
use crate::index::IndexKey;
use crate::types::Value;
use std::collections::BTreeMap;

/// Group accumulator
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Sum of numeric values; `Sum(literal 1)` counts documents
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    First(Expr),
    Last(Expr),
    Push(Expr),
}

impl Accumulator {
    pub fn count() -> Self {
        Accumulator::Sum(Expr::literal(1))
    }

    fn expr(&self) -> &Expr {
        match self {
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::Min(e)
            | Accumulator::Max(e)
            | Accumulator::First(e)
            | Accumulator::Last(e)
            | Accumulator::Push(e) => e,
        }
    }

    fn start(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum { int: 0, float: 0.0, is_float: false },
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) => AccumulatorState::Min(None),
            Accumulator::Max(_) => AccumulatorState::Max(None),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(Value::Null),
            Accumulator::Push(_) => AccumulatorState::Push(Vec::new()),
        }
    }

    fn from_json(name: &str, json: &serde_json::Value) -> Result<Accumulator> {
        let map = json
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| DbError::InvalidPipeline(format!("the field '{}' must be an accumulator object", name)))?;
        let (op, arg) = map
            .iter()
            .next()
            .ok_or_else(|| DbError::InvalidPipeline(format!("empty accumulator for '{}'", name)))?;

        if op == "$count" {
            return Ok(Accumulator::count());
        }
        let expr = Expr::from_json(arg)?;
        Ok(match op.as_str() {
            "$sum" => Accumulator::Sum(expr),
            "$avg" => Accumulator::Avg(expr),
            "$min" => Accumulator::Min(expr),
            "$max" => Accumulator::Max(expr),
            "$first" => Accumulator::First(expr),
            "$last" => Accumulator::Last(expr),
            "$push" => Accumulator::Push(expr),
            other => {
                return Err(DbError::InvalidPipeline(format!("unknown group operator '{}'", other)))
            }
        })
    }
}

#[derive(Debug)]
enum AccumulatorState {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { sum: f64, count: usize },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Push(Vec<Value>),
}

impl AccumulatorState {
    fn add(&mut self, value: Value) {
        match self {
            AccumulatorState::Sum { int, float, is_float } => match value {
                Value::Int(v) if !*is_float => match int.checked_add(v) {
                    Some(next) => *int = next,
                    None => {
                        *is_float = true;
                        *float = *int as f64 + v as f64;
                    }
                },
                Value::Int(v) => *float += v as f64,
                Value::Float(v) => {
                    if !*is_float {
                        *is_float = true;
                        *float = *int as f64;
                    }
                    *float += v;
                }
                _ => {}
            },
            AccumulatorState::Avg { sum, count } => {
                if let Some(v) = value.as_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
            AccumulatorState::Min(current) => {
                if !value.is_null()
                    && current.as_ref().map_or(true, |c| value.compare(c).is_lt())
                {
                    *current = Some(value);
                }
            }
            AccumulatorState::Max(current) => {
                if !value.is_null()
                    && current.as_ref().map_or(true, |c| value.compare(c).is_gt())
                {
                    *current = Some(value);
                }
            }
            AccumulatorState::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            AccumulatorState::Last(current) => *current = value,
            AccumulatorState::Push(items) => items.push(value),
        }
    }

    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum { int, float, is_float } => {
                if is_float {
                    Value::Float(float)
                } else {
                    Value::Int(int)
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / count as f64)
                }
            }
            AccumulatorState::Min(v) | AccumulatorState::Max(v) | AccumulatorState::First(v) => {
                v.unwrap_or(Value::Null)
            }
            AccumulatorState::Last(v) => v,
            AccumulatorState::Push(items) => Value::Array(items),
        }
    }
}

/// Field treatment in `$project`
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,
    Exclude,
    Computed(Expr),
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
    },
    Group {
        id: Expr,
        fields: Vec<(String, Accumulator)>,
    },
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    Project(Vec<(String, ProjectField)>),
    Count(String),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind { .. } => "$unwind",
            Stage::Group { .. } => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Project(_) => "$project",
            Stage::Count(_) => "$count",
        }
    }

    fn run(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        match self {
            Stage::Match(filter) => {
                let mut out = Vec::with_capacity(docs.len());
                for doc in docs {
                    if filter.matches(&doc)? {
                        out.push(doc);
                    }
                }
                Ok(out)
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => unwind(docs, path, *preserve_null_and_empty),
            Stage::Group { id, fields } => group(docs, id, fields),
            Stage::Sort(spec) => {
                let mut docs = docs;
                spec.sort(&mut docs);
                Ok(docs)
            }
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Project(fields) => docs.iter().map(|doc| project(doc, fields)).collect(),
            Stage::Count(field) => {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let mut out = Document::new();
                out.insert(field.clone(), docs.len() as i64);
                Ok(vec![out])
            }
        }
    }

    /// Parse one `{"$stage": ...}` object
    pub fn from_json(json: &serde_json::Value) -> Result<Stage> {
        let map = json
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| DbError::InvalidPipeline(format!("a pipeline stage must be an object with exactly one field: {}", json)))?;
        let (name, spec) = map
            .iter()
            .next()
            .ok_or_else(|| DbError::InvalidPipeline("empty pipeline stage".to_string()))?;

        match name.as_str() {
            "$match" => Ok(Stage::Match(Filter::from_json(spec)?)),
            "$unwind" => parse_unwind(spec),
            "$group" => parse_group(spec),
            "$sort" => Ok(Stage::Sort(SortSpec::from_json(spec)?)),
            "$skip" => Ok(Stage::Skip(parse_count(name, spec)?)),
            "$limit" => Ok(Stage::Limit(parse_count(name, spec)?)),
            "$project" => parse_project(spec),
            "$count" => match spec.as_str() {
                Some(field) if !field.is_empty() && !field.starts_with('$') => {
                    Ok(Stage::Count(field.to_string()))
                }
                _ => Err(DbError::InvalidPipeline("$count needs a non-empty field name".to_string())),
            },
            other => Err(DbError::InvalidPipeline(format!("unrecognized pipeline stage name: '{}'", other))),
        }
    }
}

/// Ordered list of stages
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { stages: Vec::new() }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn filter(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn unwind(self, path: impl Into<String>) -> Self {
        self.stage(Stage::Unwind {
            path: path.into(),
            preserve_null_and_empty: false,
        })
    }

    pub fn group<I, S>(self, id: Expr, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Accumulator)>,
        S: Into<String>,
    {
        self.stage(Stage::Group {
            id,
            fields: fields.into_iter().map(|(k, a)| (k.into(), a)).collect(),
        })
    }

    pub fn sort(self, spec: SortSpec) -> Self {
        self.stage(Stage::Sort(spec))
    }

    pub fn skip(self, n: usize) -> Self {
        self.stage(Stage::Skip(n))
    }

    pub fn limit(self, n: usize) -> Self {
        self.stage(Stage::Limit(n))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage over the input documents
    pub fn run(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        for stage in &self.stages {
            docs = stage.run(docs)?;
        }
        Ok(docs)
    }

    /// Parse a JSON array of stages
    pub fn from_json(json: &serde_json::Value) -> Result<Pipeline> {
        let stages = json
            .as_array()
            .ok_or_else(|| DbError::InvalidPipeline(format!("pipeline must be an array, got {}", json)))?;
        Ok(Pipeline {
            stages: stages.iter().map(Stage::from_json).collect::<Result<Vec<_>>>()?,
        })
    }
}

impl TryFrom<serde_json::Value> for Pipeline {
    type Error = DbError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        Pipeline::from_json(&json)
    }
}

fn unwind(docs: Vec<Document>, path: &str, preserve: bool) -> Result<Vec<Document>> {
    let mut out = Vec::new();
    for doc in docs {
        match doc.get_path(path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    copy.set_path(path, item)?;
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) => {
                if preserve {
                    let mut copy = doc;
                    copy.remove_path(path);
                    out.push(copy);
                }
            }
            None | Some(Value::Null) => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn group(docs: Vec<Document>, id: &Expr, fields: &[(String, Accumulator)]) -> Result<Vec<Document>> {
    let mut positions: BTreeMap<IndexKey, usize> = BTreeMap::new();
    let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();

    for doc in &docs {
        let key_value = id.evaluate(doc)?;
        let key = IndexKey::from(&key_value);

        let position = match positions.get(&key) {
            Some(position) => *position,
            None => {
                let states = fields.iter().map(|(_, acc)| acc.start()).collect();
                groups.push((key_value, states));
                positions.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };

        let states = &mut groups[position].1;
        for ((_, acc), state) in fields.iter().zip(states.iter_mut()) {
            state.add(acc.expr().evaluate(doc)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let mut out = Document::new();
            out.insert(ID_FIELD, key);
            for ((name, _), state) in fields.iter().zip(states) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect())
}

fn project(doc: &Document, fields: &[(String, ProjectField)]) -> Result<Document> {
    let inclusion = fields
        .iter()
        .any(|(name, f)| name != ID_FIELD && !matches!(f, ProjectField::Exclude));

    if !inclusion {
        let mut out = doc.clone();
        for (name, _) in fields {
            out.remove_path(name);
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let exclude_id = fields
        .iter()
        .any(|(name, f)| name == ID_FIELD && matches!(f, ProjectField::Exclude));
    if !exclude_id {
        if let Some(id) = doc.id() {
            out.insert(ID_FIELD, id.clone());
        }
    }

    for (name, field) in fields {
        match field {
            ProjectField::Include => {
                if let Some(value) = doc.get_path(name) {
                    out.set_path(name, value.clone())?;
                }
            }
            ProjectField::Computed(expr) => out.set_path(name, expr.evaluate(doc)?)?,
            ProjectField::Exclude if name == ID_FIELD => {}
            ProjectField::Exclude => {
                return Err(DbError::InvalidPipeline(format!(
                    "cannot do exclusion on field '{}' in inclusion projection",
                    name
                )))
            }
        }
    }
    Ok(out)
}

fn parse_unwind(spec: &serde_json::Value) -> Result<Stage> {
    let (path, preserve) = match spec {
        serde_json::Value::String(path) => (path.as_str(), false),
        serde_json::Value::Object(map) => (
            map.get("path").and_then(|p| p.as_str()).unwrap_or_default(),
            map.get("preserveNullAndEmptyArrays")
                .and_then(|p| p.as_bool())
                .unwrap_or(false),
        ),
        _ => ("", false),
    };

    match path.strip_prefix('$') {
        Some(field) if !field.is_empty() => Ok(Stage::Unwind {
            path: field.to_string(),
            preserve_null_and_empty: preserve,
        }),
        _ => Err(DbError::InvalidPipeline(
            "$unwind path must be a field path prefixed with '$'".to_string(),
        )),
    }
}

fn parse_group(spec: &serde_json::Value) -> Result<Stage> {
    let map = spec
        .as_object()
        .ok_or_else(|| DbError::InvalidPipeline("$group must be an object".to_string()))?;
    let id = map
        .get(ID_FIELD)
        .ok_or_else(|| DbError::InvalidPipeline("a group specification must include an _id".to_string()))?;

    let mut fields = Vec::new();
    for (name, acc) in map {
        if name == ID_FIELD {
            continue;
        }
        fields.push((name.clone(), Accumulator::from_json(name, acc)?));
    }

    Ok(Stage::Group {
        id: Expr::from_json(id)?,
        fields,
    })
}

fn parse_project(spec: &serde_json::Value) -> Result<Stage> {
    let map = spec
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| DbError::InvalidPipeline("$project requires a non-empty object".to_string()))?;

    let mut fields = Vec::new();
    for (name, value) in map {
        let field = match value {
            serde_json::Value::Bool(true) => ProjectField::Include,
            serde_json::Value::Bool(false) => ProjectField::Exclude,
            serde_json::Value::Number(n) if n.as_f64() == Some(0.0) => ProjectField::Exclude,
            serde_json::Value::Number(_) => ProjectField::Include,
            other => ProjectField::Computed(Expr::from_json(other)?),
        };
        fields.push((name.clone(), field));
    }
    Ok(Stage::Project(fields))
}

fn parse_count(stage: &str, spec: &serde_json::Value) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| DbError::InvalidPipeline(format!("{} must be a non-negative integer", stage)))
}
