//! Collections
//!
//! [`CollectionData`] owns the documents of one collection, keyed by `_id`,
//! together with its indexes. [`Collection`] is the user-facing handle; it
//! runs every operation through a [`DocumentStore`], which is either the
//! database itself (auto-commit) or a session (transaction working copy).

use crate::aggregation::Pipeline;
use crate::cursor::{Cursor, FindOptions, SortSpec};
use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::explain::{ExecutionStats, Explain, PlanStage, QueryPlanner, Verbosity};
use crate::expr::CompareOp;
use crate::filter::{Condition, Filter};
use crate::index::{Index, IndexKey, IndexModel, IndexStats};
use crate::types::{ObjectId, Value};
use crate::update::Update;
use crate::wal::WalOp;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::time::Instant;
use tracing::debug;

/// Backing store for collection handles
pub trait DocumentStore {
    /// Name of the database the collections belong to
    fn database_name(&self) -> &str;

    /// Run a read against the current state of a collection. A collection
    /// that does not exist reads as empty.
    fn read_collection<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&CollectionData) -> Result<T>;

    /// Run a write against a collection, creating it if needed. Every change
    /// made must be pushed onto the op list.
    fn write_collection<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut CollectionData, &mut Vec<WalOp>) -> Result<T>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Index range chosen by the planner
#[derive(Debug, Clone)]
struct IndexPlan {
    position: usize,
    field: String,
    lower: Bound<Value>,
    upper: Bound<Value>,
    equality: bool,
}

/// Documents produced by a query, with the plan that produced them
#[derive(Debug)]
pub(crate) struct QueryExecution {
    pub documents: Vec<Document>,
    pub plan: PlanStage,
    pub keys_examined: usize,
    pub docs_examined: usize,
}

/// Contents of one collection
#[derive(Debug, Clone)]
pub struct CollectionData {
    name: String,
    documents: BTreeMap<IndexKey, Document>,
    /// `_id_` is always at position 0
    indexes: Vec<Index>,
    /// Bumped on every change; used to detect write conflicts
    version: u64,
}

impl CollectionData {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionData {
            name: name.into(),
            documents: BTreeMap::new(),
            indexes: vec![Index::primary()],
            version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Make the version differ from one an older copy had
    pub(crate) fn bump_version_past(&mut self, other: u64) {
        self.version = self.version.max(other + 1);
    }

    /// Documents in `_id` order
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn get(&self, id: &Value) -> Option<&Document> {
        self.documents.get(&IndexKey::from(id))
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Specifications of the secondary indexes
    pub fn index_models(&self) -> Vec<IndexModel> {
        self.indexes[1..].iter().map(|i| i.model.clone()).collect()
    }

    /// Store a document, generating an `_id` when absent
    pub(crate) fn insert(&mut self, mut doc: Document) -> Result<Value> {
        let id = match doc.id() {
            Some(Value::Array(_)) => {
                return Err(DbError::InvalidQuery("_id cannot be an array".to_string()))
            }
            Some(id) => id.clone(),
            None => {
                let id = Value::ObjectId(ObjectId::new());
                doc.insert(ID_FIELD, id.clone());
                id
            }
        };

        let key = IndexKey::from(&id);
        if self.documents.contains_key(&key) {
            return Err(DbError::DuplicateKey {
                collection: self.name.clone(),
                index: "_id_".to_string(),
                key: format!("{{ _id: {} }}", id),
            });
        }
        for index in &self.indexes {
            index.check_unique(&self.name, &key, &doc)?;
        }

        for index in &mut self.indexes {
            index.insert(&key, &doc);
        }
        self.documents.insert(key, doc);
        self.version += 1;
        Ok(id)
    }

    /// Swap in a new version of an existing document
    pub(crate) fn replace(&mut self, doc: Document) -> Result<()> {
        let id = doc
            .id()
            .cloned()
            .ok_or_else(|| DbError::InvalidUpdate("replacement document has no _id".to_string()))?;
        let key = IndexKey::from(&id);
        if !self.documents.contains_key(&key) {
            return Err(DbError::NotFound(format!("document {} in {}", id, self.name)));
        }

        for index in &self.indexes {
            index.check_unique(&self.name, &key, &doc)?;
        }

        if let Some(old) = self.documents.remove(&key) {
            for index in &mut self.indexes {
                index.remove(&key, &old);
            }
        }
        for index in &mut self.indexes {
            index.insert(&key, &doc);
        }
        self.documents.insert(key, doc);
        self.version += 1;
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &Value) -> Option<Document> {
        let key = IndexKey::from(id);
        let doc = self.documents.remove(&key)?;
        for index in &mut self.indexes {
            index.remove(&key, &doc);
        }
        self.version += 1;
        Some(doc)
    }

    /// Build an index over the current documents. Returns the index name
    /// and whether a new index was created.
    pub(crate) fn create_index(&mut self, model: IndexModel) -> Result<(String, bool)> {
        if model.keys.is_empty() {
            return Err(DbError::InvalidQuery("index key pattern must not be empty".to_string()));
        }

        let name = model.resolved_name();
        for existing in &self.indexes {
            let same_spec = existing.model.keys == model.keys && existing.model.unique == model.unique;
            if existing.name == name && same_spec {
                return Ok((name, false));
            }
            if existing.name == name {
                return Err(DbError::InvalidQuery(format!(
                    "an index named '{}' already exists with different options",
                    name
                )));
            }
            if existing.model.keys == model.keys {
                return Err(DbError::InvalidQuery(format!(
                    "index already exists with a different name: {}",
                    existing.name
                )));
            }
        }

        let mut index = Index::new(model);
        for (key, doc) in &self.documents {
            index.check_unique(&self.name, key, doc)?;
            index.insert(key, doc);
        }
        self.indexes.push(index);
        self.version += 1;
        Ok((name, true))
    }

    pub(crate) fn drop_index(&mut self, name: &str) -> Result<()> {
        if name == "_id_" {
            return Err(DbError::InvalidQuery("cannot drop _id index".to_string()));
        }
        let position = self
            .indexes
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))?;
        self.indexes.remove(position);
        self.version += 1;
        Ok(())
    }

    /// Re-apply a logged change
    pub(crate) fn apply_op(&mut self, op: WalOp) -> Result<()> {
        match op {
            WalOp::Insert { document, .. } => self.insert(document).map(|_| ()),
            WalOp::Replace { document, .. } => self.replace(document),
            WalOp::Delete { id, .. } => {
                self.remove(&id);
                Ok(())
            }
            WalOp::CreateIndex { model, .. } => self.create_index(model).map(|_| ()),
            WalOp::DropIndex { name, .. } => self.drop_index(&name),
        }
    }

    /// Pick an index whose leading field carries an equality or range
    /// condition on a scalar. Equality beats range, unique beats non-unique.
    fn plan(&self, filter: &Filter) -> Option<IndexPlan> {
        let conjuncts = filter.conjuncts();
        let mut best: Option<IndexPlan> = None;

        for (position, index) in self.indexes.iter().enumerate() {
            let Some(field) = index.leading_field() else { continue };
            let mut plan = IndexPlan {
                position,
                field: field.to_string(),
                lower: Bound::Unbounded,
                upper: Bound::Unbounded,
                equality: false,
            };
            let mut constrained = false;

            for conjunct in conjuncts.iter().copied() {
                let Filter::Field {
                    path,
                    condition: Condition::Compare(op, value),
                } = conjunct
                else {
                    continue;
                };
                if path != field || !is_indexable(value) {
                    continue;
                }
                // Ranges from different conditions can't be intersected on a multikey index
                if constrained && (plan.equality || (index.is_multikey() && *op != CompareOp::Eq)) {
                    continue;
                }

                match op {
                    CompareOp::Eq => {
                        plan.lower = Bound::Included(value.clone());
                        plan.upper = Bound::Included(value.clone());
                        plan.equality = true;
                    }
                    CompareOp::Gt => plan.lower = Bound::Excluded(value.clone()),
                    CompareOp::Gte => plan.lower = Bound::Included(value.clone()),
                    CompareOp::Lt => plan.upper = Bound::Excluded(value.clone()),
                    CompareOp::Lte => plan.upper = Bound::Included(value.clone()),
                    CompareOp::Ne => continue,
                }
                constrained = true;
            }

            if !constrained {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    (plan.equality, index.is_unique())
                        > (current.equality, self.indexes[current.position].is_unique())
                }
            };
            if better {
                best = Some(plan);
            }
        }

        best
    }

    /// Run a filter, through an index when one applies
    pub(crate) fn execute(&self, filter: &Filter) -> Result<QueryExecution> {
        match self.plan(filter) {
            Some(plan) => self.index_scan(filter, plan),
            None => self.collection_scan(filter),
        }
    }

    fn collection_scan(&self, filter: &Filter) -> Result<QueryExecution> {
        let mut documents = Vec::new();
        for doc in self.documents.values() {
            if filter.matches(doc)? {
                documents.push(doc.clone());
            }
        }

        let mut stage = PlanStage::new("COLLSCAN");
        if !filter.is_empty() {
            stage.filter = Some(filter.to_json());
        }
        Ok(QueryExecution {
            documents,
            plan: stage,
            keys_examined: 0,
            docs_examined: self.documents.len(),
        })
    }

    fn index_scan(&self, filter: &Filter, plan: IndexPlan) -> Result<QueryExecution> {
        let index = &self.indexes[plan.position];
        let lower = key_bound(&plan.lower);
        let upper = key_bound(&plan.upper);
        let scan = index.scan(lower.as_ref(), upper.as_ref());

        let mut seen = BTreeSet::new();
        let mut documents = Vec::new();
        let mut docs_examined = 0;
        for id in &scan.ids {
            if !seen.insert(id) {
                continue;
            }
            let Some(doc) = self.documents.get(id) else { continue };
            docs_examined += 1;
            if filter.matches(doc)? {
                documents.push(doc.clone());
            }
        }

        let mut ixscan = PlanStage::new("IXSCAN");
        ixscan.index_name = Some(index.name.clone());
        ixscan.key_pattern = Some(index.model.key_pattern().to_json());
        ixscan.is_multi_key = Some(index.is_multikey());
        ixscan.is_unique = Some(index.is_unique());
        ixscan.index_bounds = Some(format!(
            "{}: {}, {}",
            plan.field,
            describe_lower(&plan.lower),
            describe_upper(&plan.upper)
        ));

        let mut fetch = PlanStage::new("FETCH");
        fetch.input_stage = Some(Box::new(ixscan));

        Ok(QueryExecution {
            documents,
            plan: fetch,
            keys_examined: scan.keys_examined,
            docs_examined,
        })
    }

    pub(crate) fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        Ok(options.apply(self.execute(filter)?.documents))
    }

    pub(crate) fn explain(
        &self,
        namespace: String,
        filter: &Filter,
        options: &FindOptions,
        verbosity: Verbosity,
    ) -> Result<Explain> {
        let started = Instant::now();
        let execution = self.execute(filter)?;
        let returned = options.apply(execution.documents).len();
        let elapsed = started.elapsed().as_millis() as u64;

        let mut winning_plan = execution.plan;
        if options.sort.is_some() {
            let mut sort = PlanStage::new("SORT");
            sort.input_stage = Some(Box::new(winning_plan));
            winning_plan = sort;
        }
        if options.effective_limit().is_some() {
            let mut limit = PlanStage::new("LIMIT");
            limit.input_stage = Some(Box::new(winning_plan));
            winning_plan = limit;
        }

        let execution_stats = match verbosity {
            Verbosity::QueryPlanner => None,
            Verbosity::ExecutionStats => Some(ExecutionStats {
                execution_success: true,
                n_returned: returned,
                execution_time_millis: elapsed,
                total_keys_examined: execution.keys_examined,
                total_docs_examined: execution.docs_examined,
            }),
        };

        Ok(Explain {
            query_planner: QueryPlanner {
                namespace,
                parsed_query: filter.to_json(),
                winning_plan,
                rejected_plans: Vec::new(),
            },
            execution_stats,
        })
    }

    pub(crate) fn insert_logged(&mut self, doc: Document, ops: &mut Vec<WalOp>) -> Result<Value> {
        let id = self.insert(doc)?;
        if let Some(stored) = self.get(&id) {
            ops.push(WalOp::Insert {
                collection: self.name.clone(),
                document: stored.clone(),
            });
        }
        Ok(id)
    }

    pub(crate) fn update_logged(
        &mut self,
        filter: &Filter,
        update: &Update,
        multi: bool,
        ops: &mut Vec<WalOp>,
    ) -> Result<UpdateResult> {
        update.validate()?;

        let mut targets = self.execute(filter)?.documents;
        if !multi {
            targets.truncate(1);
        }

        let mut result = UpdateResult::default();
        for mut doc in targets {
            result.matched_count += 1;
            if update.apply(&mut doc)? {
                self.replace(doc.clone())?;
                ops.push(WalOp::Replace {
                    collection: self.name.clone(),
                    document: doc,
                });
                result.modified_count += 1;
            }
        }
        Ok(result)
    }

    pub(crate) fn delete_logged(
        &mut self,
        filter: &Filter,
        multi: bool,
        ops: &mut Vec<WalOp>,
    ) -> Result<DeleteResult> {
        let mut ids: Vec<Value> = self
            .execute(filter)?
            .documents
            .iter()
            .filter_map(|doc| doc.id().cloned())
            .collect();
        if !multi {
            ids.truncate(1);
        }

        let mut result = DeleteResult::default();
        for id in ids {
            if self.remove(&id).is_some() {
                ops.push(WalOp::Delete {
                    collection: self.name.clone(),
                    id,
                });
                result.deleted_count += 1;
            }
        }
        Ok(result)
    }
}

fn is_indexable(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Array(_) | Value::Document(_))
}

fn key_bound(bound: &Bound<Value>) -> Bound<IndexKey> {
    match bound {
        Bound::Included(v) => Bound::Included(IndexKey::from(v)),
        Bound::Excluded(v) => Bound::Excluded(IndexKey::from(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn describe_lower(bound: &Bound<Value>) -> String {
    match bound {
        Bound::Included(v) => format!("[{}", v),
        Bound::Excluded(v) => format!("({}", v),
        Bound::Unbounded => "[MinKey".to_string(),
    }
}

fn describe_upper(bound: &Bound<Value>) -> String {
    match bound {
        Bound::Included(v) => format!("{}]", v),
        Bound::Excluded(v) => format!("{})", v),
        Bound::Unbounded => "MaxKey]".to_string(),
    }
}

/// Handle to a named collection
pub struct Collection<'a, S: DocumentStore> {
    store: &'a S,
    name: String,
}

impl<'a, S: DocumentStore> Collection<'a, S> {
    pub(crate) fn new(store: &'a S, name: &str) -> Self {
        Collection {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `database.collection`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.store.database_name(), self.name)
    }

    pub fn insert_one(&self, doc: impl Into<Document>) -> Result<InsertOneResult> {
        let doc = doc.into();
        let inserted_id = self
            .store
            .write_collection(&self.name, |data, ops| data.insert_logged(doc, ops))?;

        debug!(collection = %self.name, id = %inserted_id, "inserted document");
        Ok(InsertOneResult { inserted_id })
    }

    /// Ordered insert: stops at the first failure, keeping earlier documents
    pub fn insert_many<I>(&self, docs: I) -> Result<InsertManyResult>
    where
        I: IntoIterator,
        I::Item: Into<Document>,
    {
        let docs: Vec<Document> = docs.into_iter().map(Into::into).collect();
        let inserted_ids = self.store.write_collection(&self.name, |data, ops| {
            docs.into_iter()
                .map(|doc| data.insert_logged(doc, ops))
                .collect::<Result<Vec<_>>>()
        })?;

        debug!(collection = %self.name, count = inserted_ids.len(), "inserted documents");
        Ok(InsertManyResult { inserted_ids })
    }

    pub fn find(&self, filter: Filter) -> Find<'a, S> {
        Find {
            store: self.store,
            collection: self.name.clone(),
            filter,
            options: FindOptions::default(),
        }
    }

    pub fn find_one(&self, filter: Filter) -> Result<Option<Document>> {
        Ok(self.find(filter).limit(1).cursor()?.next())
    }

    pub fn count_documents(&self, filter: Filter) -> Result<u64> {
        self.store.read_collection(&self.name, |data| {
            Ok(data.execute(&filter)?.documents.len() as u64)
        })
    }

    pub fn update_one(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.update(filter, update, false)
    }

    pub fn update_many(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.update(filter, update, true)
    }

    fn update(&self, filter: Filter, update: Update, multi: bool) -> Result<UpdateResult> {
        let result = self.store.write_collection(&self.name, |data, ops| {
            data.update_logged(&filter, &update, multi, ops)
        })?;

        debug!(
            collection = %self.name,
            matched = result.matched_count,
            modified = result.modified_count,
            "updated documents"
        );
        Ok(result)
    }

    pub fn delete_one(&self, filter: Filter) -> Result<DeleteResult> {
        self.delete(filter, false)
    }

    pub fn delete_many(&self, filter: Filter) -> Result<DeleteResult> {
        self.delete(filter, true)
    }

    fn delete(&self, filter: Filter, multi: bool) -> Result<DeleteResult> {
        let result = self
            .store
            .write_collection(&self.name, |data, ops| data.delete_logged(&filter, multi, ops))?;

        debug!(collection = %self.name, deleted = result.deleted_count, "deleted documents");
        Ok(result)
    }

    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>> {
        self.store.read_collection(&self.name, |data| {
            pipeline.run(data.documents().cloned().collect())
        })
    }

    /// Create an index; an identical existing index is left alone
    pub fn create_index(&self, model: IndexModel) -> Result<String> {
        let collection = self.name.clone();
        let (name, created) = self.store.write_collection(&self.name, |data, ops| {
            let (name, created) = data.create_index(model.clone())?;
            if created {
                ops.push(WalOp::CreateIndex { collection, model });
            }
            Ok((name, created))
        })?;

        if created {
            debug!(collection = %self.name, index = %name, "created index");
        }
        Ok(name)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let collection = self.name.clone();
        self.store.write_collection(&self.name, |data, ops| {
            data.drop_index(name)?;
            ops.push(WalOp::DropIndex {
                collection,
                name: name.to_string(),
            });
            Ok(())
        })
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexStats>> {
        self.store
            .read_collection(&self.name, |data| Ok(data.indexes().iter().map(Index::stats).collect()))
    }
}

/// Query builder returned by [`Collection::find`]
pub struct Find<'a, S: DocumentStore> {
    store: &'a S,
    collection: String,
    filter: Filter,
    options: FindOptions,
}

impl<'a, S: DocumentStore> Find<'a, S> {
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = skip;
        self
    }

    /// Cap the number of results; 0 means no limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    /// Run the query
    pub fn cursor(self) -> Result<Cursor> {
        Ok(Cursor::new(self.to_vec()?))
    }

    pub fn to_vec(self) -> Result<Vec<Document>> {
        let Find {
            store,
            collection,
            filter,
            options,
        } = self;
        store.read_collection(&collection, |data| data.find(&filter, &options))
    }

    pub fn explain(self, verbosity: Verbosity) -> Result<Explain> {
        let namespace = format!("{}.{}", self.store.database_name(), self.collection);
        self.store.read_collection(&self.collection, |data| {
            data.explain(namespace, &self.filter, &self.options, verbosity)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn productos() -> CollectionData {
        let mut data = CollectionData::new("productos");
        data.insert(doc! { "_id" => 1, "nombre" => "Borojó fresco", "stock" => 30, "tags" => vec!["natural", "orgánico"] }).unwrap();
        data.insert(doc! { "_id" => 2, "nombre" => "Jugo de borojó", "stock" => 50, "tags" => vec!["natural"] }).unwrap();
        data.insert(doc! { "_id" => 3, "nombre" => "Mermelada de borojó", "stock" => 3, "tags" => vec!["dulce"] }).unwrap();
        data
    }

    #[test]
    fn test_insert_generates_id_and_rejects_duplicates() {
        let mut data = productos();
        let id = data.insert(doc! { "nombre" => "Sin id" }).unwrap();
        assert!(matches!(id, Value::ObjectId(_)));
        assert_eq!(data.len(), 4);

        let err = data.insert(doc! { "_id" => 1, "nombre" => "Otro" }).unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey { ref index, .. } if index == "_id_"));

        // 1.0 and 1 are the same key
        assert!(data.insert(doc! { "_id" => 1.0, "nombre" => "Otro" }).is_err());
    }

    #[test]
    fn test_planner_prefers_equality_index() {
        let mut data = productos();
        data.create_index(IndexModel::ascending(["nombre"])).unwrap();
        data.create_index(IndexModel::ascending(["stock"])).unwrap();

        let filter = Filter::and(vec![
            Filter::gt("stock", 10),
            Filter::eq("nombre", "Borojó fresco"),
        ]);
        let execution = data.execute(&filter).unwrap();
        assert_eq!(execution.documents.len(), 1);
        assert_eq!(execution.plan.leaf().index_name.as_deref(), Some("nombre_1"));
        assert_eq!(execution.docs_examined, 1);

        let range = data.execute(&Filter::gt("stock", 10)).unwrap();
        assert_eq!(range.plan.leaf().index_name.as_deref(), Some("stock_1"));
        assert_eq!(range.documents.len(), 2);

        let scan = data.execute(&Filter::regex("nombre", "^Jugo").unwrap()).unwrap();
        assert_eq!(scan.plan.stage, "COLLSCAN");
        assert_eq!(scan.docs_examined, 3);
    }

    #[test]
    fn test_multikey_ranges_are_not_intersected() {
        let mut data = CollectionData::new("t");
        data.create_index(IndexModel::ascending(["tags"])).unwrap();
        data.insert(doc! { "_id" => 1, "tags" => vec!["a", "z"] }).unwrap();

        let filter = Filter::and(vec![Filter::gt("tags", "m"), Filter::lt("tags", "c")]);
        assert_eq!(data.execute(&filter).unwrap().documents.len(), 1);
    }

    #[test]
    fn test_multikey_fetch_is_deduplicated() {
        let mut data = productos();
        data.create_index(IndexModel::ascending(["tags"])).unwrap();

        let execution = data.execute(&Filter::gte("tags", "a")).unwrap();
        assert_eq!(execution.documents.len(), 3);
        assert_eq!(execution.keys_examined, 3);
    }

    #[test]
    fn test_unique_index_on_existing_data() {
        let mut data = CollectionData::new("clientes");
        data.insert(doc! { "_id" => 1, "email" => "ana@email.com" }).unwrap();
        data.insert(doc! { "_id" => 2, "email" => "ana@email.com" }).unwrap();

        assert!(data.create_index(IndexModel::ascending(["email"]).unique(true)).is_err());
        assert_eq!(data.indexes().len(), 1);
    }

    #[test]
    fn test_create_index_is_idempotent() {
        let mut data = productos();
        assert_eq!(data.create_index(IndexModel::ascending(["nombre"])).unwrap(), ("nombre_1".to_string(), true));
        assert_eq!(data.create_index(IndexModel::ascending(["nombre"])).unwrap(), ("nombre_1".to_string(), false));
        assert!(data.create_index(IndexModel::ascending(["nombre"]).unique(true)).is_err());

        data.drop_index("nombre_1").unwrap();
        assert!(matches!(data.drop_index("nombre_1"), Err(DbError::IndexNotFound(_))));
        assert!(data.drop_index("_id_").is_err());
    }

    #[test]
    fn test_update_and_delete_log_ops() {
        let mut data = productos();
        let mut ops = Vec::new();

        let result = data
            .update_logged(&Filter::gt("stock", 10), &Update::new().inc("stock", 1), true, &mut ops)
            .unwrap();
        assert_eq!(result, UpdateResult { matched_count: 2, modified_count: 2 });
        assert_eq!(ops.len(), 2);

        let result = data.delete_logged(&Filter::lt("stock", 5), false, &mut ops).unwrap();
        assert_eq!(result.deleted_count, 1);
        assert!(matches!(ops.last(), Some(WalOp::Delete { id: Value::Int(3), .. })));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_replace_keeps_indexes_consistent() {
        let mut data = productos();
        data.create_index(IndexModel::ascending(["stock"])).unwrap();
        let version = data.version();

        data.replace(doc! { "_id" => 3, "nombre" => "Mermelada de borojó", "stock" => 13 }).unwrap();
        assert!(data.version() > version);
        assert_eq!(data.execute(&Filter::eq("stock", 3)).unwrap().documents.len(), 0);
        assert_eq!(data.execute(&Filter::eq("stock", 13)).unwrap().documents.len(), 1);
    }
}
