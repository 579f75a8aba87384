//! Integration tests for production features
//!
//! Tests secondary indexes and explain, stored functions, statistics and
//! backup/restore

use serde_json::json;
use tempfile::TempDir;
use tienda_core::retail::seed;
use tienda_core::*;

// ============================================================================
// INDEX TESTS
// ============================================================================

#[test]
fn test_create_and_drop_index() {
    let db = seed::tienda().unwrap();
    let productos = db.collection("productos");

    let name = productos.create_index(IndexModel::ascending(["stock"])).unwrap();
    assert_eq!(name, "stock_1");
    let names: Vec<String> = productos.list_indexes().unwrap().into_iter().map(|i| i.name).collect();
    assert_eq!(names, vec!["_id_", "stock_1"]);

    productos.drop_index("stock_1").unwrap();
    assert!(matches!(productos.drop_index("stock_1"), Err(DbError::IndexNotFound(_))));
    assert!(productos.drop_index("_id_").is_err());
}

#[test]
fn test_unique_index_rejects_existing_duplicates() {
    let db = seed::tienda().unwrap();
    let err = db
        .collection("productos")
        .create_index(IndexModel::ascending(["categoria"]).unique(true))
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
    assert_eq!(db.collection("productos").list_indexes().unwrap().len(), 1);
}

#[test]
fn test_unique_index_on_update() {
    let db = seed::tienda().unwrap();
    let clientes = db.collection("clientes");
    clientes
        .create_index(IndexModel::ascending(["email"]).unique(true))
        .unwrap();

    let err = clientes
        .update_one(Filter::eq("_id", 2), Update::new().set("email", "ana@email.com"))
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
    let juan = clientes.find_one(Filter::eq("_id", 2)).unwrap().unwrap();
    assert_eq!(juan.get_str("email").unwrap(), "juan@email.com");
}

#[test]
fn test_multikey_index_on_tags() {
    let db = seed::tienda().unwrap();
    let productos = db.collection("productos");
    productos.create_index(IndexModel::ascending(["tags"])).unwrap();

    let explain = productos
        .find(Filter::eq("tags", "orgánico"))
        .explain(Verbosity::ExecutionStats)
        .unwrap();
    assert!(explain.uses_index());
    assert_eq!(explain.query_planner.winning_plan.leaf().is_multi_key, Some(true));
    assert_eq!(explain.execution_stats.unwrap().n_returned, 3);
}

#[test]
fn test_explain_json_shape() {
    let db = seed::tienda().unwrap();
    let productos = db.collection("productos");
    productos
        .create_index(IndexModel::ascending(["categoria", "precio"]))
        .unwrap();

    let explain = productos
        .find(Filter::and(vec![Filter::eq("categoria", "Bebida"), Filter::gte("precio", 4500.0)]))
        .sort(SortSpec::new().asc("precio"))
        .limit(1)
        .explain(Verbosity::ExecutionStats)
        .unwrap();
    let json = explain.to_json();

    assert_eq!(json["queryPlanner"]["namespace"], "la_tienda.productos");
    let plan = &json["queryPlanner"]["winningPlan"];
    assert_eq!(plan["stage"], "LIMIT");
    assert_eq!(plan["inputStage"]["stage"], "SORT");
    assert_eq!(plan["inputStage"]["inputStage"]["stage"], "FETCH");
    let ixscan = &plan["inputStage"]["inputStage"]["inputStage"];
    assert_eq!(ixscan["stage"], "IXSCAN");
    assert_eq!(ixscan["indexName"], "categoria_1_precio_1");
    assert_eq!(ixscan["keyPattern"], json!({ "categoria": 1, "precio": 1 }));

    // The scan covers every Bebida; the price condition filters after FETCH
    assert_eq!(json["executionStats"]["nReturned"], 1);
    assert_eq!(json["executionStats"]["totalKeysExamined"], 3);
    assert_eq!(json["executionStats"]["totalDocsExamined"], 3);
}

#[test]
fn test_query_planner_verbosity_skips_stats() {
    let db = seed::tienda().unwrap();
    let explain = db
        .collection("productos")
        .find(Filter::gt("stock", 20))
        .explain(Verbosity::QueryPlanner)
        .unwrap();
    assert!(explain.execution_stats.is_none());
    assert_eq!(explain.winning_stage(), "COLLSCAN");
    assert_eq!(explain.to_json()["queryPlanner"]["parsedQuery"], json!({ "stock": { "$gt": 20 } }));
}

// ============================================================================
// STORED FUNCTION TESTS
// ============================================================================

#[test]
fn test_register_and_call_function() {
    let db = seed::tienda().unwrap();
    db.register_function("contarProductos", |db, args| {
        let categoria = args.first().and_then(Value::as_str).unwrap_or("Snack").to_string();
        let n = db
            .collection("productos")
            .count_documents(Filter::eq("categoria", categoria))?;
        Ok(Value::Int(n as i64))
    });

    assert_eq!(db.call_function("contarProductos", &["Bebida".into()]).unwrap(), Value::Int(3));
    assert_eq!(db.call_function("contarProductos", &[]).unwrap(), Value::Int(2));
    assert_eq!(db.function_names(), vec!["contarProductos"]);
}

#[test]
fn test_missing_function() {
    let db = Database::new("la_tienda");
    let err = db.call_function("noExiste", &[]).unwrap_err();
    assert!(matches!(err, DbError::FunctionNotFound(ref name) if name == "noExiste"));
}

#[test]
fn test_replace_and_remove_function() {
    let db = Database::new("la_tienda");
    db.register_function("version", |_, _| Ok(Value::Int(1)));
    db.register_function("version", |_, _| Ok(Value::Int(2)));
    assert_eq!(db.call_function("version", &[]).unwrap(), Value::Int(2));

    assert!(db.remove_function("version"));
    assert!(!db.remove_function("version"));
    assert!(db.function_names().is_empty());
}

#[test]
fn test_function_can_call_function() {
    let db = Database::new("la_tienda");
    db.register_function("doble", |_, args| {
        Ok(Value::Float(args.first().and_then(Value::as_f64).unwrap_or_default() * 2.0))
    });
    db.register_function("cuadruple", |db, args| {
        let doble = db.call_function("doble", args)?;
        db.call_function("doble", &[doble])
    });
    assert_eq!(db.call_function("cuadruple", &[Value::Int(3)]).unwrap(), Value::Float(12.0));
}

// ============================================================================
// STATISTICS TESTS
// ============================================================================

#[test]
fn test_database_stats() {
    let db = seed::tienda().unwrap();
    db.collection("clientes")
        .create_index(IndexModel::ascending(["email"]).unique(true))
        .unwrap();

    let session = db.start_session();
    session.start_transaction().unwrap();

    let stats = db.stats();
    assert_eq!(stats.name, "la_tienda");
    assert_eq!(stats.total_documents, 40);
    assert_eq!(stats.total_indexes, 5);
    assert_eq!(stats.transactions.active, 1);
    assert!(stats.wal_path.is_none());

    let clientes = stats.collection("clientes").unwrap();
    assert_eq!(clientes.documents, 10);
    assert!(clientes.indexes.iter().any(|i| i.name == "email_1" && i.unique));

    let names: Vec<&str> = stats.collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["clientes", "inventario", "productos", "ventas"]);

    session.abort_transaction().unwrap();
    assert_eq!(db.stats().transactions.aborted, 1);
}

#[test]
fn test_stats_report() {
    let db = seed::tienda().unwrap();
    let report = db.stats().format_report();

    assert!(report.contains("DATABASE LA_TIENDA"));
    assert!(report.contains("productos"));
    assert!(report.contains("Total: 40 documents, 4 indexes"));
    assert!(report.contains("(in memory)"));
}

#[test]
fn test_stats_serialize() {
    let db = seed::tienda().unwrap();
    let json = serde_json::to_value(db.stats()).unwrap();
    assert_eq!(json["total_documents"], 40);
    assert_eq!(json["collections"][0]["name"], "clientes");
}

// ============================================================================
// BACKUP TESTS
// ============================================================================

fn backup_manager(dir: &TempDir) -> BackupManager {
    BackupManager::new(BackupConfig {
        backup_dir: dir.path().to_path_buf(),
        compress: true,
        verify: true,
    })
    .unwrap()
}

#[test]
fn test_backup_into_fresh_database() {
    let dir = TempDir::new().unwrap();
    let mut manager = backup_manager(&dir);

    let source = seed::tienda().unwrap();
    source
        .collection("productos")
        .create_index(IndexModel::ascending(["nombre"]))
        .unwrap();
    let metadata = manager.create_full_backup(&source).unwrap();
    assert_eq!(metadata.collection_count, 4);
    assert_eq!(metadata.document_count, 40);
    assert_eq!(manager.last_backup_id(), Some(metadata.backup_id.as_str()));

    let target = Database::new("la_tienda");
    manager.restore_backup(&metadata.backup_id, &target).unwrap();
    assert_eq!(target.stats().total_documents, 40);

    let explain = target
        .collection("productos")
        .find(Filter::eq("nombre", "Borojó fresco"))
        .explain(Verbosity::QueryPlanner)
        .unwrap();
    assert_eq!(explain.index_name(), Some("nombre_1"));
}

#[test]
fn test_restore_unknown_backup() {
    let dir = TempDir::new().unwrap();
    let manager = backup_manager(&dir);
    let db = Database::new("la_tienda");
    assert!(manager.restore_backup("backup_0", &db).is_err());
}

#[test]
fn test_restore_preserves_values() {
    let dir = TempDir::new().unwrap();
    let mut manager = backup_manager(&dir);

    let source = seed::tienda().unwrap();
    let metadata = manager.create_full_backup(&source).unwrap();
    let target = Database::new("la_tienda");
    manager.restore_backup(&metadata.backup_id, &target).unwrap();

    let original = source.collection("ventas").find_one(Filter::eq("_id", 8)).unwrap();
    let restored = target.collection("ventas").find_one(Filter::eq("_id", 8)).unwrap();
    assert_eq!(original, restored);
    assert!(matches!(restored.unwrap().get("fecha"), Some(Value::DateTime(_))));
}
