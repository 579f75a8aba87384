//! CRUD Operations Tests
//!
//! Inserts, finds, updates and deletes through the public collection API,
//! with filters and updates written both with builders and as JSON.

use serde_json::json;
use tienda_core::*;

fn productos_db() -> Database {
    let db = Database::new("la_tienda");
    let docs = vec![
        json!({ "_id": 1, "nombre": "Borojó fresco", "categoria": "Fruta", "precio": 5000, "stock": 30, "tags": ["natural", "orgánico"] }),
        json!({ "_id": 2, "nombre": "Jugo de borojó", "categoria": "Bebida", "precio": 4000, "stock": 50, "tags": ["natural", "energía"] }),
        json!({ "_id": 3, "nombre": "Borojó deshidratado", "categoria": "Snack", "precio": 6000, "stock": 12, "tags": ["natural", "dulce"] }),
        json!({ "_id": 4, "nombre": "Galletas con borojó", "categoria": "Snack", "precio": 3500, "stock": 40, "tags": ["dulce"] }),
    ];
    db.collection("productos")
        .insert_many(docs.into_iter().map(|j| Document::from_json(j).unwrap()))
        .unwrap();
    db
}

fn find_ids(db: &Database, filter: serde_json::Value) -> Vec<i64> {
    db.collection("productos")
        .find(Filter::from_json(&filter).unwrap())
        .to_vec()
        .unwrap()
        .iter()
        .map(|d| d.get_i64("_id").unwrap())
        .collect()
}

#[test]
fn test_insert_and_find_by_id() {
    let db = productos_db();
    let productos = db.collection("productos");

    let result = productos
        .insert_one(doc! { "_id" => 11, "nombre" => "Chocolatina de borojó", "stock" => 35 })
        .unwrap();
    assert_eq!(result.inserted_id, Value::Int(11));

    let found = productos.find_one(Filter::eq("_id", 11)).unwrap().unwrap();
    assert_eq!(found.get_str("nombre").unwrap(), "Chocolatina de borojó");
    assert_eq!(productos.count_documents(Filter::empty()).unwrap(), 5);
}

#[test]
fn test_insert_without_id_generates_object_id() {
    let db = Database::new("la_tienda");
    let clientes = db.collection("clientes");
    let result = clientes.insert_one(doc! { "nombre" => "Mario Mendoza" }).unwrap();

    let Value::ObjectId(oid) = result.inserted_id.clone() else {
        panic!("expected an ObjectId, got {:?}", result.inserted_id);
    };
    assert_eq!(oid.to_string().len(), 24);
    let found = clientes.find_one(Filter::eq("_id", oid)).unwrap().unwrap();
    assert_eq!(found.get_str("nombre").unwrap(), "Mario Mendoza");
}

#[test]
fn test_insert_many_is_ordered() {
    let db = productos_db();
    let productos = db.collection("productos");

    let err = productos
        .insert_many(vec![doc! { "_id" => 20 }, doc! { "_id" => 1 }, doc! { "_id" => 21 }])
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));

    // The document before the failure stays, the one after never went in
    assert!(productos.find_one(Filter::eq("_id", 20)).unwrap().is_some());
    assert!(productos.find_one(Filter::eq("_id", 21)).unwrap().is_none());
}

#[test]
fn test_comparison_filters() {
    let db = productos_db();
    assert_eq!(find_ids(&db, json!({ "stock": { "$gt": 20 } })), vec![1, 2, 4]);
    assert_eq!(find_ids(&db, json!({ "stock": { "$gte": 40, "$lte": 50 } })), vec![2, 4]);
    assert_eq!(find_ids(&db, json!({ "categoria": { "$in": ["Fruta", "Bebida"] } })), vec![1, 2]);
    assert_eq!(find_ids(&db, json!({ "categoria": { "$ne": "Snack" } })), vec![1, 2]);
    // Numbers never match strings
    assert!(find_ids(&db, json!({ "nombre": { "$gt": 0 } })).is_empty());
}

#[test]
fn test_logical_filters() {
    let db = productos_db();
    assert_eq!(
        find_ids(&db, json!({ "$or": [{ "stock": { "$lt": 15 } }, { "precio": 4000 }] })),
        vec![2, 3]
    );
    assert_eq!(
        find_ids(&db, json!({ "categoria": "Snack", "tags": "natural" })),
        vec![3]
    );
    assert_eq!(
        find_ids(&db, json!({ "$nor": [{ "categoria": "Snack" }] })),
        vec![1, 2]
    );
    assert_eq!(
        find_ids(&db, json!({ "stock": { "$not": { "$gt": 20 } } })),
        vec![3]
    );
}

#[test]
fn test_regex_and_array_filters() {
    let db = productos_db();
    assert_eq!(find_ids(&db, json!({ "nombre": { "$regex": "^Boro" } })), vec![1, 3]);
    assert_eq!(find_ids(&db, json!({ "nombre": { "$regex": "BOROJÓ$", "$options": "i" } })), vec![2, 4]);
    assert_eq!(find_ids(&db, json!({ "tags": { "$all": ["natural", "dulce"] } })), vec![3]);
    assert_eq!(find_ids(&db, json!({ "tags": { "$size": 1 } })), vec![4]);
    assert_eq!(
        find_ids(&db, json!({ "$expr": { "$gt": [{ "$size": "$tags" }, 1] } })),
        vec![1, 2, 3]
    );
    assert!(Filter::from_json(&json!({ "nombre": { "$regex": "(" } })).is_err());
}

#[test]
fn test_sort_skip_limit() {
    let db = productos_db();
    let docs = db
        .collection("productos")
        .find(Filter::empty())
        .sort(SortSpec::new().asc("categoria").desc("precio"))
        .skip(1)
        .limit(2)
        .to_vec()
        .unwrap();
    let ids: Vec<i64> = docs.iter().map(|d| d.get_i64("_id").unwrap()).collect();
    // Bebida(2), Fruta(1), Snack 6000(3), Snack 3500(4)
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_update_operators() {
    let db = productos_db();
    let productos = db.collection("productos");

    let update = Update::from_json(&json!({
        "$inc": { "stock": 10 },
        "$push": { "tags": "bajo azúcar" },
        "$set": { "destacado": true }
    }))
    .unwrap();
    let result = productos.update_one(Filter::eq("_id", 2), update).unwrap();
    assert_eq!((result.matched_count, result.modified_count), (1, 1));

    let jugo = productos.find_one(Filter::eq("_id", 2)).unwrap().unwrap();
    assert_eq!(jugo.get_i64("stock").unwrap(), 60);
    assert_eq!(jugo.get_array("tags").unwrap().last(), Some(&Value::from("bajo azúcar")));
    assert_eq!(jugo.get("destacado"), Some(&Value::Bool(true)));

    productos
        .update_many(Filter::empty(), Update::new().pull("tags", "natural").unset("destacado"))
        .unwrap();
    assert_eq!(productos.count_documents(Filter::eq("tags", "natural")).unwrap(), 0);
    assert_eq!(productos.count_documents(Filter::exists("destacado", true)).unwrap(), 0);
}

#[test]
fn test_update_errors() {
    let db = productos_db();
    let productos = db.collection("productos");

    let err = productos
        .update_one(Filter::eq("_id", 1), Update::new().inc("nombre", 1))
        .unwrap_err();
    assert!(matches!(err, DbError::TypeMismatch { .. }));

    let err = productos
        .update_one(Filter::eq("_id", 1), Update::new().set("_id", 99))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidUpdate(_)));

    // No match is not an error
    let result = productos
        .update_one(Filter::eq("_id", 99), Update::new().inc("stock", 1))
        .unwrap();
    assert_eq!(result.matched_count, 0);
}

#[test]
fn test_update_that_changes_nothing() {
    let db = productos_db();
    let result = db
        .collection("productos")
        .update_one(Filter::eq("_id", 1), Update::new().set("categoria", "Fruta"))
        .unwrap();
    assert_eq!((result.matched_count, result.modified_count), (1, 0));
}

#[test]
fn test_delete() {
    let db = productos_db();
    let productos = db.collection("productos");

    assert_eq!(productos.delete_one(Filter::eq("categoria", "Snack")).unwrap().deleted_count, 1);
    assert_eq!(productos.delete_many(Filter::lt("stock", 100)).unwrap().deleted_count, 3);
    assert_eq!(productos.delete_many(Filter::empty()).unwrap().deleted_count, 0);
    assert_eq!(productos.count_documents(Filter::empty()).unwrap(), 0);
}

#[test]
fn test_document_json_round_trip() {
    let json = json!({
        "_id": 1,
        "fecha": { "$date": "2024-01-15T12:00:00+00:00" },
        "productos": [{ "productoId": 1, "cantidad": 2 }],
        "total": 14000.5
    });
    let doc = Document::from_json(json.clone()).unwrap();
    assert!(matches!(doc.get("fecha"), Some(Value::DateTime(_))));
    assert_eq!(doc.get_path("productos.0.cantidad"), Some(&Value::Int(2)));
    assert_eq!(doc.to_json(), json);
}

#[test]
fn test_insert_then_find_by_unique_field() {
    let db = Database::new("la_tienda");
    let clientes = db.collection("clientes");
    clientes
        .create_index(IndexModel::ascending(["email"]).unique(true))
        .unwrap();

    let mario = tienda_core::retail::seed::mario_mendoza();
    clientes.insert_one(Document::from(&mario)).unwrap();

    let found = clientes
        .find_one(Filter::eq("email", "mario@email.com"))
        .unwrap()
        .unwrap();
    assert_eq!(found, Document::from(&mario));
    assert_eq!(tienda_core::retail::Cliente::try_from(&found).unwrap(), mario);
}

#[test]
fn test_large_integer_ids_stay_distinct() {
    let db = Database::new("la_tienda");
    let ventas = db.collection("ventas");
    let big = 1i64 << 53;

    ventas.insert_one(doc! { "_id" => big, "total" => 1000 }).unwrap();
    ventas.insert_one(doc! { "_id" => big + 1, "total" => 2000 }).unwrap();

    let found = ventas.find_one(Filter::eq("_id", big + 1)).unwrap().unwrap();
    assert_eq!(found.get_i64("total").unwrap(), 2000);
    assert_eq!(ventas.count_documents(Filter::empty()).unwrap(), 2);
}

#[test]
fn test_large_integer_range_matches_with_and_without_index() {
    let db = Database::new("la_tienda");
    let productos = db.collection("productos");
    let big = 1i64 << 53;
    productos.insert_one(doc! { "_id" => 1, "stock" => big }).unwrap();
    productos.insert_one(doc! { "_id" => 2, "stock" => big + 1 }).unwrap();

    let scanned = productos.count_documents(Filter::gt("stock", big)).unwrap();
    productos.create_index(IndexModel::ascending(["stock"])).unwrap();
    let explain = productos
        .find(Filter::gt("stock", big))
        .explain(Verbosity::ExecutionStats)
        .unwrap();
    assert!(explain.uses_index());

    assert_eq!(scanned, 1);
    assert_eq!(explain.execution_stats.unwrap().n_returned, 1);
}

#[test]
fn test_limit_zero_returns_everything() {
    let db = productos_db();
    let docs = db
        .collection("productos")
        .find(Filter::empty())
        .limit(0)
        .to_vec()
        .unwrap();
    assert_eq!(docs.len(), 4);
}
