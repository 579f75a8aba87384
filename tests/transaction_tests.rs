//! Transaction Isolation and Concurrency Tests
//!
//! Sessions see their own writes, nobody else sees them before commit, and
//! concurrent writers either serialize cleanly or get a retryable conflict.

use std::thread;
use tienda_core::retail::{seed, transactions};
use tienda_core::*;

fn stock(db: &Database, id: i64) -> i64 {
    db.collection("productos")
        .find_one(Filter::eq("_id", id))
        .unwrap()
        .unwrap()
        .get_i64("stock")
        .unwrap()
}

/// Retry a transaction body until it commits or fails for a non-transient reason
fn with_retry<T, F>(db: &Database, body: F) -> Result<T>
where
    F: Fn(&Session) -> Result<T>,
{
    loop {
        let session = db.start_session();
        match session.with_transaction(&body) {
            Err(e) if e.is_transient() => continue,
            other => return other,
        }
    }
}

#[test]
fn test_read_your_own_writes() {
    let db = seed::tienda().unwrap();
    let session = db.start_session();
    session.start_transaction().unwrap();

    session
        .collection("productos")
        .update_one(Filter::eq("_id", 1), Update::new().inc("stock", -10))
        .unwrap();
    session
        .collection("ventas")
        .insert_one(doc! { "_id" => 11, "clienteId" => 1, "total" => 50000.0 })
        .unwrap();

    let inside = session
        .collection("productos")
        .find_one(Filter::eq("_id", 1))
        .unwrap()
        .unwrap();
    assert_eq!(inside.get_i64("stock").unwrap(), 20);
    assert_eq!(session.collection("ventas").count_documents(Filter::empty()).unwrap(), 11);

    // Outside the session nothing changed yet
    assert_eq!(stock(&db, 1), 30);
    assert_eq!(db.collection("ventas").count_documents(Filter::empty()).unwrap(), 10);

    session.commit_transaction().unwrap();
    assert_eq!(stock(&db, 1), 20);
    assert_eq!(db.collection("ventas").count_documents(Filter::empty()).unwrap(), 11);
}

#[test]
fn test_snapshot_does_not_see_later_commits() {
    let db = seed::tienda().unwrap();
    let session = db.start_session();
    session.start_transaction().unwrap();

    // First read pins the collection
    assert_eq!(
        session.collection("productos").count_documents(Filter::empty()).unwrap(),
        10
    );
    db.collection("productos").insert_one(doc! { "_id" => 11 }).unwrap();
    assert_eq!(
        session.collection("productos").count_documents(Filter::empty()).unwrap(),
        10
    );
    session.abort_transaction().unwrap();
}

#[test]
fn test_first_committer_wins() {
    let db = seed::tienda().unwrap();
    let a = db.start_session();
    let b = db.start_session();
    a.start_transaction().unwrap();
    b.start_transaction().unwrap();

    a.collection("productos")
        .update_one(Filter::eq("_id", 2), Update::new().inc("stock", -1))
        .unwrap();
    b.collection("productos")
        .update_one(Filter::eq("_id", 2), Update::new().inc("stock", -2))
        .unwrap();

    a.commit_transaction().unwrap();
    let err = b.commit_transaction().unwrap_err();
    assert!(matches!(err, DbError::WriteConflict(ref c) if c == "productos"));
    assert!(err.is_transient());
    assert!(!b.in_transaction());

    assert_eq!(stock(&db, 2), 49);
    let stats = db.transactions().stats();
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.write_conflicts, 1);
    assert_eq!(stats.active, 0);
}

#[test]
fn test_disjoint_collections_do_not_conflict() {
    let db = seed::tienda().unwrap();
    let a = db.start_session();
    let b = db.start_session();
    a.start_transaction().unwrap();
    b.start_transaction().unwrap();

    a.collection("productos")
        .update_one(Filter::eq("_id", 1), Update::new().inc("stock", 1))
        .unwrap();
    b.collection("clientes")
        .update_one(Filter::eq("_id", 1), Update::new().push("preferencias", "dulce"))
        .unwrap();

    a.commit_transaction().unwrap();
    b.commit_transaction().unwrap();
    assert_eq!(stock(&db, 1), 31);
}

#[test]
fn test_read_only_transaction_commits_after_concurrent_write() {
    let db = seed::tienda().unwrap();
    let session = db.start_session();
    session.start_transaction().unwrap();
    session.collection("productos").find_one(Filter::eq("_id", 1)).unwrap();

    db.collection("productos")
        .update_one(Filter::eq("_id", 1), Update::new().inc("stock", 1))
        .unwrap();

    session.commit_transaction().unwrap();
}

#[test]
fn test_concurrent_auto_commit_increments() {
    let db = seed::tienda().unwrap();
    let threads = 8;
    let per_thread = 50;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = db.clone();
            thread::spawn(move || {
                for _ in 0..per_thread {
                    db.collection("productos")
                        .update_one(Filter::eq("_id", 4), Update::new().inc("stock", 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(stock(&db, 4), 40 + threads * per_thread);
}

#[test]
fn test_concurrent_transactions_with_retry() {
    let db = seed::tienda().unwrap();
    let threads = 4;
    let per_thread = 25;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    let venta_id = 1000 + t * per_thread + i;
                    with_retry(&db, |s| {
                        s.collection("productos")
                            .update_one(Filter::eq("_id", 2), Update::new().inc("stock", -1))?;
                        s.collection("ventas").insert_one(doc! {
                            "_id" => venta_id,
                            "clienteId" => 1,
                            "productos" => vec![Value::Document(doc! { "productoId" => 2, "cantidad" => 1 })],
                            "total" => 4000.0,
                        })?;
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let sold = threads * per_thread;
    assert_eq!(stock(&db, 2), 50 - sold);
    assert_eq!(
        db.collection("ventas")
            .count_documents(Filter::gte("_id", 1000))
            .unwrap(),
        sold as u64
    );
    assert_eq!(db.transactions().stats().active, 0);
}

#[test]
fn test_concurrent_sales_and_returns_balance_out() {
    let db = seed::tienda().unwrap();

    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let venta_id = 500 + t * 10 + i;
                    let request = transactions::SaleRequest::new(venta_id, 2, 3, 6000.0);
                    loop {
                        match transactions::record_sale(&db, &request) {
                            Err(e) if e.is_transient() => continue,
                            other => {
                                other.unwrap();
                                break;
                            }
                        }
                    }
                    loop {
                        match transactions::process_return(&db, venta_id, 3, 1) {
                            Err(e) if e.is_transient() => continue,
                            other => {
                                assert!(other.unwrap().sale_deleted);
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(stock(&db, 3), 12);
    assert_eq!(db.collection("ventas").count_documents(Filter::empty()).unwrap(), 10);
}

#[test]
fn test_error_in_body_leaves_no_partial_state() {
    let db = seed::tienda().unwrap();
    let session = db.start_session();

    let err = session
        .with_transaction(|s| {
            s.collection("productos")
                .update_one(Filter::eq("_id", 1), Update::new().inc("stock", -1))?;
            s.collection("inventario").insert_one(doc! { "_id" => 1, "lote" => "L001" })?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
    assert!(!session.in_transaction());
    assert_eq!(stock(&db, 1), 30);
}
