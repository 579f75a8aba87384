//! Property tests over the sample store

use proptest::prelude::*;
use tienda_core::retail::{seed, Producto};
use tienda_core::*;

fn productos(db: &Database) -> Vec<Producto> {
    let docs = db
        .collection("productos")
        .find(Filter::empty())
        .to_vec()
        .unwrap();
    docs.iter().map(|d| Producto::try_from(d).unwrap()).collect()
}

fn sorted_ids(docs: &[Document]) -> Vec<i64> {
    let mut ids: Vec<i64> = docs.iter().map(|d| d.get_i64("_id").unwrap()).collect();
    ids.sort_unstable();
    ids
}

const CATEGORIAS: [&str; 6] = ["Fruta", "Bebida", "Snack", "Conserva", "Lácteo", "Postre"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn inc_touches_only_the_target(id in 1i64..=10, amount in -100i64..100) {
        let db = seed::tienda().unwrap();
        let before = productos(&db);

        db.collection("productos")
            .update_one(Filter::eq("_id", id), Update::new().inc("stock", amount))
            .unwrap();

        for (old, new) in before.iter().zip(productos(&db)) {
            if old.id == id {
                prop_assert_eq!(new.stock, old.stock + amount);
                prop_assert_eq!(&new.nombre, &old.nombre);
            } else {
                prop_assert_eq!(old, &new);
            }
        }
    }

    #[test]
    fn delete_below_removes_exactly_the_matches(limit in 0i64..60) {
        let db = seed::tienda().unwrap();
        let expected: Vec<i64> = seed::productos()
            .iter()
            .filter(|p| p.stock >= limit)
            .map(|p| p.id)
            .collect();

        let deleted = db
            .collection("productos")
            .delete_many(Filter::lt("stock", limit))
            .unwrap()
            .deleted_count;

        prop_assert_eq!(deleted as usize, 10 - expected.len());
        let remaining: Vec<i64> = productos(&db).iter().map(|p| p.id).collect();
        prop_assert_eq!(remaining, expected);
    }

    #[test]
    fn push_appends_one_tag_per_match(categoria in prop::sample::select(CATEGORIAS.to_vec()), tag in "[a-z]{3,10}") {
        let db = seed::tienda().unwrap();
        let before = productos(&db);

        let result = db
            .collection("productos")
            .update_many(Filter::eq("categoria", categoria), Update::new().push("tags", tag.as_str()))
            .unwrap();

        let matching = before.iter().filter(|p| p.categoria == categoria).count() as u64;
        prop_assert_eq!(result.modified_count, matching);
        for (old, new) in before.iter().zip(productos(&db)) {
            if old.categoria == categoria {
                prop_assert_eq!(new.tags.len(), old.tags.len() + 1);
                prop_assert_eq!(new.tags.last(), Some(&tag));
            } else {
                prop_assert_eq!(&new.tags, &old.tags);
            }
        }
    }

    #[test]
    fn index_scan_agrees_with_collection_scan(
        categoria in prop::sample::select(CATEGORIAS.to_vec()),
        min in 0i64..10_000,
        span in 0i64..5_000,
    ) {
        let db = seed::tienda().unwrap();
        let filter = Filter::and(vec![
            Filter::eq("categoria", categoria),
            Filter::gte("precio", min as f64),
            Filter::lte("precio", (min + span) as f64),
        ]);
        let productos = db.collection("productos");

        let scanned = productos.find(filter.clone()).to_vec().unwrap();
        productos.create_index(IndexModel::ascending(["categoria", "precio"])).unwrap();
        let explain = productos.find(filter.clone()).explain(Verbosity::QueryPlanner).unwrap();
        prop_assert!(explain.uses_index());
        let indexed = productos.find(filter).to_vec().unwrap();

        prop_assert_eq!(sorted_ids(&scanned), sorted_ids(&indexed));
    }
}
