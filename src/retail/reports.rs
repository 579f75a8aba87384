//! Aggregation reports over sales and products

use super::models::{decode_all, Producto};
use super::{PRODUCTOS, VENTAS};
use crate::aggregation::{Accumulator, Pipeline};
use crate::cursor::SortSpec;
use crate::database::Database;
use crate::document::{Document, ID_FIELD};
use crate::error::Result;
use crate::expr::Expr;
use crate::filter::Filter;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSales {
    pub producto_id: i64,
    pub total_vendido: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerPurchases {
    pub cliente_id: i64,
    pub cantidad_compras: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySales {
    /// 1 to 12
    pub mes: i64,
    pub total_ventas: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAverage {
    pub categoria: String,
    pub promedio_precio: f64,
}

/// Units sold per product, best first
pub fn best_sellers_pipeline() -> Pipeline {
    Pipeline::new()
        .unwind("productos")
        .group(
            Expr::field("productos.productoId"),
            [("total_vendido", Accumulator::Sum(Expr::field("productos.cantidad")))],
        )
        .sort(SortSpec::new().desc("total_vendido"))
}

/// Sales per customer, most first
pub fn customers_by_purchase_count_pipeline() -> Pipeline {
    Pipeline::new()
        .group(Expr::field("clienteId"), [("cantidad_compras", Accumulator::count())])
        .sort(SortSpec::new().desc("cantidad_compras"))
}

/// Sales total per calendar month, in month order
pub fn sales_by_month_pipeline() -> Pipeline {
    Pipeline::new()
        .group(
            Expr::document([("mes", Expr::month(Expr::field("fecha")))]),
            [("total_ventas", Accumulator::Sum(Expr::field("total")))],
        )
        .sort(SortSpec::new().asc("_id.mes"))
}

/// Average price per category, highest first
pub fn average_price_by_category_pipeline() -> Pipeline {
    Pipeline::new()
        .group(
            Expr::field("categoria"),
            [("promedio_precio", Accumulator::Avg(Expr::field("precio")))],
        )
        .sort(SortSpec::new().desc("promedio_precio"))
}

pub fn best_sellers(db: &Database) -> Result<Vec<ProductSales>> {
    db.collection(VENTAS)
        .aggregate(&best_sellers_pipeline())?
        .iter()
        .map(|doc| {
            Ok(ProductSales {
                producto_id: doc.get_i64(ID_FIELD)?,
                total_vendido: doc.get_i64("total_vendido")?,
            })
        })
        .collect()
}

pub fn customers_by_purchase_count(db: &Database) -> Result<Vec<CustomerPurchases>> {
    db.collection(VENTAS)
        .aggregate(&customers_by_purchase_count_pipeline())?
        .iter()
        .map(|doc| {
            Ok(CustomerPurchases {
                cliente_id: doc.get_i64(ID_FIELD)?,
                cantidad_compras: doc.get_i64("cantidad_compras")?,
            })
        })
        .collect()
}

pub fn sales_by_month(db: &Database) -> Result<Vec<MonthlySales>> {
    db.collection(VENTAS)
        .aggregate(&sales_by_month_pipeline())?
        .iter()
        .map(|doc| {
            Ok(MonthlySales {
                mes: doc.get_i64("_id.mes")?,
                total_ventas: doc.get_f64("total_ventas")?,
            })
        })
        .collect()
}

pub fn average_price_by_category(db: &Database) -> Result<Vec<CategoryAverage>> {
    db.collection(PRODUCTOS)
        .aggregate(&average_price_by_category_pipeline())?
        .iter()
        .map(|doc| {
            Ok(CategoryAverage {
                categoria: doc.get_str(ID_FIELD)?.to_string(),
                promedio_precio: doc.get_f64("promedio_precio")?,
            })
        })
        .collect()
}

/// `find().sort({stock: -1}).limit(n)`
pub fn top_stocked_products(db: &Database, n: usize) -> Result<Vec<Producto>> {
    let docs: Vec<Document> = db
        .collection(PRODUCTOS)
        .find(Filter::empty())
        .sort(SortSpec::new().desc("stock"))
        .limit(n)
        .to_vec()?;
    decode_all(&docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retail::seed;
    use serde_json::json;

    #[test]
    fn test_best_sellers() {
        let db = seed::tienda().unwrap();
        let ranking = best_sellers(&db).unwrap();
        let top: Vec<(i64, i64)> = ranking.iter().map(|r| (r.producto_id, r.total_vendido)).collect();
        assert_eq!(&top[..3], &[(2, 6), (1, 4), (3, 3)]);
        assert_eq!(ranking.len(), 8);
        assert_eq!(ranking.iter().map(|r| r.total_vendido).sum::<i64>(), 20);
    }

    #[test]
    fn test_customers_by_purchase_count() {
        let db = seed::tienda().unwrap();
        let counts = customers_by_purchase_count(&db).unwrap();
        assert_eq!(counts[0], CustomerPurchases { cliente_id: 1, cantidad_compras: 4 });
        assert_eq!(counts[1], CustomerPurchases { cliente_id: 2, cantidad_compras: 2 });
        assert!(counts[2..].iter().all(|c| c.cantidad_compras == 1));
        assert_eq!(counts.len(), 6);
    }

    #[test]
    fn test_sales_by_month() {
        let db = seed::tienda().unwrap();
        let months: Vec<(i64, f64)> = sales_by_month(&db)
            .unwrap()
            .iter()
            .map(|m| (m.mes, m.total_ventas))
            .collect();
        assert_eq!(
            months,
            vec![(1, 20000.0), (2, 24000.0), (3, 23000.0), (4, 26500.0), (5, 8000.0)]
        );
    }

    #[test]
    fn test_average_price_by_category() {
        let db = seed::tienda().unwrap();
        let averages = average_price_by_category(&db).unwrap();
        let categorias: Vec<&str> = averages.iter().map(|a| a.categoria.as_str()).collect();
        assert_eq!(categorias, vec!["Conserva", "Postre", "Lácteo", "Bebida", "Fruta", "Snack"]);
        assert_eq!(averages[0].promedio_precio, 8500.0);
        assert!((averages[3].promedio_precio - 5166.67).abs() < 0.01);
    }

    #[test]
    fn test_top_stocked_products() {
        let db = seed::tienda().unwrap();
        let top: Vec<(i64, i64)> = top_stocked_products(&db, 3)
            .unwrap()
            .iter()
            .map(|p| (p.id, p.stock))
            .collect();
        assert_eq!(top, vec![(2, 50), (4, 40), (1, 30)]);
    }

    #[test]
    fn test_pipelines_match_json_syntax() {
        let db = seed::tienda().unwrap();
        let ventas = db.collection(VENTAS);

        let parsed = Pipeline::from_json(&json!([
            { "$unwind": "$productos" },
            { "$group": { "_id": "$productos.productoId", "total_vendido": { "$sum": "$productos.cantidad" } } },
            { "$sort": { "total_vendido": -1 } }
        ]))
        .unwrap();
        assert_eq!(
            ventas.aggregate(&parsed).unwrap(),
            ventas.aggregate(&best_sellers_pipeline()).unwrap()
        );

        let parsed = Pipeline::from_json(&json!([
            { "$group": { "_id": { "mes": { "$month": "$fecha" } }, "total_ventas": { "$sum": "$total" } } },
            { "$sort": { "_id.mes": 1 } }
        ]))
        .unwrap();
        assert_eq!(
            ventas.aggregate(&parsed).unwrap(),
            ventas.aggregate(&sales_by_month_pipeline()).unwrap()
        );
    }
}
