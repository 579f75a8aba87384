//! Indexes of the store and the product lookup explain

use super::{CLIENTES, PRODUCTOS};
use crate::database::Database;
use crate::error::Result;
use crate::explain::{Explain, Verbosity};
use crate::filter::Filter;
use crate::index::IndexModel;
use tracing::info;

/// `{nombre: 1}` on products
pub fn product_name_index() -> IndexModel {
    IndexModel::ascending(["nombre"])
}

/// `{categoria: 1, precio: 1}` on products
pub fn category_price_index() -> IndexModel {
    IndexModel::ascending(["categoria", "precio"])
}

/// `{email: 1}`, unique, on customers
pub fn customer_email_index() -> IndexModel {
    IndexModel::ascending(["email"]).unique(true)
}

/// Create the three indexes; returns their names. Safe to run again.
pub fn create_all(db: &Database) -> Result<Vec<String>> {
    let productos = db.collection(PRODUCTOS);
    let clientes = db.collection(CLIENTES);

    let names = vec![
        productos.create_index(product_name_index())?,
        productos.create_index(category_price_index())?,
        clientes.create_index(customer_email_index())?,
    ];
    info!(indexes = ?names, "store indexes ready");
    Ok(names)
}

/// `find({nombre: ...}).explain("executionStats")`
pub fn explain_product_lookup(db: &Database, nombre: &str) -> Result<Explain> {
    db.collection(PRODUCTOS)
        .find(Filter::eq("nombre", nombre))
        .explain(Verbosity::ExecutionStats)
}
