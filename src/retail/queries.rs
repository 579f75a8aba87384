//! Inserts, reads, updates, deletes, regular-expression and array queries

use super::models::{decode_all, Cliente, Producto};
use super::{CLIENTES, PRODUCTOS};
use crate::collection::{DeleteResult, InsertOneResult, UpdateResult};
use crate::database::Database;
use crate::document::Document;
use crate::error::Result;
use crate::expr::Expr;
use crate::filter::Filter;
use crate::types::Value;
use crate::update::Update;

pub fn insert_product(db: &Database, producto: &Producto) -> Result<InsertOneResult> {
    db.collection(PRODUCTOS).insert_one(Document::from(producto))
}

pub fn insert_customer(db: &Database, cliente: &Cliente) -> Result<InsertOneResult> {
    db.collection(CLIENTES).insert_one(Document::from(cliente))
}

fn find_productos(db: &Database, filter: Filter) -> Result<Vec<Producto>> {
    let docs = db.collection(PRODUCTOS).find(filter).to_vec()?;
    decode_all(&docs)
}

fn find_clientes(db: &Database, filter: Filter) -> Result<Vec<Cliente>> {
    let docs = db.collection(CLIENTES).find(filter).to_vec()?;
    decode_all(&docs)
}

/// `{stock: {$gt: min}}`
pub fn products_with_stock_above(db: &Database, min: i64) -> Result<Vec<Producto>> {
    find_productos(db, Filter::gt("stock", min))
}

/// `{compras: null}`: matches both a null and a missing `compras`
pub fn customers_without_purchases(db: &Database) -> Result<Vec<Cliente>> {
    find_clientes(db, Filter::eq("compras", Value::Null))
}

/// `$inc` the stock of the product called `nombre`
pub fn increase_stock_by_name(db: &Database, nombre: &str, amount: i64) -> Result<UpdateResult> {
    db.collection(PRODUCTOS)
        .update_one(Filter::eq("nombre", nombre), Update::new().inc("stock", amount))
}

/// `$push` a tag onto every product of a category
pub fn add_tag_to_category(db: &Database, categoria: &str, tag: &str) -> Result<UpdateResult> {
    db.collection(PRODUCTOS)
        .update_many(Filter::eq("categoria", categoria), Update::new().push("tags", tag))
}

pub fn delete_customer_by_email(db: &Database, email: &str) -> Result<DeleteResult> {
    db.collection(CLIENTES).delete_one(Filter::eq("email", email))
}

/// `{stock: {$lt: limit}}`
pub fn delete_products_below_stock(db: &Database, limit: i64) -> Result<DeleteResult> {
    db.collection(PRODUCTOS).delete_many(Filter::lt("stock", limit))
}

/// `{nombre: /^prefix/}`
pub fn products_name_starts_with(db: &Database, prefix: &str) -> Result<Vec<Producto>> {
    find_productos(db, Filter::regex("nombre", &format!("^{}", regex::escape(prefix)))?)
}

/// `{nombre: /text/}`
pub fn products_name_contains(db: &Database, text: &str) -> Result<Vec<Producto>> {
    find_productos(db, Filter::regex("nombre", &regex::escape(text))?)
}

/// `{nombre: /text/i}`
pub fn customers_name_contains_ci(db: &Database, text: &str) -> Result<Vec<Cliente>> {
    find_clientes(db, Filter::regex_with_options("nombre", &regex::escape(text), "i")?)
}

/// Equality against an array field matches any element
pub fn customers_with_preference(db: &Database, preferencia: &str) -> Result<Vec<Cliente>> {
    find_clientes(db, Filter::eq("preferencias", preferencia))
}

/// `{tags: {$all: tags}}`
pub fn products_with_all_tags(db: &Database, tags: &[&str]) -> Result<Vec<Producto>> {
    find_productos(db, Filter::all("tags", tags.iter().copied()))
}

/// `{$expr: {$gt: [{$size: "$tags"}, 1]}}`
pub fn products_with_multiple_tags(db: &Database) -> Result<Vec<Producto>> {
    let filter = Filter::expr(Expr::gt(
        Expr::size(Expr::field("tags")),
        Expr::literal(1),
    ));
    find_productos(db, filter)
}

pub fn find_product(db: &Database, id: i64) -> Result<Option<Producto>> {
    db.collection(PRODUCTOS)
        .find_one(Filter::eq("_id", id))?
        .map(|doc| Producto::try_from(&doc))
        .transpose()
}

pub fn find_customer(db: &Database, id: i64) -> Result<Option<Cliente>> {
    db.collection(CLIENTES)
        .find_one(Filter::eq("_id", id))?
        .map(|doc| Cliente::try_from(&doc))
        .transpose()
}
