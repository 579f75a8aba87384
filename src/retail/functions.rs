//! Stored functions of the store
//!
//! Registered in the database's `system.js` registry and called by name;
//! the typed wrappers below check the result type.

use super::{CLIENTES, PRODUCTOS};
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::filter::Filter;
use crate::functions::{argument, number_argument};
use crate::types::Value;

pub const CALCULAR_DESCUENTO: &str = "calcularDescuento";
pub const CLIENTE_ACTIVO: &str = "clienteActivo";
pub const VERIFICAR_STOCK: &str = "verificarStock";

/// Register the three store functions on `db`
pub fn register_all(db: &Database) {
    db.register_function(CALCULAR_DESCUENTO, |_, args| {
        let precio = number_argument(CALCULAR_DESCUENTO, args, 0)?;
        let porcentaje = number_argument(CALCULAR_DESCUENTO, args, 1)?;
        Ok(Value::Float(precio - precio * porcentaje / 100.0))
    });

    // Active: more than three purchases on record
    db.register_function(CLIENTE_ACTIVO, |db, args| {
        let id = argument(CLIENTE_ACTIVO, args, 0)?;
        let cliente = db.collection(CLIENTES).find_one(Filter::eq("_id", id.clone()))?;
        let compras = cliente
            .as_ref()
            .and_then(|c| c.get("compras"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(Value::Bool(compras > 3))
    });

    db.register_function(VERIFICAR_STOCK, |db, args| {
        let id = argument(VERIFICAR_STOCK, args, 0)?;
        let cantidad = number_argument(VERIFICAR_STOCK, args, 1)?;
        let producto = db.collection(PRODUCTOS).find_one(Filter::eq("_id", id.clone()))?;
        let stock = producto
            .as_ref()
            .and_then(|p| p.get("stock"))
            .and_then(Value::as_f64);
        Ok(Value::Bool(stock.is_some_and(|s| s >= cantidad)))
    });
}

fn expect_bool(name: &str, value: Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| DbError::FunctionFailed {
        name: name.to_string(),
        reason: format!("expected a boolean result, got {}", value.type_name()),
    })
}

/// Price after a percentage discount
pub fn calcular_descuento(db: &Database, precio: f64, porcentaje: f64) -> Result<f64> {
    let value = db.call_function(CALCULAR_DESCUENTO, &[precio.into(), porcentaje.into()])?;
    value.as_f64().ok_or_else(|| DbError::FunctionFailed {
        name: CALCULAR_DESCUENTO.to_string(),
        reason: format!("expected a number, got {}", value.type_name()),
    })
}

pub fn cliente_activo(db: &Database, cliente_id: i64) -> Result<bool> {
    expect_bool(CLIENTE_ACTIVO, db.call_function(CLIENTE_ACTIVO, &[cliente_id.into()])?)
}

/// Whether the product has at least `cantidad` units
pub fn verificar_stock(db: &Database, producto_id: i64, cantidad: i64) -> Result<bool> {
    expect_bool(
        VERIFICAR_STOCK,
        db.call_function(VERIFICAR_STOCK, &[producto_id.into(), cantidad.into()])?,
    )
}
