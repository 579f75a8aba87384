//! Sale, inventory receipt and return, each as one transaction
//!
//! Every step runs inside `Session::with_transaction`: either all of its
//! writes commit together or none do. Stock is not checked before a sale
//! and a return does not check that the sale exists; both cases are
//! logged as warnings and go through.

use super::models::{Inventario, LineaVenta, Venta};
use super::{INVENTARIO, PRODUCTOS, VENTAS};
use crate::database::Database;
use crate::document::Document;
use crate::error::Result;
use crate::filter::Filter;
use crate::update::Update;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Sale of one product
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRequest {
    pub venta_id: i64,
    pub cliente_id: i64,
    pub producto_id: i64,
    pub cantidad: i64,
    pub total: f64,
    pub fecha: DateTime<Utc>,
}

impl SaleRequest {
    /// One unit, dated now
    pub fn new(venta_id: i64, cliente_id: i64, producto_id: i64, total: f64) -> Self {
        SaleRequest {
            venta_id,
            cliente_id,
            producto_id,
            cantidad: 1,
            total,
            fecha: Utc::now(),
        }
    }

    pub fn cantidad(mut self, cantidad: i64) -> Self {
        self.cantidad = cantidad;
        self
    }

    pub fn fecha(mut self, fecha: DateTime<Utc>) -> Self {
        self.fecha = fecha;
        self
    }

    fn venta(&self) -> Venta {
        Venta {
            id: self.venta_id,
            cliente_id: self.cliente_id,
            productos: vec![LineaVenta {
                producto_id: self.producto_id,
                cantidad: self.cantidad,
            }],
            fecha: self.fecha,
            total: self.total,
        }
    }
}

/// What a return changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnOutcome {
    pub stock_restored: bool,
    pub sale_deleted: bool,
}

/// Take the units out of stock and record the sale
pub fn record_sale(db: &Database, request: &SaleRequest) -> Result<Venta> {
    let venta = request.venta();
    let session = db.start_session();

    session.with_transaction(|s| {
        let productos = s.collection(PRODUCTOS);
        let filter = Filter::eq("_id", request.producto_id);
        let updated = productos.update_one(filter.clone(), Update::new().inc("stock", -request.cantidad))?;
        if updated.matched_count == 0 {
            warn!(producto = request.producto_id, "sale of a product that does not exist");
        } else if let Some(stock) = productos.find_one(filter)?.and_then(|p| p.get_i64("stock").ok()) {
            if stock < 0 {
                warn!(producto = request.producto_id, stock, "sale leaves negative stock");
            }
        }

        s.collection(VENTAS).insert_one(Document::from(&venta))?;
        Ok(())
    })?;

    info!(venta = venta.id, producto = request.producto_id, cantidad = request.cantidad, "sale recorded");
    Ok(venta)
}

/// Record an inventory lot and add its units to stock
pub fn receive_inventory(db: &Database, lote: &Inventario) -> Result<()> {
    let session = db.start_session();

    session.with_transaction(|s| {
        s.collection(INVENTARIO).insert_one(Document::from(lote))?;
        let updated = s.collection(PRODUCTOS).update_one(
            Filter::eq("_id", lote.producto_id),
            Update::new().inc("stock", lote.cantidad),
        )?;
        if updated.matched_count == 0 {
            warn!(producto = lote.producto_id, lote = %lote.lote, "inventory for a product that does not exist");
        }
        Ok(())
    })?;

    info!(lote = %lote.lote, producto = lote.producto_id, cantidad = lote.cantidad, "inventory received");
    Ok(())
}

/// Put the units back in stock and delete the sale
pub fn process_return(db: &Database, venta_id: i64, producto_id: i64, cantidad: i64) -> Result<ReturnOutcome> {
    let session = db.start_session();

    let outcome = session.with_transaction(|s| {
        let updated = s.collection(PRODUCTOS).update_one(
            Filter::eq("_id", producto_id),
            Update::new().inc("stock", cantidad),
        )?;
        let deleted = s.collection(VENTAS).delete_one(Filter::eq("_id", venta_id))?;
        if deleted.deleted_count == 0 {
            warn!(venta = venta_id, producto = producto_id, "return for a sale that does not exist");
        }
        Ok(ReturnOutcome {
            stock_restored: updated.modified_count == 1,
            sale_deleted: deleted.deleted_count == 1,
        })
    })?;

    info!(venta = venta_id, producto = producto_id, cantidad, "return processed");
    Ok(outcome)
}
