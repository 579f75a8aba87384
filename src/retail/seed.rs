//! Sample data for `la_tienda`
//!
//! Ten products, ten customers, ten sales between January and May 2024 and
//! one inventory lot per product. Customer `compras` point at the sale ids.

use super::models::{Cliente, Inventario, LineaVenta, Producto, Venta};
use super::{CLIENTES, INVENTARIO, PRODUCTOS, VENTAS};
use crate::database::Database;
use crate::document::Document;
use crate::error::Result;
use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

fn fecha(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

fn producto(id: i64, nombre: &str, categoria: &str, precio: f64, stock: i64, tags: &[&str]) -> Producto {
    Producto {
        id,
        nombre: nombre.to_string(),
        categoria: categoria.to_string(),
        precio,
        stock,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn cliente(id: i64, nombre: &str, email: &str, compras: Option<&[i64]>, preferencias: &[&str]) -> Cliente {
    Cliente {
        id,
        nombre: nombre.to_string(),
        email: email.to_string(),
        compras: compras.map(<[i64]>::to_vec),
        preferencias: preferencias.iter().map(|p| p.to_string()).collect(),
    }
}

fn venta(id: i64, cliente_id: i64, lineas: &[(i64, i64)], fecha: DateTime<Utc>, total: f64) -> Venta {
    Venta {
        id,
        cliente_id,
        productos: lineas
            .iter()
            .map(|&(producto_id, cantidad)| LineaVenta { producto_id, cantidad })
            .collect(),
        fecha,
        total,
    }
}

pub fn productos() -> Vec<Producto> {
    vec![
        producto(1, "Borojó fresco", "Fruta", 5000.0, 30, &["natural", "orgánico"]),
        producto(2, "Jugo de borojó", "Bebida", 4000.0, 50, &["natural", "energía"]),
        producto(3, "Borojó deshidratado", "Snack", 6000.0, 12, &["natural", "dulce"]),
        producto(4, "Galletas con borojó", "Snack", 3500.0, 40, &["dulce"]),
        producto(5, "Mermelada de borojó", "Conserva", 8000.0, 3, &["natural", "orgánico", "dulce"]),
        producto(6, "Batido energético", "Bebida", 7000.0, 25, &["energía", "natural"]),
        producto(7, "Té de borojó", "Bebida", 4500.0, 4, &["natural"]),
        producto(8, "Yogur con borojó", "Lácteo", 5500.0, 18, &["orgánico", "natural"]),
        producto(9, "Salsa de borojó", "Conserva", 9000.0, 10, &["picante"]),
        producto(10, "Helado de borojó", "Postre", 6500.0, 22, &["dulce", "frío"]),
    ]
}

pub fn clientes() -> Vec<Cliente> {
    vec![
        cliente(1, "Ana Torres", "ana@email.com", Some(&[1, 3, 6, 10]), &["natural", "orgánico"]),
        cliente(2, "Juan Pérez", "juan@email.com", Some(&[2, 8]), &["energético"]),
        cliente(3, "Luisa Gómez", "luisa@email.com", Some(&[4]), &["dulce", "natural"]),
        cliente(4, "Carlos Ruiz", "carlos@email.com", Some(&[5]), &["energético", "natural"]),
        cliente(5, "María Fernández", "maria@email.com", Some(&[7]), &["orgánico"]),
        cliente(6, "Pedro Zapata", "pedro@email.com", Some(&[9]), &["dulce"]),
        cliente(7, "Sofía Rojas", "sofia@email.com", None, &["natural"]),
        cliente(8, "Andrés Díaz", "andres@email.com", None, &["picante"]),
        cliente(9, "Camila Herrera", "camila@email.com", None, &["dulce", "frío"]),
        cliente(10, "Diego Castro", "diego@email.com", None, &["natural", "energético"]),
    ]
}

pub fn ventas() -> Vec<Venta> {
    vec![
        venta(1, 1, &[(1, 2), (2, 1)], fecha(2024, 1, 15), 14000.0),
        venta(2, 2, &[(3, 1)], fecha(2024, 1, 20), 6000.0),
        venta(3, 1, &[(2, 3)], fecha(2024, 2, 3), 12000.0),
        venta(4, 3, &[(4, 2), (1, 1)], fecha(2024, 2, 14), 12000.0),
        venta(5, 4, &[(6, 1)], fecha(2024, 3, 1), 7000.0),
        venta(6, 1, &[(1, 1)], fecha(2024, 3, 10), 5000.0),
        venta(7, 5, &[(8, 2)], fecha(2024, 3, 22), 11000.0),
        venta(8, 2, &[(2, 2), (10, 1)], fecha(2024, 4, 5), 14500.0),
        venta(9, 6, &[(3, 2)], fecha(2024, 4, 18), 12000.0),
        venta(10, 1, &[(5, 1)], fecha(2024, 5, 2), 8000.0),
    ]
}

/// One lot per product, holding its starting stock
pub fn inventario() -> Vec<Inventario> {
    productos()
        .iter()
        .map(|p| Inventario {
            id: p.id,
            producto_id: p.id,
            lote: format!("L{:03}", p.id),
            cantidad: p.stock,
            entrada: fecha(2024, 1, p.id as u32),
        })
        .collect()
}

/// Product added by the insert exercise
pub fn chocolatina_de_borojo() -> Producto {
    producto(11, "Chocolatina de borojó", "Snack", 4000.0, 35, &["dulce", "energía"])
}

/// Customer added by the insert exercise
pub fn mario_mendoza() -> Cliente {
    cliente(11, "Mario Mendoza", "mario@email.com", None, &["energético", "natural"])
}

/// Insert the sample data into `db`
pub fn load(db: &Database) -> Result<()> {
    let productos = db.collection(PRODUCTOS).insert_many(productos().iter().map(Document::from))?;
    let clientes = db.collection(CLIENTES).insert_many(clientes().iter().map(Document::from))?;
    let ventas = db.collection(VENTAS).insert_many(ventas().iter().map(Document::from))?;
    let inventario = db
        .collection(INVENTARIO)
        .insert_many(inventario().iter().map(Document::from))?;

    info!(
        productos = productos.inserted_ids.len(),
        clientes = clientes.inserted_ids.len(),
        ventas = ventas.inserted_ids.len(),
        inventario = inventario.inserted_ids.len(),
        "loaded sample data"
    );
    Ok(())
}

/// Fresh in-memory `la_tienda` with the sample data
pub fn tienda() -> Result<Database> {
    let db = Database::new(super::DB);
    load(&db)?;
    Ok(db)
}
