//! The `la_tienda` retail exercises
//!
//! Products, customers, sales and inventory lots, with every read, write,
//! report, stored function, transaction and index of the store expressed
//! as a typed operation over [`Database`](crate::Database).

pub mod functions;
pub mod indexes;
pub mod models;
pub mod queries;
pub mod reports;
pub mod seed;
pub mod transactions;

pub use models::{Cliente, Inventario, LineaVenta, Producto, Venta};

/// Database name
pub const DB: &str = "la_tienda";

pub const PRODUCTOS: &str = "productos";
pub const CLIENTES: &str = "clientes";
pub const VENTAS: &str = "ventas";
pub const INVENTARIO: &str = "inventario";
