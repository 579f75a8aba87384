//! Runs every La Tienda exercise, in order, against the sample data
//!
//! ```text
//! RUST_LOG=debug cargo run --example la_tienda
//! ```

use chrono::Utc;
use tienda_core::retail::transactions::{self, SaleRequest};
use tienda_core::retail::{functions, indexes, queries, reports, seed, Cliente, Inventario, Producto};
use tienda_core::{Database, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn section(title: &str) {
    println!("\n━━━ {} ━━━\n", title);
}

fn productos(items: &[Producto]) {
    for p in items {
        println!(
            "  #{:<3} {:<24} {:<9} {:>8.0}  stock {:>3}  {:?}",
            p.id, p.nombre, p.categoria, p.precio, p.stock, p.tags
        );
    }
}

fn clientes(items: &[Cliente]) {
    for c in items {
        println!("  #{:<3} {:<18} {:<18} compras {:?}", c.id, c.nombre, c.email, c.compras);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let db: Database = seed::tienda()?;

    section("INSERCIONES");
    let nuevo = queries::insert_product(&db, &seed::chocolatina_de_borojo())?;
    println!("  producto insertado: {}", nuevo.inserted_id);
    let nuevo = queries::insert_customer(&db, &seed::mario_mendoza())?;
    println!("  cliente insertado: {}", nuevo.inserted_id);

    section("LECTURAS");
    println!("stock > 20:");
    productos(&queries::products_with_stock_above(&db, 20)?);
    println!("sin compras:");
    clientes(&queries::customers_without_purchases(&db)?);

    section("ACTUALIZACIONES");
    let r = queries::increase_stock_by_name(&db, "Borojó deshidratado", 10)?;
    println!("  +10 stock: {} modificado(s)", r.modified_count);
    let r = queries::add_tag_to_category(&db, "Bebida", "bajo azúcar")?;
    println!("  tag \"bajo azúcar\": {} modificado(s)", r.modified_count);

    section("ELIMINACIONES");
    let r = queries::delete_customer_by_email(&db, "juan@email.com")?;
    println!("  clientes eliminados: {}", r.deleted_count);
    let r = queries::delete_products_below_stock(&db, 5)?;
    println!("  productos eliminados: {}", r.deleted_count);

    section("EXPRESIONES REGULARES");
    println!("/^Boro/:");
    productos(&queries::products_name_starts_with(&db, "Boro")?);
    println!("/con/:");
    productos(&queries::products_name_contains(&db, "con")?);
    println!("/z/i:");
    clientes(&queries::customers_name_contains_ci(&db, "z")?);

    section("CONSULTAS CON ARRAYS");
    println!("preferencia \"natural\":");
    clientes(&queries::customers_with_preference(&db, "natural")?);
    println!("tags natural + orgánico:");
    productos(&queries::products_with_all_tags(&db, &["natural", "orgánico"])?);
    println!("más de un tag:");
    productos(&queries::products_with_multiple_tags(&db)?);

    section("AGGREGATION FRAMEWORK");
    println!("más vendidos:");
    for r in reports::best_sellers(&db)? {
        println!("  producto {:<3} {:>3} unidades", r.producto_id, r.total_vendido);
    }
    println!("compras por cliente:");
    for r in reports::customers_by_purchase_count(&db)? {
        println!("  cliente {:<3} {:>3} compras", r.cliente_id, r.cantidad_compras);
    }
    println!("ventas por mes:");
    for r in reports::sales_by_month(&db)? {
        println!("  mes {:>2}  {:>10.0}", r.mes, r.total_ventas);
    }
    println!("precio promedio por categoría:");
    for r in reports::average_price_by_category(&db)? {
        println!("  {:<10} {:>10.2}", r.categoria, r.promedio_precio);
    }
    println!("3 con mayor stock:");
    productos(&reports::top_stocked_products(&db, 3)?);

    section("FUNCIONES EN system.js");
    functions::register_all(&db);
    println!("  calcularDescuento(5000, 10) = {}", functions::calcular_descuento(&db, 5000.0, 10.0)?);
    println!("  clienteActivo(1) = {}", functions::cliente_activo(&db, 1)?);
    println!("  verificarStock(1, 5) = {}", functions::verificar_stock(&db, 1, 5)?);

    section("TRANSACCIONES");
    let venta = transactions::record_sale(&db, &SaleRequest::new(11, 1, 1, 5000.0))?;
    println!("  venta {} registrada", venta.id);
    transactions::receive_inventory(
        &db,
        &Inventario {
            id: 11,
            producto_id: 1,
            lote: "L011".to_string(),
            cantidad: 50,
            entrada: Utc::now(),
        },
    )?;
    println!("  lote L011 recibido");
    let devolucion = transactions::process_return(&db, 11, 1, 1)?;
    println!("  devolución: {:?}", devolucion);
    if let Some(p) = queries::find_product(&db, 1)? {
        println!("  stock final de \"{}\": {}", p.nombre, p.stock);
    }

    section("ÍNDICES");
    for name in indexes::create_all(&db)? {
        println!("  índice {}", name);
    }
    let explain = indexes::explain_product_lookup(&db, "Borojó fresco")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&explain.to_json()).unwrap_or_default()
    );

    println!("\n{}", db.stats().format_report());
    Ok(())
}
