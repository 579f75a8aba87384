//! Typed records of the store and their document form

use crate::document::{Document, ID_FIELD};
use crate::error::{DbError, Result};
use crate::types::Value;
use chrono::{DateTime, Utc};

/// Product (`productos`)
#[derive(Debug, Clone, PartialEq)]
pub struct Producto {
    pub id: i64,
    pub nombre: String,
    pub categoria: String,
    pub precio: f64,
    pub stock: i64,
    pub tags: Vec<String>,
}

/// Customer (`clientes`)
#[derive(Debug, Clone, PartialEq)]
pub struct Cliente {
    pub id: i64,
    pub nombre: String,
    pub email: String,
    /// Sale ids; `None` when the field is absent or null
    pub compras: Option<Vec<i64>>,
    pub preferencias: Vec<String>,
}

/// One line of a sale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineaVenta {
    pub producto_id: i64,
    pub cantidad: i64,
}

/// Sale (`ventas`)
#[derive(Debug, Clone, PartialEq)]
pub struct Venta {
    pub id: i64,
    pub cliente_id: i64,
    pub productos: Vec<LineaVenta>,
    pub fecha: DateTime<Utc>,
    pub total: f64,
}

/// Inventory lot (`inventario`)
#[derive(Debug, Clone, PartialEq)]
pub struct Inventario {
    pub id: i64,
    pub producto_id: i64,
    pub lote: String,
    pub cantidad: i64,
    pub entrada: DateTime<Utc>,
}

impl Cliente {
    pub fn purchase_count(&self) -> usize {
        self.compras.as_ref().map_or(0, Vec::len)
    }
}

impl Venta {
    pub fn units(&self) -> i64 {
        self.productos.iter().map(|l| l.cantidad).sum()
    }
}

fn strings(doc: &Document, key: &str) -> Result<Vec<String>> {
    doc.get_array(key)?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| DbError::type_mismatch(key, "string", v))
        })
        .collect()
}

fn ints(key: &str, values: &[Value]) -> Result<Vec<i64>> {
    values
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| DbError::type_mismatch(key, "int", v)))
        .collect()
}

impl From<&Producto> for Document {
    fn from(p: &Producto) -> Self {
        let mut doc = Document::new();
        doc.insert(ID_FIELD, p.id);
        doc.insert("nombre", p.nombre.as_str());
        doc.insert("categoria", p.categoria.as_str());
        doc.insert("precio", p.precio);
        doc.insert("stock", p.stock);
        doc.insert("tags", p.tags.clone());
        doc
    }
}

impl TryFrom<&Document> for Producto {
    type Error = DbError;

    fn try_from(doc: &Document) -> Result<Self> {
        Ok(Producto {
            id: doc.get_i64(ID_FIELD)?,
            nombre: doc.get_str("nombre")?.to_string(),
            categoria: doc.get_str("categoria")?.to_string(),
            precio: doc.get_f64("precio")?,
            stock: doc.get_i64("stock")?,
            tags: strings(doc, "tags")?,
        })
    }
}

impl From<&Cliente> for Document {
    fn from(c: &Cliente) -> Self {
        let mut doc = Document::new();
        doc.insert(ID_FIELD, c.id);
        doc.insert("nombre", c.nombre.as_str());
        doc.insert("email", c.email.as_str());
        // No purchases: field left out
        if let Some(compras) = &c.compras {
            doc.insert("compras", compras.clone());
        }
        doc.insert("preferencias", c.preferencias.clone());
        doc
    }
}

impl TryFrom<&Document> for Cliente {
    type Error = DbError;

    fn try_from(doc: &Document) -> Result<Self> {
        let compras = match doc.get("compras") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(ints("compras", items)?),
            Some(other) => return Err(DbError::type_mismatch("compras", "array", other)),
        };
        Ok(Cliente {
            id: doc.get_i64(ID_FIELD)?,
            nombre: doc.get_str("nombre")?.to_string(),
            email: doc.get_str("email")?.to_string(),
            compras,
            preferencias: strings(doc, "preferencias")?,
        })
    }
}

impl From<&LineaVenta> for Document {
    fn from(l: &LineaVenta) -> Self {
        let mut doc = Document::new();
        doc.insert("productoId", l.producto_id);
        doc.insert("cantidad", l.cantidad);
        doc
    }
}

impl From<&Venta> for Document {
    fn from(v: &Venta) -> Self {
        let mut doc = Document::new();
        doc.insert(ID_FIELD, v.id);
        doc.insert("clienteId", v.cliente_id);
        doc.insert(
            "productos",
            v.productos.iter().map(Document::from).collect::<Vec<_>>(),
        );
        doc.insert("fecha", v.fecha);
        doc.insert("total", v.total);
        doc
    }
}

impl TryFrom<&Document> for Venta {
    type Error = DbError;

    fn try_from(doc: &Document) -> Result<Self> {
        let productos = doc
            .get_array("productos")?
            .iter()
            .map(|item| {
                let line = item
                    .as_document()
                    .ok_or_else(|| DbError::type_mismatch("productos", "object", item))?;
                Ok(LineaVenta {
                    producto_id: line.get_i64("productoId")?,
                    cantidad: line.get_i64("cantidad")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Venta {
            id: doc.get_i64(ID_FIELD)?,
            cliente_id: doc.get_i64("clienteId")?,
            productos,
            fecha: doc.get_datetime("fecha")?,
            total: doc.get_f64("total")?,
        })
    }
}

impl From<&Inventario> for Document {
    fn from(i: &Inventario) -> Self {
        let mut doc = Document::new();
        doc.insert(ID_FIELD, i.id);
        doc.insert("productoId", i.producto_id);
        doc.insert("lote", i.lote.as_str());
        doc.insert("cantidad", i.cantidad);
        doc.insert("entrada", i.entrada);
        doc
    }
}

impl TryFrom<&Document> for Inventario {
    type Error = DbError;

    fn try_from(doc: &Document) -> Result<Self> {
        Ok(Inventario {
            id: doc.get_i64(ID_FIELD)?,
            producto_id: doc.get_i64("productoId")?,
            lote: doc.get_str("lote")?.to_string(),
            cantidad: doc.get_i64("cantidad")?,
            entrada: doc.get_datetime("entrada")?,
        })
    }
}

/// Convert a batch of documents into records
pub fn decode_all<'a, T>(docs: impl IntoIterator<Item = &'a Document>) -> Result<Vec<T>>
where
    T: TryFrom<&'a Document, Error = DbError>,
{
    docs.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cliente_without_purchases() {
        let mario = Cliente {
            id: 11,
            nombre: "Mario Mendoza".to_string(),
            email: "mario@email.com".to_string(),
            compras: None,
            preferencias: vec!["energético".to_string(), "natural".to_string()],
        };
        let doc = Document::from(&mario);
        assert!(!doc.contains_key("compras"));
        assert_eq!(Cliente::try_from(&doc).unwrap(), mario);

        let mut with_null = doc.clone();
        with_null.insert("compras", Value::Null);
        assert_eq!(Cliente::try_from(&with_null).unwrap().purchase_count(), 0);
    }

    #[test]
    fn test_venta_document_shape() {
        let venta = Venta {
            id: 1,
            cliente_id: 1,
            productos: vec![
                LineaVenta { producto_id: 1, cantidad: 2 },
                LineaVenta { producto_id: 2, cantidad: 1 },
            ],
            fecha: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            total: 14000.0,
        };
        let doc = Document::from(&venta);
        assert_eq!(doc.get_path("productos.0.productoId"), Some(&Value::Int(1)));
        assert_eq!(
            doc.resolve_path("productos.productoId"),
            vec![&Value::Int(1), &Value::Int(2)]
        );
        assert_eq!(venta.units(), 3);
        assert_eq!(Venta::try_from(&doc).unwrap(), venta);
    }

    #[test]
    fn test_producto_rejects_bad_tags() {
        let mut doc = Document::from(&Producto {
            id: 1,
            nombre: "Borojó fresco".to_string(),
            categoria: "Fruta".to_string(),
            precio: 5000.0,
            stock: 30,
            tags: vec![],
        });
        doc.insert("tags", vec![1, 2]);
        assert!(matches!(Producto::try_from(&doc), Err(DbError::TypeMismatch { .. })));
    }
}
