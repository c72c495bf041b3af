// 📋 Relation Descriptors - One generic pipeline, four relations
//
// The whole reconciliation engine is parameterized by these descriptors:
// column contract, natural-key columns, mutable columns, and foreign-key
// dependencies. Adding a fifth relation means adding a descriptor, not a
// code path.

use crate::value::{FieldType, Tolerance, Value};

// ============================================================================
// COLUMN SPEC
// ============================================================================

/// One column of a relation's extract/target contract
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Canonical column name (extract header and target column)
    pub name: &'static str,

    /// Declared type, drives coercion and DDL
    pub field_type: FieldType,

    /// Must be non-null for the row to pass validation
    pub required: bool,

    /// What to do when a non-empty value fails coercion
    pub tolerance: Tolerance,
}

const fn text(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        field_type: FieldType::Text,
        required: false,
        tolerance: Tolerance::NullOnError,
    }
}

const fn key(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        field_type: FieldType::Text,
        required: true,
        tolerance: Tolerance::NullOnError,
    }
}

const fn typed(name: &'static str, field_type: FieldType) -> ColumnSpec {
    ColumnSpec {
        name,
        field_type,
        required: false,
        tolerance: Tolerance::NullOnError,
    }
}

// ============================================================================
// FOREIGN KEY SPEC
// ============================================================================

/// A foreign-key dependency of a child relation
#[derive(Debug, Clone, Copy)]
pub struct ForeignKeySpec {
    /// Column in the child relation holding the parent key
    pub column: &'static str,

    /// Name of the parent relation (see [`by_name`])
    pub parent: &'static str,

    /// Machine-readable reject reason when the reference does not resolve
    pub reason: &'static str,
}

// ============================================================================
// RELATION DESCRIPTOR
// ============================================================================

/// Everything the pipeline needs to know about one relation
#[derive(Debug)]
pub struct RelationDescriptor {
    /// Relation name ("customer", "product", "order", "order_line")
    pub name: &'static str,

    /// Durable target table
    pub table: &'static str,

    /// Staging table, recreated every run
    pub staging_table: &'static str,

    /// Reject table, created on demand
    pub reject_table: &'static str,

    /// Extract file name inside the data directory
    pub extract_file: &'static str,

    /// Column contract, in extract order
    pub columns: &'static [ColumnSpec],

    /// Natural-key columns (composite keys list more than one)
    pub key_columns: &'static [&'static str],

    /// Foreign-key dependencies, in validation order
    pub foreign_keys: &'static [ForeignKeySpec],
}

/// Separator between composite-key components. The store reads keys
/// back with the same separator, so the two sides always agree.
pub(crate) const KEY_SEPARATOR: &str = "\u{1f}";

impl RelationDescriptor {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Index of a column in the contract. Panics on unknown names, which
    /// would be a defect in the descriptor itself.
    pub fn column_index(&self, name: &str) -> usize {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .unwrap_or_else(|| panic!("relation {} has no column {}", self.name, name))
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.key_columns.contains(&name)
    }

    /// Non-key columns, updated in place on merge
    pub fn mutable_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(|c| c.name)
            .filter(|n| !self.is_key_column(n))
            .collect()
    }

    /// Columns that participate in key comparison: the natural key plus
    /// every foreign-key column. These are stored in normalized form.
    pub fn identity_columns(&self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = self.key_columns.to_vec();
        for fk in self.foreign_keys {
            if !cols.contains(&fk.column) {
                cols.push(fk.column);
            }
        }
        cols
    }

    /// Composite natural key of a record, or None if any component is null
    pub fn natural_key(&self, record: &Record) -> Option<String> {
        let mut parts = Vec::with_capacity(self.key_columns.len());
        for col in self.key_columns {
            let idx = self.column_index(col);
            parts.push(record.values[idx].key_text()?);
        }
        Some(parts.join(KEY_SEPARATOR))
    }
}

// ============================================================================
// ROW TYPES
// ============================================================================

/// A normalized row, aligned to its relation's column contract.
/// `raw` keeps the original extract field values for reject routing.
#[derive(Debug, Clone)]
pub struct Record {
    pub raw: Vec<String>,
    pub values: Vec<Value>,
}

/// A row removed from the pipeline, with its original field values
/// and a machine-readable reason tag
#[derive(Debug, Clone)]
pub struct RejectedRow {
    pub raw: Vec<String>,
    pub reason: String,
}

// ============================================================================
// BUILT-IN RELATIONS
// ============================================================================

pub const CUSTOMER: RelationDescriptor = RelationDescriptor {
    name: "customer",
    table: "customers",
    staging_table: "stg_customers",
    reject_table: "rejects_customers",
    extract_file: "customers.csv",
    columns: &[
        key("CustomerID"),
        text("FirstName"),
        text("LastName"),
        text("Email"),
        text("Phone"),
        text("City"),
        text("Country"),
    ],
    key_columns: &["CustomerID"],
    foreign_keys: &[],
};

pub const PRODUCT: RelationDescriptor = RelationDescriptor {
    name: "product",
    table: "products",
    staging_table: "stg_products",
    reject_table: "rejects_products",
    extract_file: "products.csv",
    columns: &[
        key("ProductID"),
        text("ProductName"),
        text("Category"),
        typed("Price", FieldType::Real),
        typed("Stock", FieldType::Integer),
    ],
    key_columns: &["ProductID"],
    foreign_keys: &[],
};

pub const ORDER: RelationDescriptor = RelationDescriptor {
    name: "order",
    table: "orders",
    staging_table: "stg_orders",
    reject_table: "rejects_orders",
    extract_file: "orders.csv",
    columns: &[
        key("OrderID"),
        key("CustomerID"),
        typed("OrderDate", FieldType::Date),
        text("Status"),
    ],
    key_columns: &["OrderID"],
    foreign_keys: &[ForeignKeySpec {
        column: "CustomerID",
        parent: "customer",
        reason: "invalid_customer_fk",
    }],
};

pub const ORDER_LINE: RelationDescriptor = RelationDescriptor {
    name: "order_line",
    table: "order_lines",
    staging_table: "stg_order_lines",
    reject_table: "rejects_order_lines",
    extract_file: "order_lines.csv",
    columns: &[
        key("OrderID"),
        key("ProductID"),
        typed("Quantity", FieldType::Integer),
        typed("TotalPrice", FieldType::Real),
    ],
    key_columns: &["OrderID", "ProductID"],
    foreign_keys: &[
        ForeignKeySpec {
            column: "OrderID",
            parent: "order",
            reason: "invalid_order_fk",
        },
        ForeignKeySpec {
            column: "ProductID",
            parent: "product",
            reason: "invalid_product_fk",
        },
    ],
};

/// All relations in dependency order: parents before children.
/// Order must wait for Customer's merge, OrderLine for Order's and Product's.
pub const DEPENDENCY_ORDER: [&RelationDescriptor; 4] = [&CUSTOMER, &PRODUCT, &ORDER, &ORDER_LINE];

/// Look up a relation by name (used to resolve foreign-key parents)
pub fn by_name(name: &str) -> &'static RelationDescriptor {
    DEPENDENCY_ORDER
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("unknown relation {}", name))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutable_columns_exclude_keys() {
        let mutable = ORDER_LINE.mutable_columns();
        assert_eq!(mutable, vec!["Quantity", "TotalPrice"]);
    }

    #[test]
    fn test_identity_columns_include_fks() {
        let identity = ORDER.identity_columns();
        assert_eq!(identity, vec!["OrderID", "CustomerID"]);
    }

    #[test]
    fn test_natural_key_composite() {
        let record = Record {
            raw: vec!["100".into(), "p-1".into(), "2".into(), "10.0".into()],
            values: vec![
                Value::Text("100".to_string()),
                Value::Text("p-1".to_string()),
                Value::Integer(2),
                Value::Real(10.0),
            ],
        };
        let key = ORDER_LINE.natural_key(&record).unwrap();
        assert_eq!(key, format!("100{}p-1", '\u{1f}'));
    }

    #[test]
    fn test_natural_key_null_component() {
        let record = Record {
            raw: vec!["100".into(), "".into(), "".into(), "".into()],
            values: vec![
                Value::Text("100".to_string()),
                Value::Null,
                Value::Null,
                Value::Null,
            ],
        };
        assert!(ORDER_LINE.natural_key(&record).is_none());
    }

    #[test]
    fn test_dependency_order_parents_first() {
        let position = |name: &str| {
            DEPENDENCY_ORDER
                .iter()
                .position(|r| r.name == name)
                .unwrap()
        };
        for rel in DEPENDENCY_ORDER {
            for fk in rel.foreign_keys {
                assert!(position(fk.parent) < position(rel.name));
            }
        }
    }

    #[test]
    fn test_by_name_resolves_parents() {
        for rel in DEPENDENCY_ORDER {
            for fk in rel.foreign_keys {
                assert_eq!(by_name(fk.parent).name, fk.parent);
            }
        }
    }
}
