// Sales Reconcile - Core Library
// CSV extracts → normalize → dedupe → validate → stage → merge → report

pub mod value;
pub mod relation;
pub mod extract;
pub mod normalize;
pub mod dedupe;
pub mod validate;
pub mod store;
pub mod pipeline;
pub mod report;

// Re-export commonly used types
pub use value::{
    clean_decimal, clean_integer, clean_str, normalize_key_component, parse_date,
    FieldType, Tolerance, Value,
};
pub use relation::{
    by_name, ColumnSpec, ForeignKeySpec, Record, RejectedRow, RelationDescriptor,
    CUSTOMER, DEPENDENCY_ORDER, ORDER, ORDER_LINE, PRODUCT,
};
pub use extract::{read_extract, RawBatch};
pub use normalize::{normalize, NormalizeOutcome};
pub use dedupe::{dedupe, DedupeOutcome};
pub use validate::{validate, ParentKeys, ValidateOutcome};
pub use store::{MergeCounts, Store};
pub use report::{RelationStats, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
