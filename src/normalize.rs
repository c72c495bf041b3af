// 🧼 Normalizer - raw rows → canonical attribute set
//
// Contract projection: columns missing from the source are synthesized
// as null, columns not in the contract are discarded. Strings are
// trimmed (empty → null), numerics parsed permissively, dates parsed
// tolerantly. A value that fails to parse follows its column's
// tolerance policy instead of failing the row outright.

use crate::relation::{Record, RejectedRow, RelationDescriptor};
use crate::value::{
    clean_decimal, clean_integer, clean_str, normalize_key_component, parse_date, FieldType,
    Tolerance, Value,
};
use crate::extract::RawBatch;

/// Result of normalizing one relation's raw batch
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    /// Rows that conform to the contract (possibly with nulled values)
    pub records: Vec<Record>,

    /// Rows removed by a RejectRow tolerance policy
    pub rejects: Vec<RejectedRow>,

    /// Count of non-empty values nulled by coercion (NullOnError columns).
    /// Surfaced so silently-masked malformed data stays visible.
    pub coerced_nulls: usize,
}

pub fn normalize(relation: &RelationDescriptor, batch: &RawBatch) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();

    // Map each contract column to its position in the source, if present
    let source_index: Vec<Option<usize>> = relation
        .columns
        .iter()
        .map(|col| batch.header_index(col.name))
        .collect();

    let identity_columns = relation.identity_columns();

    'rows: for row in &batch.rows {
        let mut raw = Vec::with_capacity(relation.columns.len());
        let mut values = Vec::with_capacity(relation.columns.len());

        for (col, src_idx) in relation.columns.iter().zip(&source_index) {
            let cell: &str = src_idx
                .and_then(|i| row.get(i))
                .map(String::as_str)
                .unwrap_or("");
            raw.push(cell.to_string());

            let value = match coerce(cell, col.field_type) {
                Coerced::Value(v) => v,
                Coerced::Null => Value::Null,
                Coerced::Malformed => match col.tolerance {
                    Tolerance::NullOnError => {
                        outcome.coerced_nulls += 1;
                        Value::Null
                    }
                    Tolerance::RejectRow => {
                        outcome.rejects.push(RejectedRow {
                            raw: fill_raw(relation, &source_index, row),
                            reason: format!("malformed_{}", col.name.to_lowercase()),
                        });
                        continue 'rows;
                    }
                },
            };

            // Key and FK components are stored normalized so every later
            // stage compares them under the same case-insensitive policy
            let value = if identity_columns.contains(&col.name) {
                match value {
                    Value::Text(s) => Value::Text(normalize_key_component(&s)),
                    other => other,
                }
            } else {
                value
            };

            values.push(value);
        }

        outcome.records.push(Record { raw, values });
    }

    outcome
}

/// Full raw row in contract shape (for reject rows)
fn fill_raw(
    relation: &RelationDescriptor,
    source_index: &[Option<usize>],
    row: &[String],
) -> Vec<String> {
    relation
        .columns
        .iter()
        .zip(source_index)
        .map(|(_, src_idx)| {
            src_idx
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

enum Coerced {
    Value(Value),
    Null,
    Malformed,
}

fn coerce(cell: &str, field_type: FieldType) -> Coerced {
    let Some(text) = clean_str(cell) else {
        return Coerced::Null;
    };

    match field_type {
        FieldType::Text => Coerced::Value(Value::Text(text)),
        FieldType::Real => match clean_decimal(&text) {
            Some(f) => Coerced::Value(Value::Real(f)),
            None => Coerced::Malformed,
        },
        FieldType::Integer => match clean_integer(&text) {
            Some(i) => Coerced::Value(Value::Integer(i)),
            None => Coerced::Malformed,
        },
        FieldType::Date => match parse_date(&text) {
            Some(d) => Coerced::Value(Value::Date(d)),
            None => Coerced::Malformed,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
