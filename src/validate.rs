// ⚖️ Referential Validator - partition rows by foreign-key resolution
//
// Each child row is checked against the post-merge key sets of its
// parent relations. Valid rows proceed to staging; invalid rows go to
// the reject sink with a reason naming the failing reference. The
// validator never mutates parent sets and never fails the whole batch.

use std::collections::{HashMap, HashSet};

use crate::relation::{Record, RejectedRow, RelationDescriptor};

/// Valid parent key sets, by parent relation name.
/// Keys are already normalized (the store holds them normalized).
pub type ParentKeys = HashMap<&'static str, HashSet<String>>;

/// Result of validating one relation's deduplicated batch
#[derive(Debug, Default)]
pub struct ValidateOutcome {
    pub valid: Vec<Record>,
    pub rejects: Vec<RejectedRow>,
}

pub fn validate(
    relation: &RelationDescriptor,
    records: Vec<Record>,
    parent_keys: &ParentKeys,
) -> ValidateOutcome {
    let mut outcome = ValidateOutcome::default();

    'rows: for record in records {
        // Required columns must be non-null
        for col in relation.columns.iter().filter(|c| c.required) {
            let idx = relation.column_index(col.name);
            if record.values[idx].is_null() {
                outcome.rejects.push(RejectedRow {
                    raw: record.raw.clone(),
                    reason: format!("missing_{}", col.name.to_lowercase()),
                });
                continue 'rows;
            }
        }

        // Every foreign key must resolve against its parent set
        for fk in relation.foreign_keys {
            let idx = relation.column_index(fk.column);
            let Some(key) = record.values[idx].key_text() else {
                // Nullable FK left null: nothing to resolve
                continue;
            };

            let resolves = parent_keys
                .get(fk.parent)
                .map(|set| set.contains(&key))
                .unwrap_or(false);

            if !resolves {
                outcome.rejects.push(RejectedRow {
                    raw: record.raw.clone(),
                    reason: fk.reason.to_string(),
                });
                continue 'rows;
            }
        }

        outcome.valid.push(record);
    }

    outcome
}

// ============================================================================
// TESTS
// ============================================================================
