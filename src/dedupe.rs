// 🔍 Deduplicator - collapse natural-key collisions within one batch
//
// Policy is deterministic last-wins: among rows sharing a key, the one
// occurring latest in extraction order survives. Rows with a null key
// component are dropped silently - they cannot be reconciled.

use std::collections::HashMap;

use crate::relation::{Record, RelationDescriptor};

/// Result of deduplicating one relation's normalized batch
#[derive(Debug, Default)]
pub struct DedupeOutcome {
    /// Unique-key rows, last occurrence retained
    pub records: Vec<Record>,

    /// Earlier occurrences replaced by a later row with the same key
    pub dropped_duplicates: usize,

    /// Rows dropped because a natural-key component was null
    pub dropped_null_keys: usize,
}

pub fn dedupe(relation: &RelationDescriptor, records: Vec<Record>) -> DedupeOutcome {
    let mut outcome = DedupeOutcome::default();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Record> = Vec::with_capacity(records.len());

    for record in records {
        let Some(key) = relation.natural_key(&record) else {
            outcome.dropped_null_keys += 1;
            continue;
        };

        match seen.get(&key) {
            Some(&pos) => {
                // Last wins: replace the earlier occurrence in place
                kept[pos] = record;
                outcome.dropped_duplicates += 1;
            }
            None => {
                seen.insert(key, kept.len());
                kept.push(record);
            }
        }
    }

    outcome.records = kept;
    outcome
}

// ============================================================================
// TESTS
// ============================================================================
