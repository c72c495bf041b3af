// 📊 Run Report - per-relation counts + post-merge snapshot
// Read-only output of a pipeline run; performs no writes itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// RELATION STATS
// ============================================================================

/// Everything that happened to one relation during a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationStats {
    pub relation: String,

    /// Rows read from the extract (0 when the extract was missing)
    pub rows_read: usize,

    /// Non-empty values nulled by permissive coercion
    pub coerced_nulls: usize,

    /// Earlier occurrences collapsed by last-wins deduplication
    pub dropped_duplicates: usize,

    /// Rows dropped for a null natural-key component
    pub dropped_null_keys: usize,

    /// Rows routed to the reject sink (malformed + referential failures)
    pub rejected: usize,

    /// Rows bulk-appended to the staging area
    pub staged: i64,

    /// Staged rows inserted as new target rows
    pub inserted: i64,

    /// Staged rows whose key matched an existing target row
    pub updated: i64,

    /// Target row count after the merge
    pub final_count: i64,

    /// Whether this relation's merge transaction committed
    pub committed: bool,

    /// Fatal error for this relation, if any
    pub error: Option<String>,
}

impl RelationStats {
    pub fn new(relation: &str) -> Self {
        RelationStats {
            relation: relation.to_string(),
            ..Default::default()
        }
    }

    pub fn summary(&self) -> String {
        if self.committed {
            format!(
                "{}: read {}, staged {}, inserted {}, updated {}, rejected {}, total {}",
                self.relation,
                self.rows_read,
                self.staged,
                self.inserted,
                self.updated,
                self.rejected,
                self.final_count,
            )
        } else {
            format!(
                "{}: FAILED ({})",
                self.relation,
                self.error.as_deref().unwrap_or("unknown error"),
            )
        }
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Full outcome of one pipeline run, in relation dependency order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub completed_at: DateTime<Utc>,
    pub relations: Vec<RelationStats>,
}

impl RunReport {
    /// True iff every relation's merge committed.
    /// Drives the process exit status.
    pub fn all_committed(&self) -> bool {
        self.relations.iter().all(|r| r.committed)
    }

    pub fn stats_for(&self, relation: &str) -> Option<&RelationStats> {
        self.relations.iter().find(|r| r.relation == relation)
    }
}

// ============================================================================
// TESTS
// ============================================================================
