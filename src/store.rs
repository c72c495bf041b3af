// 🗄️ Relational Store - SQLite target, staging areas, reject sink
//
// The store handle is constructed explicitly and passed by reference
// into every stage; no module-level connection state. Staging tables
// mirror the target shape with no constraints and are recreated every
// run. The merge is one atomic upsert per relation, set-based on the
// natural key.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use crate::relation::{by_name, Record, RejectedRow, RelationDescriptor, KEY_SEPARATOR};

/// Counts from one relation's merge transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeCounts {
    /// Rows present in the staging area
    pub staged: i64,
    /// Staged rows whose key already existed in the target (updated in place)
    pub updated: i64,
    /// Staged rows with no target counterpart (inserted as new)
    pub inserted: i64,
}

/// Handle on the durable relational store
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Store {
            conn: Connection::open_in_memory().context("Failed to open in-memory store")?,
        })
    }

    /// Direct access for read-only inspection (reporting, tests)
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // PROVISIONING
    // ========================================================================

    /// Create the target schema if it does not exist. Idempotent.
    ///
    /// WAL mode for crash recovery; foreign_keys pragma so the store
    /// itself enforces the referential invariants the validator checks.
    pub fn provision(&self) -> Result<()> {
        // journal_mode returns a row ("wal" on files, "memory" in tests)
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        self.conn.pragma_update(None, "foreign_keys", true)?;

        for relation in crate::relation::DEPENDENCY_ORDER {
            self.conn
                .execute(&target_ddl(relation), [])
                .with_context(|| format!("Failed to create table {}", relation.table))?;
        }

        Ok(())
    }

    // ========================================================================
    // STAGING
    // ========================================================================

    /// Drop and recreate the staging table for a relation, empty.
    /// Same column shape as the target, no constraints enforced.
    pub fn recreate_staging(&mut self, relation: &RelationDescriptor) -> Result<()> {
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; {ddl}",
            table = quote_ident(relation.staging_table),
            ddl = staging_ddl(relation),
        ))?;
        Ok(())
    }

    /// Bulk-append validated rows into the staging area.
    /// One transaction; failure here is fatal for the relation's run.
    pub fn stage(&mut self, relation: &RelationDescriptor, records: &[Record]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let placeholders: Vec<String> =
                (1..=relation.columns.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {table} ({cols}) VALUES ({vals})",
                table = quote_ident(relation.staging_table),
                cols = quoted_list(&relation.column_names()),
                vals = placeholders.join(", "),
            );
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                stmt.execute(rusqlite::params_from_iter(record.values.iter()))
                    .with_context(|| format!("Failed to stage row for {}", relation.name))?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to commit staging for {}", relation.name))?;
        Ok(records.len())
    }

    /// Drop the staging area. Called at run end regardless of outcome;
    /// staging carries no identity across runs.
    pub fn drop_staging(&mut self, relation: &RelationDescriptor) -> Result<()> {
        self.conn.execute(
            &format!("DROP TABLE IF EXISTS {}", quote_ident(relation.staging_table)),
            [],
        )?;
        Ok(())
    }

    // ========================================================================
    // MERGE
    // ========================================================================

    /// Atomically upsert the staging area into the target relation.
    ///
    /// Matched keys update every mutable column; unmatched staging rows
    /// insert as new; target rows absent from staging are untouched.
    /// Single transaction: all of it commits or none of it does. Re-running
    /// with an unchanged staging snapshot leaves the target identical.
    pub fn merge(&mut self, relation: &RelationDescriptor) -> Result<MergeCounts> {
        let tx = self.conn.transaction()?;

        let staged: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(relation.staging_table)),
            [],
            |row| row.get(0),
        )?;

        // Set-based match count: staged rows whose key already exists
        let join: Vec<String> = relation
            .key_columns
            .iter()
            .map(|k| format!("s.{col} = t.{col}", col = quote_ident(k)))
            .collect();
        let updated: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {stg} s JOIN {target} t ON {on}",
                stg = quote_ident(relation.staging_table),
                target = quote_ident(relation.table),
                on = join.join(" AND "),
            ),
            [],
            |row| row.get(0),
        )?;

        tx.execute(&upsert_sql(relation), []).with_context(|| {
            format!("Merge failed for relation {}", relation.name)
        })?;

        tx.commit()
            .with_context(|| format!("Failed to commit merge for {}", relation.name))?;

        Ok(MergeCounts {
            staged,
            updated,
            inserted: staged - updated,
        })
    }

    // ========================================================================
    // KEY SETS & COUNTS
    // ========================================================================

    /// Current natural-key set of a relation's target table, post-merge.
    /// Keys are stored normalized, so this set is directly comparable
    /// with the validator's foreign-key values.
    pub fn key_set(&self, relation: &RelationDescriptor) -> Result<HashSet<String>> {
        let sql = format!(
            "SELECT {cols} FROM {table}",
            cols = quoted_list(relation.key_columns),
            table = quote_ident(relation.table),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let n = relation.key_columns.len();

        let keys = stmt
            .query_map([], |row| {
                let mut parts = Vec::with_capacity(n);
                for i in 0..n {
                    let value: rusqlite::types::Value = row.get(i)?;
                    parts.push(match value {
                        rusqlite::types::Value::Text(s) => s,
                        rusqlite::types::Value::Integer(i) => i.to_string(),
                        rusqlite::types::Value::Real(f) => f.to_string(),
                        _ => String::new(),
                    });
                }
                Ok(parts.join(KEY_SEPARATOR))
            })?
            .collect::<std::result::Result<HashSet<_>, _>>()?;

        Ok(keys)
    }

    /// Row count of a target relation (read-only, for the summary report)
    pub fn row_count(&self, relation: &RelationDescriptor) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(relation.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // REJECT SINK
    // ========================================================================

    /// Append rejected rows to the relation's reject table, created on
    /// demand. Original field values are kept verbatim, plus the reason
    /// tag, the run id, and a timestamp. Append-only; no delete path.
    pub fn append_rejects(
        &mut self,
        relation: &RelationDescriptor,
        rejects: &[RejectedRow],
        run_id: &str,
    ) -> Result<usize> {
        if rejects.is_empty() {
            return Ok(0);
        }

        self.conn.execute(&reject_ddl(relation), [])?;

        let tx = self.conn.transaction()?;
        {
            let n = relation.columns.len();
            let placeholders: Vec<String> = (1..=n + 2).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {table} ({cols}, reject_reason, run_id) VALUES ({vals})",
                table = quote_ident(relation.reject_table),
                cols = quoted_list(&relation.column_names()),
                vals = placeholders.join(", "),
            );
            let mut stmt = tx.prepare(&sql)?;
            for reject in rejects {
                let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(n + 2);
                for raw in &reject.raw {
                    params.push(raw);
                }
                params.push(&reject.reason);
                params.push(&run_id);
                stmt.execute(params.as_slice())
                    .with_context(|| format!("Failed to append reject for {}", relation.name))?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to commit rejects for {}", relation.name))?;

        Ok(rejects.len())
    }

    /// Reject count for a relation (0 when the table was never created)
    pub fn reject_count(&self, relation: &RelationDescriptor) -> Result<i64> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [relation.reject_table],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(relation.reject_table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ============================================================================
// SQL GENERATION
// ============================================================================

/// Quote an identifier for SQLite
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quoted_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Target table DDL: typed columns, natural-key PK, store-enforced FKs,
/// plus the administrative created_at column (set on insert, never updated)
fn target_ddl(relation: &RelationDescriptor) -> String {
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", quote_ident(relation.table));

    for col in relation.columns {
        let not_null = if col.required { " NOT NULL" } else { "" };
        let _ = writeln!(
            ddl,
            "    {} {}{},",
            quote_ident(col.name),
            col.field_type.sql_type(),
            not_null
        );
    }
    ddl.push_str("    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,\n");

    let _ = write!(ddl, "    PRIMARY KEY ({})", quoted_list(relation.key_columns));

    for fk in relation.foreign_keys {
        let parent = by_name(fk.parent);
        let _ = write!(
            ddl,
            ",\n    FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_ident(fk.column),
            quote_ident(parent.table),
            quoted_list(parent.key_columns),
        );
    }

    ddl.push_str("\n)");
    ddl
}

/// Staging DDL: same column shape, no constraints
fn staging_ddl(relation: &RelationDescriptor) -> String {
    let cols: Vec<String> = relation
        .columns
        .iter()
        .map(|col| format!("{} {}", quote_ident(col.name), col.field_type.sql_type()))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_ident(relation.staging_table),
        cols.join(", ")
    )
}

/// Reject table DDL: extract column shape as TEXT plus reason/provenance
fn reject_ddl(relation: &RelationDescriptor) -> String {
    let mut cols: Vec<String> = relation
        .columns
        .iter()
        .map(|col| format!("{} TEXT", quote_ident(col.name)))
        .collect();
    cols.push("reject_reason TEXT NOT NULL".to_string());
    cols.push("run_id TEXT NOT NULL".to_string());
    cols.push("rejected_at DATETIME DEFAULT CURRENT_TIMESTAMP".to_string());
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(relation.reject_table),
        cols.join(", ")
    )
}

/// Set-based upsert: insert unmatched staging rows, update every mutable
/// column of matched ones. `WHERE true` disambiguates the UPSERT clause
/// after a SELECT source in SQLite.
fn upsert_sql(relation: &RelationDescriptor) -> String {
    let cols = quoted_list(&relation.column_names());
    let mutable = relation.mutable_columns();

    let conflict_action = if mutable.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets: Vec<String> = mutable
            .iter()
            .map(|m| format!("{col} = excluded.{col}", col = quote_ident(m)))
            .collect();
        format!("DO UPDATE SET {}", sets.join(", "))
    };

    format!(
        "INSERT INTO {target} ({cols}) SELECT {cols} FROM {stg} WHERE true \
         ON CONFLICT({keys}) {action}",
        target = quote_ident(relation.table),
        stg = quote_ident(relation.staging_table),
        cols = cols,
        keys = quoted_list(relation.key_columns),
        action = conflict_action,
    )
}

// ============================================================================
// TESTS
// ============================================================================
