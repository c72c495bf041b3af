// 🔁 Reconciliation Pipeline - one generic routine, run per relation
//
// Per relation: extract → normalize → dedupe → validate → stage → merge,
// with the reject sink fed as a side channel from the normalizer and the
// validator. Relations run in dependency order - {Customer, Product} →
// Order → OrderLine - so child validation always sees the parents'
// post-merge key sets, never a stale snapshot.
//
// A merge failure is fatal only for its own relation: earlier commits
// stay committed, later relations still run (validating against whatever
// parent keys are durably in the store), and the run report carries the
// failure. Re-running the batch is always safe - the merge is idempotent.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use uuid::Uuid;

use crate::dedupe::dedupe;
use crate::extract::read_extract;
use crate::normalize::normalize;
use crate::relation::{by_name, RelationDescriptor, DEPENDENCY_ORDER};
use crate::report::{RelationStats, RunReport};
use crate::store::Store;
use crate::validate::{validate, ParentKeys};

/// Run one batch through the full pipeline.
///
/// Provisioning is idempotent; the store handle is the only shared
/// state, passed by reference into every stage.
pub fn run(store: &mut Store, data_dir: &Path) -> Result<RunReport> {
    store.provision()?;

    let run_id = Uuid::new_v4().to_string();
    let mut relations = Vec::with_capacity(DEPENDENCY_ORDER.len());

    for relation in DEPENDENCY_ORDER {
        let stats = match reconcile_relation(store, relation, data_dir, &run_id) {
            Ok(stats) => stats,
            Err(e) => {
                eprintln!("[ERROR] Relation {} failed: {:#}", relation.name, e);
                // Staging is transient either way
                if let Err(drop_err) = store.drop_staging(relation) {
                    eprintln!(
                        "[WARN] Failed to drop staging for {}: {:#}",
                        relation.name, drop_err
                    );
                }

                let mut stats = RelationStats::new(relation.name);
                stats.committed = false;
                stats.error = Some(format!("{:#}", e));
                stats.final_count = match store.row_count(relation) {
                    Ok(count) => count,
                    Err(count_err) => {
                        eprintln!(
                            "[WARN] Failed to count {} after failure: {:#}",
                            relation.table, count_err
                        );
                        0
                    }
                };
                stats
            }
        };
        relations.push(stats);
    }

    Ok(RunReport {
        run_id,
        completed_at: Utc::now(),
        relations,
    })
}

fn reconcile_relation(
    store: &mut Store,
    relation: &'static RelationDescriptor,
    data_dir: &Path,
    run_id: &str,
) -> Result<RelationStats> {
    let mut stats = RelationStats::new(relation.name);

    // 1. Extract (missing file → empty set, already warned)
    let batch = read_extract(data_dir, relation)?;
    stats.rows_read = batch.rows.len();

    // 2. Normalize
    let normalized = normalize(relation, &batch);
    stats.coerced_nulls = normalized.coerced_nulls;
    let mut rejects = normalized.rejects;

    // 3. Deduplicate (last wins)
    let deduped = dedupe(relation, normalized.records);
    stats.dropped_duplicates = deduped.dropped_duplicates;
    stats.dropped_null_keys = deduped.dropped_null_keys;

    // 4. Referential validation against post-merge parent key sets
    let mut parent_keys = ParentKeys::new();
    for fk in relation.foreign_keys {
        parent_keys.insert(fk.parent, store.key_set(by_name(fk.parent))?);
    }
    let validated = validate(relation, deduped.records, &parent_keys);
    rejects.extend(validated.rejects);

    // 5. Reject routing (side channel, never blocks the main path)
    stats.rejected = store.append_rejects(relation, &rejects, run_id)?;

    // 6. Staged bulk load into a fresh area
    store.recreate_staging(relation)?;
    store.stage(relation, &validated.valid)?;

    // 7. Atomic merge-upsert, then discard the staging area
    let counts = store.merge(relation)?;
    store.drop_staging(relation)?;

    stats.staged = counts.staged;
    stats.inserted = counts.inserted;
    stats.updated = counts.updated;
    stats.final_count = store.row_count(relation)?;
    stats.committed = true;

    Ok(stats)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::ORDER_LINE;
    use std::fs;
    use std::path::PathBuf;

    const CUSTOMER_HEADER: &str = "CustomerID,FirstName,LastName,Email,Phone,City,Country";
    const PRODUCT_HEADER: &str = "ProductID,ProductName,Category,Price,Stock";
    const ORDER_HEADER: &str = "OrderID,CustomerID,OrderDate,Status";
    const LINE_HEADER: &str = "OrderID,ProductID,Quantity,TotalPrice";

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sales-reconcile-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_extract(dir: &Path, file: &str, header: &str, rows: &[&str]) {
        let mut body = String::from(header);
        for row in rows {
            body.push('\n');
            body.push_str(row);
        }
        body.push('\n');
        fs::write(dir.join(file), body).unwrap();
    }

    /// Scenario A batch: one customer, one order for them, one order line
    /// referencing a product that does not exist
    fn write_scenario_a(dir: &Path, customer_first_name: &str) {
        write_extract(
            dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &[&format!("1,{},Lee,ann@example.com,555-0101,Lima,PE", customer_first_name)],
        );
        write_extract(dir, "products.csv", PRODUCT_HEADER, &["P5,Desk,Furniture,$120.00,8"]);
        write_extract(dir, "orders.csv", ORDER_HEADER, &["100,1,2024-01-05,NEW"]);
        write_extract(dir, "order_lines.csv", LINE_HEADER, &["100,999,2,20.00"]);
    }

    fn setup() -> (Store, PathBuf) {
        (Store::open_in_memory().unwrap(), temp_dir())
    }

    #[test]
    fn test_scenario_a_rejects_orphan_order_line() {
        let (mut store, dir) = setup();
        write_scenario_a(&dir, "Ann");

        let report = run(&mut store, &dir).unwrap();
        assert!(report.all_committed());

        assert_eq!(report.stats_for("customer").unwrap().final_count, 1);
        assert_eq!(report.stats_for("order").unwrap().final_count, 1);
        assert_eq!(report.stats_for("order_line").unwrap().final_count, 0);
        assert_eq!(report.stats_for("order_line").unwrap().rejected, 1);

        let reason: String = store
            .conn()
            .query_row(
                "SELECT reject_reason FROM rejects_order_lines",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(reason, "invalid_product_fk");

        let orphan_count: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM order_lines WHERE OrderID = '100' AND ProductID = '999'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphan_count, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_scenario_b_rerun_updates_customer_in_place() {
        let (mut store, dir) = setup();
        write_scenario_a(&dir, "Ann");
        let first = run(&mut store, &dir).unwrap();

        write_scenario_a(&dir, "Ann B.");
        let second = run(&mut store, &dir).unwrap();
        assert!(second.all_committed());

        // Count unchanged, name updated
        assert_eq!(
            second.stats_for("customer").unwrap().final_count,
            first.stats_for("customer").unwrap().final_count
        );
        assert_eq!(second.stats_for("customer").unwrap().updated, 1);
        assert_eq!(second.stats_for("customer").unwrap().inserted, 0);

        let name: String = store
            .conn()
            .query_row(
                "SELECT FirstName FROM customers WHERE CustomerID = '1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Ann B.");

        // Order/OrderLine counts unchanged from the first run
        assert_eq!(second.stats_for("order").unwrap().final_count, 1);
        assert_eq!(second.stats_for("order_line").unwrap().final_count, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_idempotence_identical_batch_twice() {
        let (mut store, dir) = setup();
        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &[
                "1,Ann,Lee,ann@example.com,555-0101,Lima,PE",
                "2,Bea,Kim,bea@example.com,555-0102,Quito,EC",
            ],
        );
        write_extract(&dir, "products.csv", PRODUCT_HEADER, &["P5,Desk,Furniture,120,8"]);
        write_extract(&dir, "orders.csv", ORDER_HEADER, &["100,1,2024-01-05,NEW"]);
        write_extract(&dir, "order_lines.csv", LINE_HEADER, &["100,P5,2,240"]);

        let first = run(&mut store, &dir).unwrap();
        let second = run(&mut store, &dir).unwrap();

        for relation in ["customer", "product", "order", "order_line"] {
            assert_eq!(
                first.stats_for(relation).unwrap().final_count,
                second.stats_for(relation).unwrap().final_count,
                "final count changed for {}",
                relation
            );
            assert_eq!(second.stats_for(relation).unwrap().inserted, 0);
        }

        let name: String = store
            .conn()
            .query_row(
                "SELECT FirstName FROM customers WHERE CustomerID = '1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Ann");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_referential_soundness_after_run() {
        let (mut store, dir) = setup();
        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &["1,Ann,Lee,ann@example.com,555-0101,Lima,PE"],
        );
        write_extract(&dir, "products.csv", PRODUCT_HEADER, &["P5,Desk,Furniture,120,8"]);
        write_extract(
            &dir,
            "orders.csv",
            ORDER_HEADER,
            &["100,1,2024-01-05,NEW", "101,77,2024-01-06,NEW"],
        );
        write_extract(
            &dir,
            "order_lines.csv",
            LINE_HEADER,
            &["100,P5,2,240", "100,999,1,10", "101,P5,1,120"],
        );

        let report = run(&mut store, &dir).unwrap();
        assert!(report.all_committed());

        // Every surviving order line has a matching order and product
        let unsound: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM order_lines ol
                 LEFT JOIN orders o ON ol.OrderID = o.OrderID
                 LEFT JOIN products p ON ol.ProductID = p.ProductID
                 WHERE o.OrderID IS NULL OR p.ProductID IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(unsound, 0);

        // Order 101 referenced a missing customer; the line for it cascades out
        assert_eq!(report.stats_for("order").unwrap().rejected, 1);
        assert_eq!(report.stats_for("order_line").unwrap().rejected, 2);
        assert_eq!(report.stats_for("order_line").unwrap().final_count, 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reject_completeness_one_row_per_removal() {
        let (mut store, dir) = setup();
        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &["1,Ann,Lee,ann@example.com,555-0101,Lima,PE"],
        );
        write_extract(&dir, "products.csv", PRODUCT_HEADER, &["P5,Desk,Furniture,120,8"]);
        write_extract(&dir, "orders.csv", ORDER_HEADER, &["100,1,2024-01-05,NEW"]);
        write_extract(
            &dir,
            "order_lines.csv",
            LINE_HEADER,
            &["100,998,1,10", "100,999,1,10"],
        );

        let report = run(&mut store, &dir).unwrap();
        let removed = report.stats_for("order_line").unwrap().rejected;
        assert_eq!(removed, 2);
        assert_eq!(store.reject_count(&ORDER_LINE).unwrap(), 2);

        // Reasons identify the failing reference, originals kept verbatim
        let rows: Vec<(String, String)> = store
            .conn()
            .prepare("SELECT ProductID, reject_reason FROM rejects_order_lines ORDER BY ProductID")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("998".to_string(), "invalid_product_fk".to_string()),
                ("999".to_string(), "invalid_product_fk".to_string()),
            ]
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_extracts_are_empty_sets() {
        let (mut store, dir) = setup();
        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &["1,Ann,Lee,ann@example.com,555-0101,Lima,PE"],
        );

        let report = run(&mut store, &dir).unwrap();
        assert!(report.all_committed());
        assert_eq!(report.stats_for("customer").unwrap().final_count, 1);
        assert_eq!(report.stats_for("product").unwrap().rows_read, 0);
        assert_eq!(report.stats_for("order_line").unwrap().final_count, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_dedup_last_wins_end_to_end() {
        let (mut store, dir) = setup();
        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &[
                "1,Ann,Lee,ann@example.com,555-0101,Lima,PE",
                "1,Annie,Lee,annie@example.com,555-0101,Lima,PE",
            ],
        );

        let report = run(&mut store, &dir).unwrap();
        assert_eq!(report.stats_for("customer").unwrap().dropped_duplicates, 1);
        assert_eq!(report.stats_for("customer").unwrap().final_count, 1);

        let name: String = store
            .conn()
            .query_row(
                "SELECT FirstName FROM customers WHERE CustomerID = '1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Annie");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_case_insensitive_fk_resolution() {
        let (mut store, dir) = setup();
        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &["CUST-01,Ann,Lee,ann@example.com,555-0101,Lima,PE"],
        );
        write_extract(
            &dir,
            "orders.csv",
            ORDER_HEADER,
            &["100,cust-01,2024-01-05,NEW"],
        );

        let report = run(&mut store, &dir).unwrap();
        assert_eq!(report.stats_for("order").unwrap().final_count, 1);
        assert_eq!(report.stats_for("order").unwrap().rejected, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_merge_failure_is_fatal_only_for_its_relation() {
        let (mut store, dir) = setup();

        // A pre-existing customers table with the wrong shape makes the
        // customer merge fail; provisioning is CREATE IF NOT EXISTS and
        // leaves it alone
        store
            .conn()
            .execute("CREATE TABLE customers (wrong_column TEXT)", [])
            .unwrap();

        write_extract(
            &dir,
            "customers.csv",
            CUSTOMER_HEADER,
            &["1,Ann,Lee,ann@example.com,555-0101,Lima,PE"],
        );
        write_extract(&dir, "products.csv", PRODUCT_HEADER, &["P5,Desk,Furniture,120,8"]);

        let report = run(&mut store, &dir).unwrap();

        // The broken relation reports the failure instead of fabricating
        // a partial success
        let customer = report.stats_for("customer").unwrap();
        assert!(!customer.committed);
        assert!(customer.error.is_some());

        // Other relations commit independently
        let product = report.stats_for("product").unwrap();
        assert!(product.committed);
        assert_eq!(product.final_count, 1);

        // The run as a whole is reported failed
        assert!(!report.all_committed());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_relations_reported_in_dependency_order() {
        let (mut store, dir) = setup();
        let report = run(&mut store, &dir).unwrap();
        let names: Vec<&str> = report.relations.iter().map(|r| r.relation.as_str()).collect();
        assert_eq!(names, vec!["customer", "product", "order", "order_line"]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
