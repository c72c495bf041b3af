// 📂 Extract Reader - CSV → raw rows for one relation
// Mechanical glue: no cleaning happens here, only reading.

use anyhow::{Context, Result};
use std::path::Path;

use crate::relation::RelationDescriptor;

/// Raw rows for one extract, headers as found in the file
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive header lookup (extract headers vary in casing)
    pub fn header_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }
}

/// Read the extract for one relation from the data directory.
///
/// A missing file is a warning, not an error: the relation is treated
/// as an empty set and the run continues.
pub fn read_extract(data_dir: &Path, relation: &RelationDescriptor) -> Result<RawBatch> {
    let path = data_dir.join(relation.extract_file);

    if !path.exists() {
        eprintln!("[WARN] Missing extract: {}", path.display());
        return Ok(RawBatch::default());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(&path)
        .with_context(|| format!("Failed to open extract {}", path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read headers from {}", path.display()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.with_context(|| format!("Failed to read row in {}", path.display()))?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }

    Ok(RawBatch { headers, rows })
}

// ============================================================================
// TESTS
// ============================================================================
