// 📥 Record Ingestor - per-year, per-category disclosure tables
//
// Reads raw CSV snapshots as untyped column → value rows and stamps each
// table with the (category, year) tag inferred from its file name.

use crate::error::{PipelineError, Result};
use crate::record::SourceTag;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// RAW TYPES
// ============================================================================

/// One untyped input row. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    /// 1-based data row number within its source (header excluded)
    pub row: usize,
    pub fields: HashMap<String, Option<String>>,
    /// Column names in file order
    columns: Vec<String>,
}

impl RawRow {
    pub fn new(row: usize) -> Self {
        RawRow {
            row,
            fields: HashMap::new(),
            columns: Vec::new(),
        }
    }

    /// Set a cell; a new column is appended after the existing ones
    pub fn insert(&mut self, column: &str, value: Option<String>) {
        if self.fields.insert(column.to_string(), value).is_none() {
            self.columns.push(column.to_string());
        }
    }

    /// Builder used by tests and in-memory callers
    pub fn with(mut self, column: &str, value: Option<&str>) -> Self {
        self.insert(column, value.map(|v| v.to_string()));
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.as_str())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    /// Cell value; `None` for both a missing column and an empty cell
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(|v| v.as_deref())
    }
}

/// All rows of one disclosure file plus its derived tag
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub source_id: String,
    pub tag: SourceTag,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// Tag is inferred from `source_id`; an unparseable id is fatal
    pub fn new(source_id: &str, rows: Vec<RawRow>) -> Result<Self> {
        let tag = SourceTag::parse(source_id)?;
        Ok(RawTable {
            source_id: source_id.to_string(),
            tag,
            rows,
        })
    }

    /// Parse CSV text from any reader
    pub fn from_reader<R: Read>(source_id: &str, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let read_error = |source: csv::Error| PipelineError::Csv {
            source_id: source_id.to_string(),
            source,
        };

        let headers: Vec<String> = rdr
            .headers()
            .map_err(read_error)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, result) in rdr.records().enumerate() {
            let record = result.map_err(read_error)?;
            let mut row = RawRow::new(idx + 1);

            for (column, value) in headers.iter().zip(record.iter()) {
                let value = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                row.insert(column, value);
            }

            rows.push(row);
        }

        RawTable::new(source_id, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// FILE DISCOVERY
// ============================================================================

/// Source identifier for a path: its file name
pub fn source_id_for(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| PipelineError::InvalidSourceId {
            source_id: path.display().to_string(),
            reason: "path has no UTF-8 file name".to_string(),
        })
}

/// Read one disclosure CSV
pub fn read_source(path: &Path) -> Result<RawTable> {
    let source_id = source_id_for(path)?;
    let file = fs::File::open(path)?;
    let table = RawTable::from_reader(&source_id, file)?;

    debug!(
        source = %source_id,
        rows = table.len(),
        category = %table.tag.category,
        year = table.tag.year,
        "read disclosure table"
    );

    Ok(table)
}

/// All `*.csv` files in `dir`, sorted by file name so runs are deterministic
pub fn discover_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();

    paths.sort();
    Ok(paths)
}

pub fn read_all(dir: &Path) -> Result<Vec<RawTable>> {
    let paths = discover_sources(dir)?;
    let tables = paths
        .iter()
        .map(|p| read_source(p))
        .collect::<Result<Vec<_>>>()?;

    let rows: usize = tables.iter().map(|t| t.len()).sum();
    info!(files = tables.len(), rows, dir = %dir.display(), "ingested disclosure files");

    Ok(tables)
}

// ============================================================================
// TESTS
// ============================================================================
