// 🧹 Field Normalizer - raw disclosure rows → fixed lowercase schema
//
// Projection, renaming, numeric parsing, null filling and static lookup
// substitutions. A missing required column aborts the run.

use crate::error::{LabelField, PipelineError, PipelineWarning, Result};
use crate::ingest::{RawRow, RawTable};
use crate::record::{Category, HoldingRecord};
use crate::rules::RuleTables;
use crate::taxonomy;
use tracing::{debug, info};

// ============================================================================
// RAW COLUMN NAMES
// ============================================================================

pub const COL_REGION: &str = "Region";
pub const COL_COUNTRY: &str = "Country";
pub const COL_NAME: &str = "Name";
pub const COL_MARKET_VALUE_USD: &str = "Market Value(USD)";
pub const COL_OWNERSHIP: &str = "Ownership";

/// Equity files call it Industry, fixed-income files call it Sector
pub const COL_INDUSTRY_ALIASES: [&str; 2] = ["Industry", "Sector"];

/// Columns duplicated or superseded by other fields
pub const DROPPED_COLUMNS: [&str; 4] = [
    "Market Value(NOK)",
    "Market Value(local ccy)",
    "Voting",
    "Incorporation Country",
];

// ============================================================================
// NORMALIZED BATCH
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<HoldingRecord>,
    pub warnings: Vec<PipelineWarning>,
}

// ============================================================================
// FIELD NORMALIZER
// ============================================================================

pub struct FieldNormalizer {
    rules: RuleTables,
}

impl FieldNormalizer {
    pub fn new(rules: RuleTables) -> Self {
        FieldNormalizer { rules }
    }

    pub fn rules(&self) -> &RuleTables {
        &self.rules
    }

    /// Normalize every table, in order, and collect region warnings
    pub fn normalize(&self, tables: &[RawTable]) -> Result<NormalizedBatch> {
        let mut records = Vec::new();

        for table in tables {
            let mut normalized = self.normalize_table(table)?;
            records.append(&mut normalized);
        }

        let warnings = self.unmapped_regions(&records);
        info!(
            tables = tables.len(),
            rows = records.len(),
            warnings = warnings.len(),
            "field normalization complete"
        );

        Ok(NormalizedBatch { records, warnings })
    }

    pub fn normalize_table(&self, table: &RawTable) -> Result<Vec<HoldingRecord>> {
        if let Some(first) = table.rows.first() {
            let dropped: Vec<&str> = DROPPED_COLUMNS
                .iter()
                .copied()
                .filter(|c| first.has_column(c))
                .collect();
            debug!(source = %table.source_id, ?dropped, "projecting columns");
        }

        table
            .rows
            .iter()
            .map(|row| self.normalize_row(table, row))
            .collect()
    }

    /// Project one raw row onto the output schema
    pub fn normalize_row(&self, table: &RawTable, row: &RawRow) -> Result<HoldingRecord> {
        let source_id = table.source_id.as_str();

        let region = required_column(source_id, row, &[COL_REGION])?.unwrap_or_default();
        let country = required_column(source_id, row, &[COL_COUNTRY])?.unwrap_or_default();
        let name = required_column(source_id, row, &[COL_NAME])?.unwrap_or_default();
        let industry_or_sector = required_column(source_id, row, &COL_INDUSTRY_ALIASES)?
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| taxonomy::UNKNOWN.to_string());

        let raw_value = required_column(source_id, row, &[COL_MARKET_VALUE_USD])?.unwrap_or_default();
        let market_value = parse_market_value(&raw_value).ok_or_else(|| {
            PipelineError::InvalidNumber {
                source_id: source_id.to_string(),
                row: row.row,
                column: COL_MARKET_VALUE_USD.to_string(),
                value: raw_value.clone(),
            }
        })?;
        if market_value < 0 {
            return Err(PipelineError::NegativeMarketValue {
                source_id: source_id.to_string(),
                row: row.row,
                value: market_value,
            });
        }

        // Bond files may omit the ownership column entirely
        let raw_ownership = match table.tag.category {
            Category::Equity => required_column(source_id, row, &[COL_OWNERSHIP])?,
            Category::FixedIncome => lookup(row, &[COL_OWNERSHIP])
                .flatten()
                .map(|s| s.trim().to_string()),
        };
        let percent_ownership = match raw_ownership.filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_percent(&raw).ok_or_else(|| PipelineError::InvalidNumber {
                source_id: source_id.to_string(),
                row: row.row,
                column: COL_OWNERSHIP.to_string(),
                value: raw.clone(),
            })?),
            None => None,
        };

        let mut record = HoldingRecord {
            region,
            country,
            name,
            industry_or_sector,
            market_value,
            percent_ownership,
            category: table.tag.category,
            year: table.tag.year,
        };
        self.canonicalize(&mut record);

        Ok(record)
    }

    /// Null fill plus region/country substitutions. Idempotent.
    pub fn canonicalize(&self, record: &mut HoldingRecord) -> bool {
        let mut changed = false;

        if record.percent_ownership.is_none() {
            record.percent_ownership = Some(0.0);
            changed = true;
        }

        changed |= self.rules.regions.apply(&mut record.region);
        changed |= self.rules.countries.apply(&mut record.country);

        changed
    }

    /// Re-apply canonicalization to typed records; returns rows changed
    pub fn canonicalize_all(&self, records: &mut [HoldingRecord]) -> usize {
        records
            .iter_mut()
            .map(|r| self.canonicalize(r))
            .filter(|changed| *changed)
            .count()
    }

    pub fn unmapped_regions(&self, records: &[HoldingRecord]) -> Vec<PipelineWarning> {
        PipelineWarning::tally_unmapped(
            LabelField::Region,
            records
                .iter()
                .map(|r| r.region.as_str())
                .filter(|region| !taxonomy::is_canonical_region(region)),
        )
    }
}

impl Default for FieldNormalizer {
    fn default() -> Self {
        Self::new(RuleTables::default())
    }
}

// ============================================================================
// PARSING HELPERS
// ============================================================================

/// Outer `None`: column absent. Inner `None`: empty cell.
/// Header match is case-insensitive so year-to-year capitalisation drift
/// does not look like a schema change.
fn lookup<'a>(row: &'a RawRow, names: &[&str]) -> Option<Option<&'a str>> {
    for name in names {
        if let Some(value) = row.fields.get(*name) {
            return Some(value.as_deref());
        }
    }

    // Scan in file order so the first matching header wins
    row.columns()
        .find(|column| names.iter().any(|n| column.trim().eq_ignore_ascii_case(n)))
        .and_then(|column| row.fields.get(column))
        .map(|value| value.as_deref())
}

fn required_column(source_id: &str, row: &RawRow, names: &[&str]) -> Result<Option<String>> {
    lookup(row, names)
        .map(|v| v.map(|s| s.trim().to_string()))
        .ok_or_else(|| PipelineError::SchemaMismatch {
            source_id: source_id.to_string(),
            row: row.row,
            column: names[0].to_string(),
        })
}

fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}' | '\u{202f}' | '\''))
        .collect()
}

/// Integer USD value. Thousands separators are stripped; a fractional part
/// is accepted only when it is zero.
pub fn parse_market_value(raw: &str) -> Option<i64> {
    let cleaned = strip_separators(raw);
    if cleaned.is_empty() {
        return None;
    }

    // Integer arithmetic only: exponents and out-of-range values are rejected
    let (whole, fraction) = match cleaned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (cleaned.as_str(), ""),
    };
    if !fraction.chars().all(|c| c == '0') {
        return None;
    }

    whole.parse::<i64>().ok()
}

pub fn parse_percent(raw: &str) -> Option<f64> {
    let cleaned = strip_separators(raw.trim_end_matches('%'));
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// TESTS
// ============================================================================
