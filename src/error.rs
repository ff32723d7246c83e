// ⚠️ Error taxonomy for the holdings pipeline
//
// Structural problems (missing columns, unparseable numbers, bad source ids)
// abort the run. Semantic gaps (labels no rule covers) are warnings that ride
// along in the run report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// FATAL ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    /// An input row lacks a column the normalizer needs
    #[error("schema mismatch in {source_id} row {row}: missing column '{column}'")]
    SchemaMismatch {
        source_id: String,
        row: usize,
        column: String,
    },

    /// Category/year cannot be inferred from the source identifier
    #[error("invalid source identifier '{source_id}': {reason}")]
    InvalidSourceId { source_id: String, reason: String },

    /// A numeric column holds text that is not a number
    #[error("invalid number in {source_id} row {row}, column '{column}': '{value}'")]
    InvalidNumber {
        source_id: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error("negative market value in {source_id} row {row}: {value}")]
    NegativeMarketValue {
        source_id: String,
        row: usize,
        value: i64,
    },

    /// A rule table would not be idempotent or is otherwise unusable
    #[error("invalid rule table '{table}': {reason}")]
    InvalidRules { table: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable CSV: ragged row, bad quoting, invalid UTF-8
    #[error("failed to read {source_id}: {source}")]
    Csv {
        source_id: String,
        source: csv::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// RECOVERABLE WARNINGS
// ============================================================================

/// Field a warning refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelField {
    Region,
    IndustryOrSector,
}

impl LabelField {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelField::Region => "region",
            LabelField::IndustryOrSector => "industry_or_sector",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// Value passed through unchanged because no rewrite rule covers it
    UnmappedLabel {
        field: LabelField,
        value: String,
        rows: usize,
    },
}

impl PipelineWarning {
    /// One `UnmappedLabel` per distinct value, in first-seen order
    pub fn tally_unmapped<'a, I>(field: LabelField, values: I) -> Vec<PipelineWarning>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut order: Vec<&'a str> = Vec::new();
        let mut counts: std::collections::HashMap<&'a str, usize> = std::collections::HashMap::new();

        for value in values {
            let count = counts.entry(value).or_insert(0);
            if *count == 0 {
                order.push(value);
            }
            *count += 1;
        }

        order
            .into_iter()
            .map(|value| PipelineWarning::UnmappedLabel {
                field,
                value: value.to_string(),
                rows: counts[value],
            })
            .collect()
    }
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::UnmappedLabel { field, value, rows } => write!(
                f,
                "unmapped {} label '{}' ({} rows)",
                field.as_str(),
                value,
                rows
            ),
        }
    }
}
