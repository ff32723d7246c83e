// 📄 Holding records - one disclosed position per fund, year and asset class
//
// Category and year are stamped from the source identifier at ingestion and
// never rewritten afterwards. Everything else may be rewritten in place by the
// normalizer, reclassifier and resolver.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Equity")]
    Equity,
    #[serde(rename = "Fixed Income")]
    FixedIncome,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Equity => "Equity",
            Category::FixedIncome => "Fixed Income",
        }
    }

    /// Parse the stored representation back into a category
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Equity" => Some(Category::Equity),
            "Fixed Income" => Some(Category::FixedIncome),
            _ => None,
        }
    }

    /// Two-letter prefix used in disclosure file names
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "EQ" => Some(Category::Equity),
            "FI" => Some(Category::FixedIncome),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SOURCE TAG
// ============================================================================

/// `(category, year)` inferred from a source identifier such as `EQ_2019.csv`
///
/// Positions 0-1 carry the category prefix, positions 3-6 the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceTag {
    pub category: Category,
    pub year: i32,
}

impl SourceTag {
    pub fn parse(source_id: &str) -> Result<Self> {
        let invalid = |reason: &str| PipelineError::InvalidSourceId {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        };

        let prefix = source_id
            .get(0..2)
            .ok_or_else(|| invalid("too short for a category prefix"))?;
        let category = Category::from_prefix(prefix)
            .ok_or_else(|| invalid(&format!("unknown category prefix '{}'", prefix)))?;

        let year_str = source_id
            .get(3..7)
            .ok_or_else(|| invalid("too short for a year"))?;
        if !year_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(&format!("'{}' is not a 4-digit year", year_str)));
        }
        let year: i32 = year_str
            .parse()
            .map_err(|_| invalid(&format!("'{}' is not a 4-digit year", year_str)))?;

        Ok(SourceTag { category, year })
    }
}

// ============================================================================
// HOLDING RECORD
// ============================================================================

/// Normalized holding row, lowercase-keyed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingRecord {
    pub region: String,
    pub country: String,

    /// Issuer (equity) or bond name
    pub name: String,

    #[serde(rename = "sector")]
    pub industry_or_sector: String,

    /// USD, thousands separators already stripped
    pub market_value: i64,

    /// Null only before the normalizer fills it; always `Some` afterwards
    pub percent_ownership: Option<f64>,

    pub category: Category,
    pub year: i32,
}

impl HoldingRecord {
    pub fn tag(&self) -> SourceTag {
        SourceTag {
            category: self.category,
            year: self.year,
        }
    }

    pub fn is_fixed_income(&self) -> bool {
        self.category == Category::FixedIncome
    }
}
