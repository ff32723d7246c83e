// 🗂️ Closed vocabularies the pipeline converges to

use crate::record::Category;

pub const REAL_ESTATE: &str = "Real Estate";
pub const CORPORATE_BONDS: &str = "Corporate Bonds";
pub const GOVERNMENT_BONDS: &str = "Government Bonds";
pub const SECURITIZED_BONDS: &str = "Securitized Bonds";
pub const TREASURIES: &str = "Treasuries";
pub const UNKNOWN: &str = "Unknown";

pub const EQUITY_SECTORS: [&str; 11] = [
    "Basic Materials",
    "Consumer Discretionary",
    "Consumer Staples",
    "Energy",
    "Financials",
    "Health Care",
    "Industrials",
    REAL_ESTATE,
    "Technology",
    "Telecommunications",
    "Utilities",
];

pub const FIXED_INCOME_SECTORS: [&str; 4] = [
    CORPORATE_BONDS,
    GOVERNMENT_BONDS,
    SECURITIZED_BONDS,
    TREASURIES,
];

pub const REGIONS: [&str; 8] = [
    "Africa",
    "Asia",
    "Europe",
    "International",
    "Latin America",
    "Middle East",
    "North America",
    "Oceania",
];

/// True when `label` is in either canonical sector set.
///
/// Treasuries propagation and the name overrides can move a label across
/// asset classes, so membership is checked against the union.
pub fn is_canonical_sector(label: &str) -> bool {
    EQUITY_SECTORS.contains(&label) || FIXED_INCOME_SECTORS.contains(&label)
}

pub fn sectors_for(category: Category) -> &'static [&'static str] {
    match category {
        Category::Equity => &EQUITY_SECTORS,
        Category::FixedIncome => &FIXED_INCOME_SECTORS,
    }
}

pub fn is_canonical_region(label: &str) -> bool {
    REGIONS.contains(&label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_sets_are_disjoint() {
        for label in EQUITY_SECTORS {
            assert!(!FIXED_INCOME_SECTORS.contains(&label));
        }
    }

    #[test]
    fn test_membership() {
        assert!(is_canonical_sector("Treasuries"));
        assert!(is_canonical_sector("Health Care"));
        assert!(!is_canonical_sector("Oil & Gas"));
        assert!(is_canonical_region("Oceania"));
        assert!(!is_canonical_region("Australia"));
        assert_eq!(sectors_for(Category::FixedIncome).len(), 4);
    }
}
