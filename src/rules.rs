// 🏷️ Rewrite tables - Rules as Data
// Static value substitutions for regions, countries and sector labels.
// Built-in defaults cover the known disclosure quirks; a JSON file can
// replace them so operators can extend a table without a rebuild.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// SUBSTITUTION TABLE
// ============================================================================

/// Exact-match key → value replacement table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstitutionTable {
    entries: BTreeMap<String, String>,
}

impl SubstitutionTable {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        SubstitutionTable {
            entries: pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }

    /// Replacement for `value`, if the table covers it
    pub fn lookup(&self, value: &str) -> Option<&str> {
        self.entries.get(value).map(|s| s.as_str())
    }

    pub fn insert(&mut self, from: &str, to: &str) {
        self.entries.insert(from.to_string(), to.to_string());
    }

    /// Replace `value` in place, returning whether it changed
    pub fn apply(&self, value: &mut String) -> bool {
        match self.lookup(value) {
            Some(replacement) if replacement != value.as_str() => {
                *value = replacement.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sources that also appear as targets (applying twice would differ from once)
    pub fn chained_keys(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter(|target| self.entries.contains_key(target.as_str()))
            .map(|s| s.as_str())
            .collect()
    }
}

// ============================================================================
// NAME OVERRIDE
// ============================================================================

/// Forces a sector for one issuer whose sector is reported as `Unknown`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameOverride {
    pub name: String,
    pub sector: String,
}

// ============================================================================
// RULE TABLES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTables {
    /// Region folding (e.g. Australia → Oceania)
    #[serde(default)]
    pub regions: SubstitutionTable,

    /// Country spelling fixes
    #[serde(default)]
    pub countries: SubstitutionTable,

    /// Legacy sector labels renamed by later disclosures
    #[serde(default)]
    pub legacy_sectors: SubstitutionTable,

    #[serde(default)]
    pub name_overrides: Vec<NameOverride>,

    /// Near-synonym fixed-income labels folded into four buckets
    #[serde(default)]
    pub bond_families: SubstitutionTable,
}

impl RuleTables {
    /// Load tables from a JSON file and check they are idempotent
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let tables: RuleTables = serde_json::from_str(&content)?;
        tables.validate()?;
        Ok(tables)
    }

    /// Every table must map sources to targets that are not themselves sources
    pub fn validate(&self) -> Result<()> {
        let tables = [
            ("regions", &self.regions),
            ("countries", &self.countries),
            ("legacy_sectors", &self.legacy_sectors),
            ("bond_families", &self.bond_families),
        ];

        for (name, table) in tables {
            let chained = table.chained_keys();
            if !chained.is_empty() {
                return Err(PipelineError::InvalidRules {
                    table: name.to_string(),
                    reason: format!("targets also used as sources: {}", chained.join(", ")),
                });
            }
        }

        for rule in &self.name_overrides {
            if rule.name.trim().is_empty() {
                return Err(PipelineError::InvalidRules {
                    table: "name_overrides".to_string(),
                    reason: "override with empty issuer name".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.regions.len()
            + self.countries.len()
            + self.legacy_sectors.len()
            + self.name_overrides.len()
            + self.bond_families.len()
    }
}

impl Default for RuleTables {
    fn default() -> Self {
        RuleTables {
            regions: SubstitutionTable::from_pairs(&[
                ("Australia", "Oceania"),
                ("New Zealand", "Oceania"),
                ("Japan", "Asia"),
            ]),
            countries: SubstitutionTable::from_pairs(&[
                ("Faeroe Islands", "Faroe Islands"),
                ("Guernsey C. I.", "Guernsey"),
                ("Gurensey", "Guernsey"),
                ("Jersey C.I.", "Jersey"),
                ("Lichtenstein", "Liechtenstein"),
                ("Tanzania *, United Republic of", "Tanzania"),
            ]),
            legacy_sectors: SubstitutionTable::from_pairs(&[
                ("Guernsey", "Financials"),
                ("Consumer Services", "Consumer Discretionary"),
                ("Consumer Goods", "Consumer Staples"),
                ("Oil & Gas", "Energy"),
            ]),
            name_overrides: vec![
                NameOverride {
                    name: "Craft Oil Ltd".to_string(),
                    sector: "Energy".to_string(),
                },
                NameOverride {
                    name: "Kontron S&T AG".to_string(),
                    sector: "Technology".to_string(),
                },
            ],
            bond_families: SubstitutionTable::from_pairs(&[
                ("Corporate", "Corporate Bonds"),
                ("Corporate Bonds/Securitized Bonds", "Corporate Bonds"),
                ("Corporate/Securitized", "Corporate Bonds"),
                ("Convertible Bonds", "Corporate Bonds"),
                ("Securitized", "Securitized Bonds"),
                ("Government", "Government Bonds"),
                ("Government Related", "Government Bonds"),
                ("Treasury", "Treasuries"),
            ]),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
