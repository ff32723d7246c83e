// 🔁 Category-Conditioned Reclassifier
//
// Ordered rewrite chain over `industry_or_sector`. Each step reads the value
// left by the previous one, so the order below is part of the contract:
//
//   1. legacy label relabel
//   2. issuer-name overrides for `Unknown`
//   3. Real Estate propagation by issuer name (two-pass)
//   4. fixed-income Real Estate → Corporate Bonds
//   5. bond-family amalgamation
//   6. Treasuries propagation by issuer name (two-pass)

use crate::error::{LabelField, PipelineWarning};
use crate::record::HoldingRecord;
use crate::rules::{NameOverride, RuleTables, SubstitutionTable};
use crate::taxonomy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

// ============================================================================
// STEP ABSTRACTION
// ============================================================================

/// One named, independently testable rewrite over the whole table
pub trait RewriteStep: Send + Sync {
    fn name(&self) -> &str;

    /// Rewrite in place, returning the number of rows whose value changed
    fn apply(&self, records: &mut [HoldingRecord]) -> usize;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub rewritten: usize,
}

fn set_sector(record: &mut HoldingRecord, label: &str) -> bool {
    if record.industry_or_sector == label {
        return false;
    }
    record.industry_or_sector = label.to_string();
    true
}

// ============================================================================
// STEP 1 + 5: TABLE RELABEL
// ============================================================================

/// Plain lookup-table substitution on the sector field
pub struct TableRelabel {
    name: String,
    table: SubstitutionTable,
}

impl TableRelabel {
    pub fn new(name: &str, table: SubstitutionTable) -> Self {
        TableRelabel {
            name: name.to_string(),
            table,
        }
    }
}

impl RewriteStep for TableRelabel {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, records: &mut [HoldingRecord]) -> usize {
        let mut rewritten = 0;
        for record in records.iter_mut() {
            if self.table.apply(&mut record.industry_or_sector) {
                rewritten += 1;
            }
        }
        rewritten
    }
}

// ============================================================================
// STEP 2: NAME OVERRIDES
// ============================================================================

/// Forces a sector for listed issuers, only where the sector is `Unknown`
pub struct NameOverrides {
    overrides: Vec<NameOverride>,
}

impl NameOverrides {
    pub fn new(overrides: Vec<NameOverride>) -> Self {
        NameOverrides { overrides }
    }
}

impl RewriteStep for NameOverrides {
    fn name(&self) -> &str {
        "name_overrides"
    }

    fn apply(&self, records: &mut [HoldingRecord]) -> usize {
        let mut rewritten = 0;

        for record in records.iter_mut() {
            if record.industry_or_sector != taxonomy::UNKNOWN {
                continue;
            }
            if let Some(rule) = self.overrides.iter().find(|o| o.name == record.name) {
                if set_sector(record, &rule.sector) {
                    rewritten += 1;
                }
            }
        }

        rewritten
    }
}

// ============================================================================
// STEP 3 + 6: SCOPE PROPAGATION
// ============================================================================

/// Any issuer tagged `label` in any row gets `label` in every row.
///
/// Pass one freezes the set of names; pass two only reads that set, so the
/// result does not depend on row order.
pub struct ScopePropagation {
    name: String,
    label: String,
}

impl ScopePropagation {
    pub fn new(name: &str, label: &str) -> Self {
        ScopePropagation {
            name: name.to_string(),
            label: label.to_string(),
        }
    }

    /// Pass one: names ever carrying the label
    pub fn tagged_names(&self, records: &[HoldingRecord]) -> HashSet<String> {
        records
            .iter()
            .filter(|r| r.industry_or_sector == self.label)
            .map(|r| r.name.clone())
            .collect()
    }
}

impl RewriteStep for ScopePropagation {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, records: &mut [HoldingRecord]) -> usize {
        let tagged = self.tagged_names(records);
        debug!(step = %self.name, issuers = tagged.len(), "propagation set built");

        let mut rewritten = 0;
        for record in records.iter_mut().filter(|r| tagged.contains(&r.name)) {
            if set_sector(record, &self.label) {
                rewritten += 1;
            }
        }
        rewritten
    }
}

// ============================================================================
// STEP 4: CROSS-FIELD CORRECTION
// ============================================================================

/// Fixed-income real-estate exposure is corporate debt
pub struct FixedIncomeRealEstate;

impl RewriteStep for FixedIncomeRealEstate {
    fn name(&self) -> &str {
        "fixed_income_real_estate"
    }

    fn apply(&self, records: &mut [HoldingRecord]) -> usize {
        let mut rewritten = 0;
        for record in records.iter_mut() {
            if record.is_fixed_income() && record.industry_or_sector == taxonomy::REAL_ESTATE {
                set_sector(record, taxonomy::CORPORATE_BONDS);
                rewritten += 1;
            }
        }
        rewritten
    }
}

// ============================================================================
// RECLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReclassifyOutcome {
    pub steps: Vec<StepOutcome>,
    pub warnings: Vec<PipelineWarning>,
}

impl ReclassifyOutcome {
    pub fn total_rewritten(&self) -> usize {
        self.steps.iter().map(|s| s.rewritten).sum()
    }
}

pub struct Reclassifier {
    steps: Vec<Box<dyn RewriteStep>>,
}

impl Reclassifier {
    /// The six-step chain, in its required order
    pub fn standard(rules: &RuleTables) -> Self {
        Reclassifier {
            steps: vec![
                Box::new(TableRelabel::new("legacy_labels", rules.legacy_sectors.clone())),
                Box::new(NameOverrides::new(rules.name_overrides.clone())),
                Box::new(ScopePropagation::new(
                    "real_estate_propagation",
                    taxonomy::REAL_ESTATE,
                )),
                Box::new(FixedIncomeRealEstate),
                Box::new(TableRelabel::new("bond_families", rules.bond_families.clone())),
                Box::new(ScopePropagation::new(
                    "treasuries_propagation",
                    taxonomy::TREASURIES,
                )),
            ],
        }
    }

    pub fn with_steps(steps: Vec<Box<dyn RewriteStep>>) -> Self {
        Reclassifier { steps }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, records: &mut [HoldingRecord]) -> ReclassifyOutcome {
        let mut steps = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let rewritten = step.apply(records);
            debug!(step = step.name(), rewritten, "rewrite step applied");
            steps.push(StepOutcome {
                step: step.name().to_string(),
                rewritten,
            });
        }

        let warnings = unmapped_sectors(records);
        for warning in &warnings {
            warn!("{}", warning);
        }

        let outcome = ReclassifyOutcome { steps, warnings };
        info!(
            rows = records.len(),
            rewritten = outcome.total_rewritten(),
            unmapped = outcome.warnings.len(),
            "reclassification complete"
        );

        outcome
    }
}

/// Sector values outside the closed vocabulary, one warning per value
pub fn unmapped_sectors(records: &[HoldingRecord]) -> Vec<PipelineWarning> {
    PipelineWarning::tally_unmapped(
        LabelField::IndustryOrSector,
        records
            .iter()
            .map(|r| r.industry_or_sector.as_str())
            .filter(|label| !taxonomy::is_canonical_sector(label)),
    )
}

// ============================================================================
// TESTS
// ============================================================================
