// 🚚 Transform pipeline - normalize → reclassify → resolve
//
// Single-pass, single-threaded batch over an in-memory table. Every step is
// deterministic, so rerunning on the same raw input yields the same output.

use crate::config::PipelineConfig;
use crate::error::{PipelineWarning, Result};
use crate::ingest::RawTable;
use crate::normalizer::FieldNormalizer;
use crate::reclassify::{Reclassifier, StepOutcome};
use crate::record::{Category, HoldingRecord};
use crate::resolver::{EntityNameResolver, NameMergeMap, ResolverConfig};
use crate::rules::RuleTables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use tracing::info;

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub category: Category,
    pub year: i32,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,

    /// SHA-256 over every source id and cell, order-normalized
    pub input_fingerprint: String,

    pub sources: Vec<SourceSummary>,
    pub row_count: usize,
    pub steps: Vec<StepOutcome>,
    pub warnings: Vec<PipelineWarning>,
    pub unique_names: usize,
    pub merged_names: usize,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} sources, {} rows | {} sector rewrites | {} unique names, {} merged | {} warnings",
            self.sources.len(),
            self.row_count,
            self.steps.iter().map(|s| s.rewritten).sum::<usize>(),
            self.unique_names,
            self.merged_names,
            self.warnings.len()
        )
    }
}

// ============================================================================
// PIPELINE OUTPUT
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub records: Vec<HoldingRecord>,
    pub merge_map: NameMergeMap,
    pub report: RunReport,
}

impl PipelineOutput {
    /// Final table in the storage schema's column order
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for record in &self.records {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    normalizer: FieldNormalizer,
    reclassifier: Reclassifier,
    resolver: EntityNameResolver,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, rules: RuleTables) -> Self {
        Pipeline {
            reclassifier: Reclassifier::standard(&rules),
            normalizer: FieldNormalizer::new(rules),
            resolver: EntityNameResolver::new(config.resolver.clone()),
        }
    }

    /// Build from config, loading rule tables from `rules_path` if set
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let rules = config.load_rules()?;
        Ok(Self::new(config, rules))
    }

    /// Fingerprint of `tables` under this pipeline's rules and resolver settings
    pub fn fingerprint(&self, tables: &[RawTable]) -> Result<String> {
        fingerprint(tables, self.normalizer.rules(), self.resolver.config())
    }

    pub fn run(&self, tables: &[RawTable]) -> Result<PipelineOutput> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, sources = tables.len(), "pipeline run started");

        let batch = self.normalizer.normalize(tables)?;
        let mut records = batch.records;
        let mut warnings = batch.warnings;

        let reclassified = self.reclassifier.run(&mut records);
        warnings.extend(reclassified.warnings);

        let resolution = self.resolver.resolve(&records);

        let report = RunReport {
            run_id,
            started_at,
            input_fingerprint: self.fingerprint(tables)?,
            sources: tables
                .iter()
                .map(|t| SourceSummary {
                    source_id: t.source_id.clone(),
                    category: t.tag.category,
                    year: t.tag.year,
                    rows: t.len(),
                })
                .collect(),
            row_count: resolution.records.len(),
            steps: reclassified.steps,
            warnings,
            unique_names: resolution.merge_map.len(),
            merged_names: resolution.merge_map.merged_count(),
        };
        info!("{}", report.summary());

        Ok(PipelineOutput {
            records: resolution.records,
            merge_map: resolution.merge_map,
            report,
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(&PipelineConfig::default(), RuleTables::default())
    }
}

/// Content hash of the raw input plus every setting that shapes the output.
/// Column order within a row does not matter.
pub fn fingerprint(
    tables: &[RawTable],
    rules: &RuleTables,
    resolver: &ResolverConfig,
) -> Result<String> {
    let mut hasher = Sha256::new();

    hasher.update(serde_json::to_vec(rules)?);
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(resolver)?);
    hasher.update([0u8]);

    for table in tables {
        hasher.update(table.source_id.as_bytes());
        hasher.update([0u8]);

        for row in &table.rows {
            let mut cells: Vec<(&String, &Option<String>)> = row.fields.iter().collect();
            cells.sort_by(|a, b| a.0.cmp(b.0));

            for (column, value) in cells {
                hasher.update(column.as_bytes());
                hasher.update([0x1f]);
                hasher.update(value.as_deref().unwrap_or("").as_bytes());
                hasher.update([0x1e]);
            }
            hasher.update([b'\n']);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawRow;
    use crate::resolver::TieBreak;

    fn row(name: &str, industry: &str, value: &str) -> RawRow {
        RawRow::new(1)
            .with("Region", Some("North America"))
            .with("Country", Some("Canada"))
            .with("Name", Some(name))
            .with("Industry", Some(industry))
            .with("Market Value(USD)", Some(value))
            .with("Ownership", Some("0.5"))
    }

    fn tables() -> Vec<RawTable> {
        vec![
            RawTable::new(
                "EQ_2015.csv",
                vec![
                    row("Acme REIT", "Financials", "1,000"),
                    row("Acme Corp.", "Industrials", "2,000"),
                ],
            )
            .unwrap(),
            RawTable::new(
                "EQ_2021.csv",
                vec![
                    row("Acme REIT", "Real Estate", "1,500"),
                    row("Acme Corporation", "Industrials", "2,500"),
                ],
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_run_end_to_end() {
        let output = Pipeline::default().run(&tables()).unwrap();

        assert_eq!(output.records.len(), 4);
        assert!(output
            .records
            .iter()
            .filter(|r| r.name == "Acme REIT")
            .all(|r| r.industry_or_sector == "Real Estate"));
        assert_eq!(output.merge_map.canonical("Acme Corporation"), Some("Acme Corp."));

        assert_eq!(output.report.sources.len(), 2);
        assert_eq!(output.report.row_count, 4);
        assert_eq!(output.report.unique_names, 3);
        assert_eq!(output.report.merged_names, 1);
        assert!(output.report.warnings.is_empty());
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let pipeline = Pipeline::default();
        let first = pipeline.run(&tables()).unwrap();
        let second = pipeline.run(&tables()).unwrap();

        assert_eq!(first.records, second.records);
        assert_eq!(first.merge_map, second.merge_map);
        assert_eq!(first.report.input_fingerprint, second.report.input_fingerprint);
        assert_ne!(first.report.run_id, second.report.run_id);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = tables();
        let mut b = tables();
        b[0].rows[0]
            .fields
            .insert("Market Value(USD)".to_string(), Some("1,001".to_string()));

        let pipeline = Pipeline::default();
        assert_ne!(pipeline.fingerprint(&a).unwrap(), pipeline.fingerprint(&b).unwrap());
        assert_eq!(pipeline.fingerprint(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_rules_and_resolver_settings() {
        let input = tables();
        let baseline = Pipeline::default().fingerprint(&input).unwrap();

        let mut rules = RuleTables::default();
        rules
            .legacy_sectors
            .insert("Industrial Goods", "Industrials");
        let edited_rules = Pipeline::new(&PipelineConfig::default(), rules)
            .fingerprint(&input)
            .unwrap();
        assert_ne!(baseline, edited_rules);

        let mut config = PipelineConfig::default();
        config.resolver.tie_break = TieBreak::MostRows;
        let edited_resolver = Pipeline::new(&config, RuleTables::default())
            .fingerprint(&input)
            .unwrap();
        assert_ne!(baseline, edited_resolver);

        assert_eq!(baseline, Pipeline::default().fingerprint(&input).unwrap());
    }

    #[test]
    fn test_write_csv_uses_output_column_names() {
        let output = Pipeline::default().run(&tables()).unwrap();
        let mut buf = Vec::new();
        output.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with(
            "region,country,name,sector,market_value,percent_ownership,category,year"
        ));
        assert!(text.contains("Equity,2021"));
    }

    #[test]
    fn test_schema_error_aborts_run() {
        let mut broken = tables();
        broken[1].rows[0].fields.remove("Name");

        assert!(Pipeline::default().run(&broken).is_err());
    }
}
