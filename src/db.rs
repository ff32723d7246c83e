// 🗄️ Storage sink + dashboard query interface (SQLite)
//
// Each load replaces every (category, year) slice present in the batch inside
// one SQL transaction, so reloading the same disclosures never duplicates rows.

use crate::pipeline::{PipelineOutput, RunReport};
use crate::record::{Category, HoldingRecord};
use crate::resolver::{MergeEntry, MergeOutcome, NameMergeMap};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holdings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            country TEXT NOT NULL,
            name TEXT NOT NULL,
            sector TEXT NOT NULL,
            market_value INTEGER NOT NULL CHECK (market_value >= 0),
            percent_ownership REAL NOT NULL DEFAULT 0,
            category TEXT NOT NULL,
            year INTEGER NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS name_merges (
            run_id TEXT NOT NULL,
            original TEXT NOT NULL,
            canonical TEXT NOT NULL,
            score INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            PRIMARY KEY (run_id, original)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS load_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            input_fingerprint TEXT NOT NULL,
            source_count INTEGER NOT NULL,
            row_count INTEGER NOT NULL,
            merged_names INTEGER NOT NULL,
            warnings TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_holdings_year ON holdings(year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_holdings_country ON holdings(country)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_load_runs_fingerprint ON load_runs(input_fingerprint)",
        [],
    )?;

    Ok(())
}

/// Open a database that must already exist. Read paths use this so a
/// mistyped path fails instead of creating an empty file.
pub fn open_existing(path: &Path) -> Result<Connection> {
    anyhow::ensure!(
        path.is_file(),
        "database not found at {:?}; run `holdings-etl run` first",
        path
    );

    Connection::open(path).with_context(|| format!("Failed to open database {:?}", path))
}

// ============================================================================
// WRITES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSummary {
    pub replaced_slices: usize,
    pub deleted_rows: usize,
    pub inserted_rows: usize,
}

/// Persist holdings, merge map and run metadata atomically
pub fn store_output(conn: &mut Connection, output: &PipelineOutput) -> Result<StoreSummary> {
    let tx = conn.transaction()?;

    let summary = replace_holdings(&tx, &output.report.run_id, &output.records)?;
    insert_merge_map(&tx, &output.report.run_id, &output.merge_map)?;
    insert_load_run(&tx, &output.report)?;

    tx.commit().context("Failed to commit load")?;

    info!(
        run_id = %output.report.run_id,
        slices = summary.replaced_slices,
        deleted = summary.deleted_rows,
        inserted = summary.inserted_rows,
        "holdings stored"
    );

    Ok(summary)
}

/// Replace every (category, year) slice present in `records`
pub fn replace_holdings(
    conn: &Connection,
    run_id: &str,
    records: &[HoldingRecord],
) -> Result<StoreSummary> {
    let slices: BTreeSet<(Category, i32)> =
        records.iter().map(|r| (r.category, r.year)).collect();

    let mut deleted_rows = 0;
    for (category, year) in &slices {
        deleted_rows += conn.execute(
            "DELETE FROM holdings WHERE category = ?1 AND year = ?2",
            params![category.as_str(), year],
        )?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO holdings (
            region, country, name, sector, market_value, percent_ownership,
            category, year, run_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    for record in records {
        stmt.execute(params![
            record.region,
            record.country,
            record.name,
            record.industry_or_sector,
            record.market_value,
            record.percent_ownership.unwrap_or(0.0),
            record.category.as_str(),
            record.year,
            run_id,
        ])
        .with_context(|| format!("Failed to insert holding '{}'", record.name))?;
    }

    Ok(StoreSummary {
        replaced_slices: slices.len(),
        deleted_rows,
        inserted_rows: records.len(),
    })
}

pub fn insert_merge_map(conn: &Connection, run_id: &str, map: &NameMergeMap) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO name_merges (run_id, original, canonical, score, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for entry in map.entries() {
        let outcome = match entry.outcome {
            MergeOutcome::Merged => "merged",
            MergeOutcome::NoOp => "noop",
        };
        stmt.execute(params![
            run_id,
            entry.original,
            entry.canonical,
            entry.score,
            outcome
        ])?;
    }

    Ok(())
}

pub fn insert_load_run(conn: &Connection, report: &RunReport) -> Result<()> {
    let warnings_json = serde_json::to_string(&report.warnings)?;

    conn.execute(
        "INSERT INTO load_runs (
            run_id, started_at, input_fingerprint, source_count, row_count,
            merged_names, warnings
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            report.run_id,
            report.started_at.to_rfc3339(),
            report.input_fingerprint,
            report.sources.len() as i64,
            report.row_count as i64,
            report.merged_names as i64,
            warnings_json,
        ],
    )?;

    Ok(())
}

// ============================================================================
// RUN METADATA
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRun {
    pub run_id: String,
    pub started_at: String,
    pub input_fingerprint: String,
    pub source_count: i64,
    pub row_count: i64,
    pub merged_names: i64,
}

/// Most recent run that loaded exactly this input, if any
pub fn find_run_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<String>> {
    let run_id = conn
        .query_row(
            "SELECT run_id FROM load_runs WHERE input_fingerprint = ?1
             ORDER BY started_at DESC LIMIT 1",
            [fingerprint],
            |row| row.get(0),
        )
        .optional()?;

    Ok(run_id)
}

pub fn get_load_runs(conn: &Connection) -> Result<Vec<LoadRun>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, started_at, input_fingerprint, source_count, row_count, merged_names
         FROM load_runs
         ORDER BY started_at DESC",
    )?;

    let runs = stmt
        .query_map([], |row| {
            Ok(LoadRun {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                input_fingerprint: row.get(2)?,
                source_count: row.get(3)?,
                row_count: row.get(4)?,
                merged_names: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

/// Merge map recorded by the latest run
pub fn get_latest_merge_map(conn: &Connection) -> Result<NameMergeMap> {
    let latest: Option<String> = conn
        .query_row(
            "SELECT run_id FROM load_runs ORDER BY started_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let Some(run_id) = latest else {
        return Ok(NameMergeMap::new());
    };

    let mut stmt = conn.prepare(
        "SELECT original, canonical, score, outcome FROM name_merges
         WHERE run_id = ?1
         ORDER BY rowid",
    )?;

    let entries = stmt
        .query_map([run_id], |row| {
            let outcome: String = row.get(3)?;
            Ok(MergeEntry {
                original: row.get(0)?,
                canonical: row.get(1)?,
                score: row.get(2)?,
                outcome: if outcome == "merged" {
                    MergeOutcome::Merged
                } else {
                    MergeOutcome::NoOp
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NameMergeMap::from_entries(entries))
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM holdings", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// QUERIES
// ============================================================================

/// Read-only filter shared by every dashboard query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingsQuery {
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    /// Empty means all countries
    pub countries: Vec<String>,
}

impl HoldingsQuery {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(from) = self.year_from {
            values.push(Value::Integer(from as i64));
            conditions.push(format!("year >= ?{}", values.len()));
        }

        if let Some(to) = self.year_to {
            values.push(Value::Integer(to as i64));
            conditions.push(format!("year <= ?{}", values.len()));
        }

        if !self.countries.is_empty() {
            let placeholders: Vec<String> = self
                .countries
                .iter()
                .map(|c| {
                    values.push(Value::Text(c.clone()));
                    format!("?{}", values.len())
                })
                .collect();
            conditions.push(format!("country IN ({})", placeholders.join(", ")));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

fn category_from_row(label: String, idx: usize) -> rusqlite::Result<Category> {
    Category::from_label(&label).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(idx, "category".to_string(), rusqlite::types::Type::Text)
    })
}

pub fn query_holdings(conn: &Connection, query: &HoldingsQuery) -> Result<Vec<HoldingRecord>> {
    let (filter, values) = query.where_clause();
    let sql = format!(
        "SELECT region, country, name, sector, market_value, percent_ownership, category, year
         FROM holdings {}
         ORDER BY year, category, market_value DESC",
        filter
    );

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(HoldingRecord {
                region: row.get(0)?,
                country: row.get(1)?,
                name: row.get(2)?,
                industry_or_sector: row.get(3)?,
                market_value: row.get(4)?,
                percent_ownership: row.get(5)?,
                category: category_from_row(row.get(6)?, 6)?,
                year: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Dimensions the dashboard groups by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Year,
    Category,
    Sector,
    Region,
    Country,
}

impl GroupBy {
    fn column(&self) -> &'static str {
        match self {
            GroupBy::Year => "year",
            GroupBy::Category => "category",
            GroupBy::Sector => "sector",
            GroupBy::Region => "region",
            GroupBy::Country => "country",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "year" => Some(GroupBy::Year),
            "category" => Some(GroupBy::Category),
            "sector" | "industry" => Some(GroupBy::Sector),
            "region" => Some(GroupBy::Region),
            "country" => Some(GroupBy::Country),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    /// One value per grouping dimension, in request order
    pub keys: Vec<String>,
    pub holdings: i64,
    pub total_market_value: i64,
    pub average_ownership: f64,
}

pub fn group_totals(
    conn: &Connection,
    group_by: &[GroupBy],
    query: &HoldingsQuery,
) -> Result<Vec<GroupTotal>> {
    anyhow::ensure!(!group_by.is_empty(), "at least one grouping dimension is required");

    let columns: Vec<String> = group_by
        .iter()
        .map(|g| format!("CAST({} AS TEXT)", g.column()))
        .collect();
    let group_cols: Vec<&str> = group_by.iter().map(|g| g.column()).collect();
    let (filter, values) = query.where_clause();

    let sql = format!(
        "SELECT {}, COUNT(*), SUM(market_value), AVG(percent_ownership)
         FROM holdings {}
         GROUP BY {}
         ORDER BY {}",
        columns.join(", "),
        filter,
        group_cols.join(", "),
        group_cols.join(", ")
    );

    let n = group_by.len();
    let mut stmt = conn.prepare(&sql)?;
    let totals = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            let keys = (0..n)
                .map(|i| row.get::<_, String>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(GroupTotal {
                keys,
                holdings: row.get(n)?,
                total_market_value: row.get(n + 1)?,
                average_ownership: row.get(n + 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(totals)
}

/// Equity vs fixed-income share of total market value per year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearAllocation {
    pub year: i32,
    pub total_market_value: i64,
    pub equity_percentage: f64,
    pub fixed_income_percentage: f64,
}

pub fn allocation_by_year(conn: &Connection, query: &HoldingsQuery) -> Result<Vec<YearAllocation>> {
    let (filter, values) = query.where_clause();
    let sql = format!(
        "SELECT year,
                SUM(market_value),
                ROUND(SUM(CASE WHEN category = 'Equity' THEN market_value ELSE 0 END) * 100.0
                      / NULLIF(SUM(market_value), 0), 2),
                ROUND(SUM(CASE WHEN category = 'Fixed Income' THEN market_value ELSE 0 END) * 100.0
                      / NULLIF(SUM(market_value), 0), 2)
         FROM holdings {}
         GROUP BY year
         ORDER BY year",
        filter
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(YearAllocation {
                year: row.get(0)?,
                total_market_value: row.get(1)?,
                equity_percentage: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                fixed_income_percentage: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{RawRow, RawTable};
    use crate::pipeline::Pipeline;

    fn row(country: &str, name: &str, industry: &str, value: &str) -> RawRow {
        RawRow::new(1)
            .with("Region", Some("Europe"))
            .with("Country", Some(country))
            .with("Name", Some(name))
            .with("Industry", Some(industry))
            .with("Market Value(USD)", Some(value))
            .with("Ownership", Some("1.0"))
    }

    fn bond(country: &str, name: &str, sector: &str, value: &str) -> RawRow {
        RawRow::new(1)
            .with("Region", Some("Europe"))
            .with("Country", Some(country))
            .with("Name", Some(name))
            .with("Sector", Some(sector))
            .with("Market Value(USD)", Some(value))
    }

    fn sample_output() -> PipelineOutput {
        let tables = vec![
            RawTable::new(
                "EQ_2020.csv",
                vec![
                    row("Norway", "Equinor ASA", "Oil & Gas", "600"),
                    row("France", "TotalEnergies SE", "Energy", "200"),
                ],
            )
            .unwrap(),
            RawTable::new(
                "FI_2020.csv",
                vec![bond("Germany", "Bundesrepublik", "Government", "200")],
            )
            .unwrap(),
            RawTable::new(
                "EQ_2021.csv",
                vec![row("Norway", "Equinor ASA", "Energy", "1,000")],
            )
            .unwrap(),
        ];

        Pipeline::default().run(&tables).unwrap()
    }

    fn stored() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        store_output(&mut conn, &sample_output()).unwrap();
        conn
    }

    #[test]
    fn test_store_and_count() {
        let conn = stored();
        assert_eq!(verify_count(&conn).unwrap(), 4);
        assert_eq!(get_load_runs(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_reload_replaces_slices() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let output = sample_output();
        store_output(&mut conn, &output).unwrap();
        let second = store_output(&mut conn, &sample_output()).unwrap();

        assert_eq!(verify_count(&conn).unwrap(), 4);
        assert_eq!(second.replaced_slices, 3);
        assert_eq!(second.deleted_rows, 4);
    }

    #[test]
    fn test_find_run_by_fingerprint() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let output = sample_output();
        store_output(&mut conn, &output).unwrap();

        let found = find_run_by_fingerprint(&conn, &output.report.input_fingerprint).unwrap();
        assert_eq!(found, Some(output.report.run_id.clone()));
        assert_eq!(find_run_by_fingerprint(&conn, "nope").unwrap(), None);
    }

    #[test]
    fn test_query_filters_by_year_and_country() {
        let conn = stored();

        let all = query_holdings(&conn, &HoldingsQuery::default()).unwrap();
        assert_eq!(all.len(), 4);

        let norway_2021 = query_holdings(
            &conn,
            &HoldingsQuery {
                year_from: Some(2021),
                year_to: Some(2021),
                countries: vec!["Norway".to_string()],
            },
        )
        .unwrap();
        assert_eq!(norway_2021.len(), 1);
        assert_eq!(norway_2021[0].market_value, 1_000);
        assert_eq!(norway_2021[0].industry_or_sector, "Energy");

        let two_countries = query_holdings(
            &conn,
            &HoldingsQuery {
                countries: vec!["France".to_string(), "Germany".to_string()],
                ..HoldingsQuery::default()
            },
        )
        .unwrap();
        assert_eq!(two_countries.len(), 2);
    }

    #[test]
    fn test_fixed_income_ownership_stored_as_zero() {
        let conn = stored();
        let germany = query_holdings(
            &conn,
            &HoldingsQuery {
                countries: vec!["Germany".to_string()],
                ..HoldingsQuery::default()
            },
        )
        .unwrap();

        assert_eq!(germany[0].category, Category::FixedIncome);
        assert_eq!(germany[0].industry_or_sector, "Government Bonds");
        assert_eq!(germany[0].percent_ownership, Some(0.0));
    }

    #[test]
    fn test_group_totals() {
        let conn = stored();
        let totals = group_totals(
            &conn,
            &[GroupBy::Year, GroupBy::Category],
            &HoldingsQuery::default(),
        )
        .unwrap();

        assert_eq!(totals.len(), 3);
        assert_eq!(totals[0].keys, vec!["2020", "Equity"]);
        assert_eq!(totals[0].total_market_value, 800);
        assert_eq!(totals[0].holdings, 2);
        assert_eq!(totals[1].keys, vec!["2020", "Fixed Income"]);
    }

    #[test]
    fn test_group_totals_requires_dimension() {
        let conn = stored();
        assert!(group_totals(&conn, &[], &HoldingsQuery::default()).is_err());
    }

    #[test]
    fn test_allocation_by_year() {
        let conn = stored();
        let allocation = allocation_by_year(&conn, &HoldingsQuery::default()).unwrap();

        assert_eq!(allocation.len(), 2);
        assert_eq!(allocation[0].year, 2020);
        assert_eq!(allocation[0].total_market_value, 1_000);
        assert_eq!(allocation[0].equity_percentage, 80.0);
        assert_eq!(allocation[0].fixed_income_percentage, 20.0);
        assert_eq!(allocation[1].equity_percentage, 100.0);
    }

    #[test]
    fn test_latest_merge_map_round_trip() {
        let conn = stored();
        let map = get_latest_merge_map(&conn).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.canonical("Equinor ASA"), Some("Equinor ASA"));
        assert_eq!(map.merged_count(), 0);
    }

    #[test]
    fn test_open_existing_does_not_create_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("holdigns.db");

        assert!(open_existing(&missing).is_err());
        assert!(!missing.exists());

        let path = dir.path().join("holdings.db");
        let conn = Connection::open(&path).unwrap();
        setup_database(&conn).unwrap();
        drop(conn);

        let reopened = open_existing(&path).unwrap();
        assert_eq!(verify_count(&reopened).unwrap(), 0);
    }

    #[test]
    fn test_group_by_parse() {
        assert_eq!(GroupBy::parse("Industry"), Some(GroupBy::Sector));
        assert_eq!(GroupBy::parse(" year "), Some(GroupBy::Year));
        assert_eq!(GroupBy::parse("planet"), None);
    }
}
