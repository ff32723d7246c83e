// Holdings ETL - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod record;
pub mod taxonomy;
pub mod rules;
pub mod config;
pub mod logging;
pub mod ingest;      // Ingestor: disclosure CSVs → raw tables
pub mod normalizer;  // Field normalizer: schema + value cleanup
pub mod reclassify;  // Sector reclassifier: ordered rewrite chain
pub mod similarity;  // Token-sort fuzzy scoring
pub mod resolver;    // Entity name resolver
pub mod pipeline;    // Orchestrator + run report
pub mod db;          // SQLite sink + dashboard queries

// Re-export commonly used types
pub use error::{LabelField, PipelineError, PipelineWarning, Result};
pub use record::{Category, HoldingRecord, SourceTag};
pub use rules::{NameOverride, RuleTables, SubstitutionTable};
pub use config::PipelineConfig;
pub use ingest::{discover_sources, read_all, read_source, RawRow, RawTable};
pub use normalizer::{FieldNormalizer, NormalizedBatch};
pub use reclassify::{
    FixedIncomeRealEstate, NameOverrides, Reclassifier, ReclassifyOutcome,
    RewriteStep, ScopePropagation, StepOutcome, TableRelabel,
};
pub use similarity::TokenSortScorer;
pub use resolver::{
    CandidateScope, EntityNameResolver, MergeEntry, MergeOutcome, NameMergeMap,
    Resolution, ResolverConfig, ScopeFields, TieBreak,
};
pub use pipeline::{fingerprint, Pipeline, PipelineOutput, RunReport, SourceSummary};
pub use db::{
    GroupBy, GroupTotal, HoldingsQuery, LoadRun, StoreSummary, YearAllocation,
    allocation_by_year, find_run_by_fingerprint, get_latest_merge_map, get_load_runs,
    group_totals, open_existing, query_holdings, setup_database, store_output, verify_count,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
