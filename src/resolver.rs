// 🔍 Entity Name Resolver - merge spelling variants of the same issuer
//
// Candidates for a name are the names that share at least one scope
// (country, industry, and by default category) with it. The best-scoring
// candidate becomes the canonical name; the name itself is always a
// candidate, so anything without a perfect-score rival maps to itself.
//
// Complexity: the scope → names index is built once from a frozen snapshot,
// so the work is O(U · k) for U unique names and k candidates per name rather
// than a rescan of every row per name.

use crate::record::{Category, HoldingRecord};
use crate::similarity::TokenSortScorer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Fields that bound the candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFields {
    CountryIndustry,
    CountryIndustryCategory,
}

/// How to pick among candidates with the same top score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Earliest first-seen name wins
    FirstSeen,
    /// Name backing the most rows wins, then first-seen
    MostRows,
    /// Longest spelling wins, then first-seen
    LongestName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub scope: ScopeFields,
    pub tie_break: TieBreak,
    pub fold_legal_forms: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            scope: ScopeFields::CountryIndustryCategory,
            tie_break: TieBreak::FirstSeen,
            fold_legal_forms: true,
        }
    }
}

// ============================================================================
// CANDIDATE SCOPE
// ============================================================================

/// `(country, industry_or_sector, category)`; category is `None` when the
/// resolver is configured for the two-field scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateScope {
    pub country: String,
    pub industry_or_sector: String,
    pub category: Option<Category>,
}

impl CandidateScope {
    pub fn of(record: &HoldingRecord, fields: ScopeFields) -> Self {
        CandidateScope {
            country: record.country.clone(),
            industry_or_sector: record.industry_or_sector.clone(),
            category: match fields {
                ScopeFields::CountryIndustry => None,
                ScopeFields::CountryIndustryCategory => Some(record.category),
            },
        }
    }
}

// ============================================================================
// NAME MERGE MAP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// Rewritten to a different spelling
    Merged,
    /// Resolved to itself
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEntry {
    pub original: String,
    pub canonical: String,
    /// Similarity of `original` to `canonical`, 0-100
    pub score: u8,
    pub outcome: MergeOutcome,
}

/// original → canonical, one entry per distinct name, first-seen order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameMergeMap {
    entries: Vec<MergeEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl NameMergeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision. A name already present keeps its first decision.
    pub fn record(&mut self, original: &str, canonical: &str, score: u8) -> bool {
        if self.index.contains_key(original) {
            return false;
        }

        let outcome = if original == canonical {
            MergeOutcome::NoOp
        } else {
            MergeOutcome::Merged
        };

        self.index.insert(original.to_string(), self.entries.len());
        self.entries.push(MergeEntry {
            original: original.to_string(),
            canonical: canonical.to_string(),
            score,
            outcome,
        });
        true
    }

    pub fn canonical(&self, original: &str) -> Option<&str> {
        self.entry(original).map(|e| e.canonical.as_str())
    }

    pub fn entry(&self, original: &str) -> Option<&MergeEntry> {
        self.index.get(original).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[MergeEntry] {
        &self.entries
    }

    pub fn merges(&self) -> impl Iterator<Item = &MergeEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome == MergeOutcome::Merged)
    }

    pub fn merged_count(&self) -> usize {
        self.merges().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the lookup index after deserialization
    pub fn from_entries(entries: Vec<MergeEntry>) -> Self {
        let mut map = NameMergeMap::new();
        for entry in entries {
            map.index.insert(entry.original.clone(), map.entries.len());
            map.entries.push(entry);
        }
        map
    }

    /// Audit CSV: original, canonical, score, outcome
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone)]
pub struct Resolution {
    pub records: Vec<HoldingRecord>,
    pub merge_map: NameMergeMap,
}

pub struct EntityNameResolver {
    config: ResolverConfig,
    scorer: TokenSortScorer,
}

/// Snapshot of the table the scoring reads from
struct NameIndex {
    names: Vec<String>,
    keys: Vec<String>,
    rows: Vec<usize>,
    scopes: Vec<BTreeSet<CandidateScope>>,
    by_scope: HashMap<CandidateScope, BTreeSet<usize>>,
}

impl EntityNameResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let scorer = TokenSortScorer::new(config.fold_legal_forms);
        EntityNameResolver { config, scorer }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve names and return a rewritten copy plus the merge map
    pub fn resolve(&self, records: &[HoldingRecord]) -> Resolution {
        let index = self.build_index(records);

        // Direct decisions, all read from the frozen snapshot
        let targets: Vec<usize> = (0..index.names.len())
            .map(|i| self.best_candidate(&index, i))
            .collect();

        let mut merge_map = NameMergeMap::new();
        for (i, name) in index.names.iter().enumerate() {
            let canonical = collapse(&targets, i);
            let score = if canonical == i {
                100
            } else {
                self.scorer.score_keys(&index.keys[i], &index.keys[canonical])
            };

            if canonical != i {
                debug!(from = %name, to = %index.names[canonical], score, "merging issuer name");
            }
            merge_map.record(name, &index.names[canonical], score);
        }

        let records: Vec<HoldingRecord> = records
            .iter()
            .map(|r| {
                let mut out = r.clone();
                if let Some(canonical) = merge_map.canonical(&r.name) {
                    if canonical != r.name {
                        out.name = canonical.to_string();
                    }
                }
                out
            })
            .collect();

        info!(
            unique_names = merge_map.len(),
            merged = merge_map.merged_count(),
            "entity name resolution complete"
        );

        Resolution { records, merge_map }
    }

    fn build_index(&self, records: &[HoldingRecord]) -> NameIndex {
        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut index = NameIndex {
            names: Vec::new(),
            keys: Vec::new(),
            rows: Vec::new(),
            scopes: Vec::new(),
            by_scope: HashMap::new(),
        };

        for record in records {
            let i = match position.get(record.name.as_str()) {
                Some(&i) => i,
                None => {
                    let i = index.names.len();
                    position.insert(record.name.as_str(), i);
                    index.names.push(record.name.clone());
                    index.keys.push(self.scorer.sort_key(&record.name));
                    index.rows.push(0);
                    index.scopes.push(BTreeSet::new());
                    i
                }
            };

            let scope = CandidateScope::of(record, self.config.scope);
            index.rows[i] += 1;
            index.by_scope.entry(scope.clone()).or_default().insert(i);
            index.scopes[i].insert(scope);
        }

        index
    }

    /// Highest-scoring candidate for name `i` (possibly `i` itself)
    fn best_candidate(&self, index: &NameIndex, i: usize) -> usize {
        let own_key = &index.keys[i];
        if own_key.is_empty() {
            return i;
        }

        // BTreeSet keeps candidates in first-seen order
        let candidates: BTreeSet<usize> = index.scopes[i]
            .iter()
            .filter_map(|scope| index.by_scope.get(scope))
            .flat_map(|names| names.iter().copied())
            .collect();

        let mut best = i;
        let mut best_score = 0u8;
        let mut have_best = false;

        for candidate in candidates {
            let score = if candidate == i {
                100
            } else {
                self.scorer.score_keys(own_key, &index.keys[candidate])
            };

            let better = !have_best
                || score > best_score
                || (score == best_score && self.wins_tie(index, candidate, best));
            if better {
                best = candidate;
                best_score = score;
                have_best = true;
            }
        }

        best
    }

    /// Whether `challenger` beats `incumbent` on equal score.
    /// Candidates arrive in first-seen order, so first-seen never replaces.
    fn wins_tie(&self, index: &NameIndex, challenger: usize, incumbent: usize) -> bool {
        match self.config.tie_break {
            TieBreak::FirstSeen => false,
            TieBreak::MostRows => index.rows[challenger] > index.rows[incumbent],
            TieBreak::LongestName => {
                index.names[challenger].chars().count() > index.names[incumbent].chars().count()
            }
        }
    }
}

impl Default for EntityNameResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

/// Follow n → c → d … to a fixed point.
/// Every tie-break is a total order, so chains cannot cycle; the step bound
/// only guards against a bad target table.
fn collapse(targets: &[usize], start: usize) -> usize {
    let mut current = start;
    for _ in 0..targets.len() {
        let next = targets[current];
        if next == current {
            return current;
        }
        current = next;
    }
    current
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(name: &str, country: &str, sector: &str, category: Category) -> HoldingRecord {
        HoldingRecord {
            region: "North America".to_string(),
            country: country.to_string(),
            name: name.to_string(),
            industry_or_sector: sector.to_string(),
            market_value: 100,
            percent_ownership: Some(0.1),
            category,
            year: 2020,
        }
    }

    #[test]
    fn test_unique_name_merges_to_itself() {
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("Unique Corp", "Canada", "Industrials", Category::Equity),
            holding("Other Holdings", "Norway", "Energy", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);
        let entry = resolution.merge_map.entry("Unique Corp").unwrap();

        assert_eq!(resolution.merge_map.canonical("Unique Corp"), Some("Unique Corp"));
        assert_eq!(entry.outcome, MergeOutcome::NoOp);
        assert_eq!(entry.score, 100);
        assert_eq!(resolution.records, records);
    }

    #[test]
    fn test_fuzzy_merge_picks_one_of_the_inputs() {
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("Acme Corp.", "Canada", "Industrials", Category::Equity),
            holding("Acme Corporation", "Canada", "Industrials", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);
        let a = resolution.merge_map.canonical("Acme Corp.").unwrap();
        let b = resolution.merge_map.canonical("Acme Corporation").unwrap();

        assert_eq!(a, b);
        assert!(a == "Acme Corp." || a == "Acme Corporation");
        assert_eq!(resolution.merge_map.merged_count(), 1);
        assert!(resolution.records.iter().all(|r| r.name == a));
    }

    #[test]
    fn test_scope_isolation() {
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("Acme Corp", "Canada", "Industrials", Category::Equity),
            holding("ACME CORP", "Brazil", "Utilities", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);

        assert_eq!(resolution.merge_map.canonical("Acme Corp"), Some("Acme Corp"));
        assert_eq!(resolution.merge_map.canonical("ACME CORP"), Some("ACME CORP"));
        assert_eq!(resolution.merge_map.merged_count(), 0);
    }

    #[test]
    fn test_category_in_scope_is_configurable() {
        let records = vec![
            holding("Acme Corp", "Canada", "Industrials", Category::Equity),
            holding("ACME CORP", "Canada", "Industrials", Category::FixedIncome),
        ];

        let three_field = EntityNameResolver::default().resolve(&records);
        assert_eq!(three_field.merge_map.merged_count(), 0);

        let two_field = EntityNameResolver::new(ResolverConfig {
            scope: ScopeFields::CountryIndustry,
            ..ResolverConfig::default()
        })
        .resolve(&records);
        assert_eq!(two_field.merge_map.canonical("ACME CORP"), Some("Acme Corp"));
    }

    #[test]
    fn test_name_in_several_scopes_sees_all_of_them() {
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("Acme Corp", "Canada", "Industrials", Category::Equity),
            holding("Acme Corp", "Canada", "Energy", Category::Equity),
            holding("ACME CORP", "Canada", "Energy", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);
        assert_eq!(resolution.merge_map.canonical("ACME CORP"), Some("Acme Corp"));
    }

    #[test]
    fn test_most_rows_tie_break() {
        let records = vec![
            holding("Acme Corp.", "Canada", "Industrials", Category::Equity),
            holding("ACME CORP", "Canada", "Industrials", Category::Equity),
            holding("ACME CORP", "Canada", "Industrials", Category::Equity),
        ];

        let first_seen = EntityNameResolver::default().resolve(&records);
        assert_eq!(first_seen.merge_map.canonical("ACME CORP"), Some("Acme Corp."));

        let most_rows = EntityNameResolver::new(ResolverConfig {
            tie_break: TieBreak::MostRows,
            ..ResolverConfig::default()
        })
        .resolve(&records);
        assert_eq!(most_rows.merge_map.canonical("Acme Corp."), Some("ACME CORP"));
        assert_eq!(most_rows.merge_map.canonical("ACME CORP"), Some("ACME CORP"));
    }

    #[test]
    fn test_longest_name_tie_break() {
        let records = vec![
            holding("Acme Corp", "Canada", "Industrials", Category::Equity),
            holding("Acme Corporation", "Canada", "Industrials", Category::Equity),
        ];

        let resolution = EntityNameResolver::new(ResolverConfig {
            tie_break: TieBreak::LongestName,
            ..ResolverConfig::default()
        })
        .resolve(&records);

        assert_eq!(resolution.merge_map.canonical("Acme Corp"), Some("Acme Corporation"));
    }

    #[test]
    fn test_merge_chains_collapse_to_fixed_point() {
        // "Acme Corp." only sees "Acme Corp" (Industrials); "Acme Corp" also
        // sees the earlier "ACME CORP" through Energy.
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("ACME CORP", "Canada", "Energy", Category::Equity),
            holding("Acme Corp", "Canada", "Industrials", Category::Equity),
            holding("Acme Corp", "Canada", "Energy", Category::Equity),
            holding("Acme Corp.", "Canada", "Industrials", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);

        for name in ["ACME CORP", "Acme Corp", "Acme Corp."] {
            assert_eq!(resolution.merge_map.canonical(name), Some("ACME CORP"));
        }
        assert!(resolution.records.iter().all(|r| r.name == "ACME CORP"));
    }

    #[test]
    fn test_similar_but_not_identical_names_stay_apart() {
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("Bank of Montreal", "Canada", "Financials", Category::Equity),
            holding("Bank of Nova Scotia", "Canada", "Financials", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);
        assert_eq!(resolution.merge_map.merged_count(), 0);
    }

    #[test]
    fn test_punctuation_only_name_maps_to_itself() {
        let resolver = EntityNameResolver::default();
        let records = vec![
            holding("--", "Canada", "Financials", Category::Equity),
            holding("...", "Canada", "Financials", Category::Equity),
        ];

        let resolution = resolver.resolve(&records);
        assert_eq!(resolution.merge_map.canonical("..."), Some("..."));
        assert_eq!(resolution.merge_map.canonical("--"), Some("--"));
    }

    #[test]
    fn test_merge_map_keeps_first_decision() {
        let mut map = NameMergeMap::new();
        assert!(map.record("A", "B", 100));
        assert!(!map.record("A", "C", 100));
        assert_eq!(map.canonical("A"), Some("B"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_merge_map_csv_export() {
        let mut map = NameMergeMap::new();
        map.record("Acme Corporation", "Acme Corp.", 100);
        map.record("Unique Corp", "Unique Corp", 100);

        let mut out = Vec::new();
        map.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("original,canonical,score,outcome"));
        assert!(text.contains("Acme Corporation,Acme Corp.,100,Merged"));
        assert!(text.contains("Unique Corp,Unique Corp,100,NoOp"));
    }

    #[test]
    fn test_merge_map_json_round_trip_rebuilds_index() {
        let mut map = NameMergeMap::new();
        map.record("X Ltd", "X Limited", 100);

        let json = serde_json::to_string(map.entries()).unwrap();
        let entries: Vec<MergeEntry> = serde_json::from_str(&json).unwrap();
        let restored = NameMergeMap::from_entries(entries);

        assert_eq!(restored.canonical("X Ltd"), Some("X Limited"));
    }
}
