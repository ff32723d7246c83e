// ⚙️ Pipeline configuration (TOML)
//
// Example:
//
//   rules_path = "rules.json"
//
//   [resolver]
//   scope = "country_industry_category"
//   tie_break = "first_seen"
//   fold_legal_forms = true

use crate::error::Result;
use crate::resolver::ResolverConfig;
use crate::rules::RuleTables;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resolver: ResolverConfig,

    /// JSON rule tables replacing the built-in ones
    pub rules_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Rule tables from `rules_path`, or the built-in defaults
    pub fn load_rules(&self) -> Result<RuleTables> {
        match &self.rules_path {
            Some(path) => RuleTables::from_file(path),
            None => Ok(RuleTables::default()),
        }
    }
}
