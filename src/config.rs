// ⚙️ Pipeline configuration
//
// Loaded from TOML; every field has a default so an empty file is valid.
//
//   database = "data/elections.db"
//   vote_share_tolerance = 1.0
//   max_reconciliation_rejection_rate = 0.5
//   schema_mode = "recreate"
//
//   [inputs]
//   stances = "data/election_deniers.csv"
//   manual_results = "data/manual_results.csv"

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::schema::SchemaMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite file the pipeline writes
    pub database: PathBuf,

    pub inputs: InputPaths,

    /// Allowed distance (percentage points) between a race's vote share sum and 100
    pub vote_share_tolerance: f64,

    /// Abort before writing when more than this share of rows fails reconciliation
    pub max_reconciliation_rejection_rate: f64,

    pub schema_mode: SchemaMode,

    /// Keep only forecast rows published on this date (None = every date)
    pub forecast_date: Option<NaiveDate>,

    /// Where `import` writes the JSON run report (None = don't write)
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub stances: PathBuf,
    pub house_forecasts: PathBuf,
    pub senate_forecasts: PathBuf,
    pub results: PathBuf,
    /// Hand-entered corrections; override scraped rows for the same candidate
    pub manual_results: Option<PathBuf>,
    pub name_map: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        InputPaths {
            stances: PathBuf::from("data/election_deniers.csv"),
            house_forecasts: PathBuf::from("data/house_district_toplines_2022.csv"),
            senate_forecasts: PathBuf::from("data/senate_state_toplines_2022.csv"),
            results: PathBuf::from("data/nbc_election_data.csv"),
            manual_results: None,
            name_map: PathBuf::from("data/name_mappings.csv"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            database: PathBuf::from("data/elections.db"),
            inputs: InputPaths::default(),
            vote_share_tolerance: 1.0,
            max_reconciliation_rejection_rate: 0.5,
            schema_mode: SchemaMode::Recreate,
            forecast_date: None,
            report: Some(PathBuf::from("data/run_report.json")),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let input = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&input)?;

        // Relative input paths are relative to the config file
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.vote_share_tolerance.is_finite() || self.vote_share_tolerance < 0.0 {
            return Err(PipelineError::Config(format!(
                "vote_share_tolerance must be a non-negative number, got {}",
                self.vote_share_tolerance
            )));
        }

        if !(0.0..=1.0).contains(&self.max_reconciliation_rejection_rate) {
            return Err(PipelineError::Config(format!(
                "max_reconciliation_rejection_rate must be within [0, 1], got {}",
                self.max_reconciliation_rejection_rate
            )));
        }

        if self.database.as_os_str().is_empty() {
            return Err(PipelineError::Config("database path is empty".into()));
        }

        Ok(())
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        join(&mut self.database);
        join(&mut self.inputs.stances);
        join(&mut self.inputs.house_forecasts);
        join(&mut self.inputs.senate_forecasts);
        join(&mut self.inputs.results);
        join(&mut self.inputs.name_map);
        if let Some(manual) = self.inputs.manual_results.as_mut() {
            join(manual);
        }
        if let Some(report) = self.report.as_mut() {
            join(report);
        }
    }
}
