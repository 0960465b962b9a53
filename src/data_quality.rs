// ✅ Data Quality Engine - range checks on resolved rows
//
// Runs after reconciliation, before a row may create a candidate.
// Critical failures reject the row (ValidationError / OutOfRange);
// warnings are logged and counted but the row is kept.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::entities::RaceKey;
use crate::error::{ReasonCode, Rejection, RejectionKind};
use crate::parser::{RawForecastRow, RawResultRow, RowOrigin};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: String::new(),
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            severity,
        }
    }

    pub fn is_critical(&self) -> bool {
        !self.passed && self.severity == Severity::Critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Value can't be stored
    Warning,  // Value is storable but suspicious
    Info,
}

/// Allowed interval for a numeric field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRange {
    /// [0, 1]
    Probability,
    /// [0, 100]
    Percent,
    /// >= 0
    Count,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            ValueRange::Probability => (0.0..=1.0).contains(&value),
            ValueRange::Percent => (0.0..=100.0).contains(&value),
            ValueRange::Count => value >= 0.0,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ValueRange::Probability => "[0, 1]",
            ValueRange::Percent => "[0, 100]",
            ValueRange::Count => ">= 0",
        }
    }
}

// ============================================================================
// QUALITY SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub rows_checked: usize,
    pub rows_rejected: usize,
    pub warnings: usize,
}

impl QualitySummary {
    pub fn summary(&self) -> String {
        format!(
            "Checked {} rows: {} rejected, {} warnings",
            self.rows_checked, self.rows_rejected, self.warnings
        )
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct DataQualityEngine {
    summary: QualitySummary,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> &QualitySummary {
        &self.summary
    }

    /// Check one numeric field against its range
    pub fn check_range(field: &str, value: f64, range: ValueRange) -> ValidationResult {
        if range.contains(value) {
            ValidationResult::pass("range", field)
        } else {
            ValidationResult::fail(
                "range",
                field,
                &format!("{} = {} is outside {}", field, value, range.describe()),
                Severity::Critical,
            )
        }
    }

    pub fn validate_forecast(&self, row: &RawForecastRow) -> Vec<ValidationResult> {
        let mut validations = vec![Self::check_range(
            "win_probability",
            row.win_probability,
            ValueRange::Probability,
        )];

        if let Some(share) = row.average_voteshare {
            validations.push(Self::check_range("average_voteshare", share, ValueRange::Percent));
        }

        validations
    }

    pub fn validate_result(&self, row: &RawResultRow) -> Vec<ValidationResult> {
        let mut validations = Vec::new();

        if let Some(share) = row.vote_share {
            validations.push(Self::check_range("vote_share", share, ValueRange::Percent));

            // A winner with no votes usually means a shifted column
            if row.is_winner == Some(true) && share == 0.0 {
                validations.push(ValidationResult::fail(
                    "winner_has_votes",
                    "vote_share",
                    "marked as winner with a 0% vote share",
                    Severity::Warning,
                ));
            }
        }

        if let Some(votes) = row.total_votes {
            validations.push(Self::check_range("total_votes", votes as f64, ValueRange::Count));
        }

        validations
    }

    /// Fold a row's validations into a verdict: Err for the first critical failure
    pub fn judge(
        &mut self,
        origin: &RowOrigin,
        raw_name: &str,
        race: &RaceKey,
        validations: &[ValidationResult],
    ) -> Result<(), Rejection> {
        self.summary.rows_checked += 1;

        for w in validations.iter().filter(|v| !v.passed && v.severity == Severity::Warning) {
            self.summary.warnings += 1;
            warn!(
                "{}:{} {} ({}): {}",
                origin.source_file, origin.line_number, raw_name, race, w.message
            );
        }

        match validations.iter().find(|v| v.is_critical()) {
            Some(failure) => {
                self.summary.rows_rejected += 1;
                Err(origin.reject(
                    RejectionKind::ValidationError,
                    ReasonCode::OutOfRange,
                    Some(raw_name),
                    Some(race),
                    failure.message.clone(),
                ))
            }
            None => Ok(()),
        }
    }
}
