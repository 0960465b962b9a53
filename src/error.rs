// Error kinds for the integration pipeline
//
// Row-level problems (parse, reconciliation, validation) never abort a run by
// themselves: they become `Rejection`s in the run report. Everything in
// `PipelineError` is fatal for the current run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::RaceKey;

/// Fatal errors for a pipeline run or a query.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("schema error: {0}")]
    Schema(String),

    /// Duplicate primary key, missing foreign key target, CHECK failure
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("mapping table error: {0}")]
    MappingTable(String),

    #[error("reconciliation rejection rate {rate:.3} exceeds limit {limit:.3} ({rejected} of {total} rows)")]
    RejectionThreshold {
        rate: f64,
        limit: f64,
        rejected: usize,
        total: usize,
    },

    #[error("failed to read {path}: {source}")]
    Input {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Map constraint violations to `Integrity`, keep other SQLite errors as-is
    pub fn from_insert(err: rusqlite::Error, what: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, ref msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PipelineError::Integrity(format!(
                    "{}: {}",
                    what,
                    msg.clone().unwrap_or_else(|| e.to_string())
                ))
            }
            other => PipelineError::Sqlite(other),
        }
    }
}

/// Why a row could not be tied to exactly one canonical candidate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconciliationError {
    #[error("no mapping for {source_tag} name '{raw_name}' in {race}")]
    NoMatch {
        source_tag: String,
        raw_name: String,
        race: RaceKey,
    },

    #[error("{source_tag} name '{raw_name}' in {race} maps to several candidates: {}", .candidates.join(", "))]
    Ambiguous {
        source_tag: String,
        raw_name: String,
        race: RaceKey,
        candidates: Vec<String>,
    },

    #[error("candidate {candidate_key} is registered for {expected}, row says {found}")]
    RaceMismatch {
        candidate_key: String,
        expected: RaceKey,
        found: RaceKey,
    },

    #[error("candidate {candidate_key} has conflicting {table} rows")]
    ConflictingDuplicate {
        candidate_key: String,
        table: String,
    },
}

impl ReconciliationError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            ReconciliationError::NoMatch { .. } => ReasonCode::NoMatch,
            ReconciliationError::Ambiguous { .. } => ReasonCode::AmbiguousMatch,
            ReconciliationError::RaceMismatch { .. } => ReasonCode::RaceMismatch,
            ReconciliationError::ConflictingDuplicate { .. } => ReasonCode::ConflictingDuplicate,
        }
    }
}

// ============================================================================
// REJECTED ROWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionKind {
    /// Malformed or missing required field
    ParseError,
    /// No canonical key, or more than one
    ReconciliationError,
    /// Resolved row with an out-of-range value
    ValidationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MissingField,
    MalformedNumber,
    MalformedFlag,
    UnknownStance,
    UnknownState,
    UnknownDistrict,
    NoMatch,
    AmbiguousMatch,
    RaceMismatch,
    ConflictingDuplicate,
    OutOfRange,
}

/// One rejected source row, with enough provenance to find it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: ReasonCode,
    pub source_file: String,
    pub line_number: usize,
    pub raw_name: Option<String>,
    pub race: Option<String>,
    pub detail: String,
}

impl Rejection {
    pub fn summary(&self) -> String {
        format!(
            "{}:{} [{:?}/{:?}] {}",
            self.source_file, self.line_number, self.kind, self.reason, self.detail
        )
    }
}
