// Midterm Integration - Core Library
// CSV sources → name reconciliation → SQLite → read-only queries

pub mod config;
pub mod data_quality;
pub mod db;
pub mod deduplication;
pub mod entities;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod reconciliation;
pub mod schema;
pub mod tally;

// Re-export commonly used types
pub use config::{InputPaths, PipelineConfig};
pub use data_quality::{DataQualityEngine, QualitySummary, Severity, ValidationResult, ValueRange};
pub use db::{
    open, open_in_memory, open_read_only, orphaned_rows, store_digest, table_digest,
    ForecastRecord, ResultRecord, StanceRecord,
};
pub use deduplication::{DeduplicationEngine, DuplicateMatch, MatchStrategy};
pub use entities::{
    Candidate, CandidateRegistry, District, Office, RaceKey, StateCode, Stance,
};
pub use error::{PipelineError, ReasonCode, ReconciliationError, Rejection, RejectionKind};
pub use parser::{
    ForecastLoader, Loaded, ResultLayer, ResultsLoader, SourceLoader, SourceTag, SourceType,
    StanceLoader,
};
pub use pipeline::{Integrated, IntegrationPipeline, RunReport, SourceRows, TableCounts};
pub use query::{
    average_forecasts, candidate_counts, candidate_outcomes, race_ratings, win_rates,
    CandidateOutcome, ForecastAverage, RaceRating, Rating, StanceCount, WinRate, WinRateFilter,
};
pub use reconciliation::{normalize_name, NameMap};
pub use schema::SchemaMode;
pub use tally::{RaceTally, TallyResult, VoteShareEngine, VoteShareReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
