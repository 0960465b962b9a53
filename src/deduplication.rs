// 🔍 Deduplication Engine - one satellite row per candidate
// Two strategies: Exact Match (collapse) and Conflicting (reject the later row)
//
// Sources repeat candidates: a scrape lists a runoff twice, two spellings of
// the same person both resolve. Rows are compared in file order; the first
// row for a candidate wins.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::RaceKey;
use crate::error::{ReasonCode, ReconciliationError, Rejection, RejectionKind};
use crate::parser::RowOrigin;

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// Same candidate, same values: the later row is dropped silently
    ExactMatch,

    /// Same candidate, different values: the later row is rejected
    Conflicting,
}

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub table: String,
    pub candidate_key: String,

    /// Line of the row that was kept
    pub kept_line: usize,

    /// Line of the row that was dropped
    pub duplicate_line: usize,

    pub strategy: MatchStrategy,

    /// Human-readable reason
    pub reason: String,
}

/// A resolved row waiting for its table insert
#[derive(Debug, Clone)]
pub struct KeyedRow<T> {
    pub candidate_key: String,
    pub raw_name: String,
    pub race: RaceKey,
    pub origin: RowOrigin,
    pub record: T,
}

#[derive(Debug)]
pub struct Deduplicated<T> {
    /// Surviving records, in canonical-key order
    pub records: Vec<T>,
    pub matches: Vec<DuplicateMatch>,
    pub rejections: Vec<Rejection>,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    /// Collapse `rows` to one record per candidate key.
    ///
    /// `rows` must be in file order; the returned records are sorted by key.
    pub fn dedupe<T: PartialEq>(&self, table: &str, rows: Vec<KeyedRow<T>>) -> Deduplicated<T> {
        let mut kept: Vec<KeyedRow<T>> = Vec::with_capacity(rows.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut matches = Vec::new();
        let mut rejections = Vec::new();

        for row in rows {
            let Some(&i) = index.get(&row.candidate_key) else {
                index.insert(row.candidate_key.clone(), kept.len());
                kept.push(row);
                continue;
            };

            let first = &kept[i];
            let m = self.classify(table, first, &row);

            match m.strategy {
                MatchStrategy::ExactMatch => {
                    debug!("{}", m.reason);
                }
                MatchStrategy::Conflicting => {
                    warn!("{}", m.reason);
                    let err = ReconciliationError::ConflictingDuplicate {
                        candidate_key: row.candidate_key.clone(),
                        table: table.to_string(),
                    };
                    rejections.push(row.origin.reject(
                        RejectionKind::ReconciliationError,
                        ReasonCode::ConflictingDuplicate,
                        Some(&row.raw_name),
                        Some(&row.race),
                        format!("{} (first seen at line {})", err, first.origin.line_number),
                    ));
                }
            }
            matches.push(m);
        }

        kept.sort_by(|a, b| a.candidate_key.cmp(&b.candidate_key));

        Deduplicated {
            records: kept.into_iter().map(|r| r.record).collect(),
            matches,
            rejections,
        }
    }

    fn classify<T: PartialEq>(
        &self,
        table: &str,
        first: &KeyedRow<T>,
        later: &KeyedRow<T>,
    ) -> DuplicateMatch {
        let strategy = if first.record == later.record {
            MatchStrategy::ExactMatch
        } else {
            MatchStrategy::Conflicting
        };

        let verb = match strategy {
            MatchStrategy::ExactMatch => "Duplicate",
            MatchStrategy::Conflicting => "Conflicting",
        };

        DuplicateMatch {
            table: table.to_string(),
            candidate_key: later.candidate_key.clone(),
            kept_line: first.origin.line_number,
            duplicate_line: later.origin.line_number,
            strategy,
            reason: format!(
                "{} {} row for {}: {}:{} vs line {}",
                verb,
                table,
                later.candidate_key,
                later.origin.source_file,
                later.origin.line_number,
                first.origin.line_number
            ),
        }
    }
}
