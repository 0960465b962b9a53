// ⚖️ Vote Share Tally - per-race sanity check on results
//
// Every candidate's share in a race should add up to ~100%:
//
//   Σ vote_share(race) = 100 ± tolerance
//
// A race that misses is reported, never corrected: the data is stored as the
// sources gave it and the report tells you where to look.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::ResultRecord;
use crate::entities::RaceKey;

// ============================================================================
// TALLY RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TallyResult {
    /// Shares sum to 100 within tolerance
    Balanced { share_sum: f64 },

    /// Off by more than the tolerance, less than the major threshold
    MinorDiscrepancy {
        share_sum: f64,
        difference: f64,
        tolerance: f64,
    },

    /// Off by the major threshold or more
    MajorDiscrepancy {
        share_sum: f64,
        difference: f64,
        /// Candidates in the race with no vote share
        missing_shares: Vec<String>,
    },

    /// No candidate in the race has a vote share yet
    Unreported,
}

impl TallyResult {
    pub fn has_discrepancy(&self) -> bool {
        matches!(
            self,
            TallyResult::MinorDiscrepancy { .. } | TallyResult::MajorDiscrepancy { .. }
        )
    }

    pub fn difference(&self) -> f64 {
        match self {
            TallyResult::Balanced { .. } | TallyResult::Unreported => 0.0,
            TallyResult::MinorDiscrepancy { difference, .. } => *difference,
            TallyResult::MajorDiscrepancy { difference, .. } => *difference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceTally {
    pub race: String,
    pub candidates: usize,
    pub winners: usize,
    pub result: TallyResult,
}

impl RaceTally {
    /// Shares off, or more than one winner
    pub fn is_flagged(&self) -> bool {
        self.result.has_discrepancy() || self.winners > 1
    }

    pub fn summary(&self) -> String {
        match &self.result {
            TallyResult::Unreported => format!(
                "{}: {} candidates, no shares reported",
                self.race, self.candidates
            ),
            TallyResult::Balanced { share_sum }
            | TallyResult::MinorDiscrepancy { share_sum, .. }
            | TallyResult::MajorDiscrepancy { share_sum, .. } => format!(
                "{}: {} candidates, shares sum to {:.2}% (off by {:.2}), {} winner(s)",
                self.race,
                self.candidates,
                share_sum,
                self.result.difference(),
                self.winners
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteShareReport {
    pub races_checked: usize,
    pub races_balanced: usize,
    pub races_unreported: usize,
    /// Races with a share discrepancy or several winners, in race order
    pub flagged: Vec<RaceTally>,
}

impl VoteShareReport {
    pub fn summary(&self) -> String {
        format!(
            "{} races: {} balanced, {} unreported, {} flagged",
            self.races_checked,
            self.races_balanced,
            self.races_unreported,
            self.flagged.len()
        )
    }
}

// ============================================================================
// VOTE SHARE ENGINE
// ============================================================================

pub struct VoteShareEngine {
    /// Allowed distance from 100, in percentage points (default: 1.0)
    pub tolerance: f64,

    /// Minor vs major discrepancy (default: 5.0 points)
    pub major_discrepancy_threshold: f64,
}

impl VoteShareEngine {
    pub fn new() -> Self {
        VoteShareEngine {
            tolerance: 1.0,
            major_discrepancy_threshold: 5.0,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        VoteShareEngine {
            tolerance,
            ..Self::new()
        }
    }

    /// Tally one race's results
    pub fn tally_race(&self, race: &RaceKey, results: &[&ResultRecord]) -> RaceTally {
        let winners = results.iter().filter(|r| r.is_winner == Some(true)).count();
        let reported: Vec<f64> = results.iter().filter_map(|r| r.vote_share).collect();

        let result = if reported.is_empty() {
            TallyResult::Unreported
        } else {
            let share_sum: f64 = reported.iter().sum();
            let difference = (share_sum - 100.0).abs();

            if difference <= self.tolerance {
                TallyResult::Balanced { share_sum }
            } else if difference < self.major_discrepancy_threshold {
                TallyResult::MinorDiscrepancy {
                    share_sum,
                    difference,
                    tolerance: self.tolerance,
                }
            } else {
                TallyResult::MajorDiscrepancy {
                    share_sum,
                    difference,
                    missing_shares: results
                        .iter()
                        .filter(|r| r.vote_share.is_none())
                        .map(|r| r.candidate_key.clone())
                        .collect(),
                }
            }
        };

        RaceTally {
            race: race.to_string(),
            candidates: results.len(),
            winners,
            result,
        }
    }

    /// Group results by race and tally each one
    pub fn check(&self, results: &[ResultRecord]) -> VoteShareReport {
        let mut by_race: BTreeMap<&RaceKey, Vec<&ResultRecord>> = BTreeMap::new();
        for r in results {
            by_race.entry(&r.race).or_default().push(r);
        }

        let mut report = VoteShareReport {
            races_checked: by_race.len(),
            ..Default::default()
        };

        for (race, rows) in by_race {
            let tally = self.tally_race(race, &rows);

            match tally.result {
                TallyResult::Balanced { .. } => report.races_balanced += 1,
                TallyResult::Unreported => report.races_unreported += 1,
                _ => {}
            }

            if tally.is_flagged() {
                warn!("Vote share check: {}", tally.summary());
                report.flagged.push(tally);
            }
        }

        report
    }
}

impl Default for VoteShareEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ResultLayer;

    fn result(key: &str, race: &str, share: Option<f64>, winner: Option<bool>) -> ResultRecord {
        ResultRecord {
            candidate_key: key.to_string(),
            race: race.parse().unwrap(),
            vote_share: share,
            is_winner: winner,
            total_votes: None,
            provenance: ResultLayer::Scraped,
        }
    }

    #[test]
    fn test_balanced_race() {
        let engine = VoteShareEngine::new();
        let report = engine.check(&[
            result("a", "OH-03", Some(58.3), Some(true)),
            result("b", "OH-03", Some(41.2), Some(false)),
        ]);

        assert_eq!(report.races_checked, 1);
        assert_eq!(report.races_balanced, 1);
        assert!(report.flagged.is_empty());
    }

    #[test]
    fn test_minor_and_major_discrepancies() {
        let engine = VoteShareEngine::new();
        let report = engine.check(&[
            // 97.0: minor
            result("a", "OH-03", Some(60.0), Some(true)),
            result("b", "OH-03", Some(37.0), Some(false)),
            // 55.0 with one share missing: major
            result("c", "PA-S3", Some(55.0), Some(true)),
            result("d", "PA-S3", None, Some(false)),
        ]);

        assert_eq!(report.flagged.len(), 2);
        assert_eq!(report.flagged[0].race, "OH-03");
        assert!(matches!(report.flagged[0].result, TallyResult::MinorDiscrepancy { .. }));
        assert!((report.flagged[0].result.difference() - 3.0).abs() < 1e-9);

        match &report.flagged[1].result {
            TallyResult::MajorDiscrepancy { missing_shares, .. } => {
                assert_eq!(missing_shares, &vec!["d".to_string()]);
            }
            other => panic!("expected major discrepancy, got {:?}", other),
        }
    }

    #[test]
    fn test_unreported_race_not_flagged() {
        let engine = VoteShareEngine::new();
        let report = engine.check(&[
            result("a", "WY-AL", None, None),
            result("b", "WY-AL", None, None),
        ]);

        assert_eq!(report.races_unreported, 1);
        assert!(report.flagged.is_empty());
    }

    #[test]
    fn test_two_winners_flagged() {
        let engine = VoteShareEngine::with_tolerance(0.5);
        let report = engine.check(&[
            result("a", "TX-07", Some(50.0), Some(true)),
            result("b", "TX-07", Some(50.0), Some(true)),
        ]);

        assert_eq!(report.races_balanced, 1);
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].winners, 2);
    }
}
