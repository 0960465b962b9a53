// Entity Models
// Following the same rule as every registry here: "Identity persists, values change"
//
// - Candidate: canonical key (identity) vs. per-source spellings (values)
// - Race: normalized (office, state, district)
// - Stance: folded survey categories

pub mod candidate;
pub mod race;
pub mod stance;

pub use candidate::{normalize_party, Candidate, CandidateRegistry};
pub use race::{District, Office, RaceKey, RaceKeyError, StateCode};
pub use stance::Stance;
