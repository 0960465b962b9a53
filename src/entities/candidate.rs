// 🧑 Candidate Entity - one canonical identity per real person
//
// "The raw name is a VALUE (each source spells it differently),
//  the canonical key is IDENTITY (never changes)."
//
// Problem solved:
// - "Smith, John", "John Smith", "J. Smith" → one candidate smith_john_oh03
// - The candidate's race is fixed at first sighting; later sightings in a
//   different race are refused instead of merging two people.

use std::collections::BTreeMap;

use super::race::{Office, RaceKey};
use crate::error::ReconciliationError;

// ============================================================================
// CANDIDATE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Canonical key from the mapping table (IDENTITY)
    pub key: String,

    /// Display name, from the mapping table or the first sighting
    pub name: String,

    /// "Dem", "Rep", or the source's own label
    pub party: Option<String>,

    pub race: RaceKey,
}

impl Candidate {
    pub fn new(key: &str, name: &str, race: RaceKey) -> Self {
        Candidate {
            key: key.to_string(),
            name: name.trim().to_string(),
            party: None,
            race,
        }
    }

    pub fn with_party(mut self, party: Option<&str>) -> Self {
        self.party = party.and_then(normalize_party);
        self
    }

    pub fn office(&self) -> Office {
        self.race.office()
    }
}

/// Fold party spellings: "Democratic" / "D" → "Dem", "Republican" / "GOP" → "Rep"
pub fn normalize_party(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let party = match trimmed.to_lowercase().as_str() {
        "d" | "dem" | "dem." | "democrat" | "democratic" => "Dem".to_string(),
        "r" | "rep" | "rep." | "gop" | "republican" => "Rep".to_string(),
        "i" | "ind" | "independent" => "Ind".to_string(),
        _ => trimmed.to_string(),
    };
    Some(party)
}

// ============================================================================
// CANDIDATE REGISTRY
// ============================================================================

/// Candidates derived from the union of every resolved source row.
///
/// Keyed and iterated in canonical-key order so inserts are deterministic.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    candidates: BTreeMap<String, Candidate>,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of `key` in `race`.
    ///
    /// First sighting creates the candidate. Later sightings must agree on the
    /// race; a missing party is filled in from a later sighting.
    pub fn observe(
        &mut self,
        key: &str,
        name: &str,
        party: Option<&str>,
        race: &RaceKey,
    ) -> Result<&Candidate, ReconciliationError> {
        if let Some(existing) = self.candidates.get(key) {
            if &existing.race != race {
                return Err(ReconciliationError::RaceMismatch {
                    candidate_key: key.to_string(),
                    expected: existing.race.clone(),
                    found: race.clone(),
                });
            }
        }

        let candidate = self
            .candidates
            .entry(key.to_string())
            .or_insert_with(|| Candidate::new(key, name, race.clone()));

        if candidate.party.is_none() {
            candidate.party = party.and_then(normalize_party);
        }

        Ok(candidate)
    }

    pub fn get(&self, key: &str) -> Option<&Candidate> {
        self.candidates.get(key)
    }

    /// All candidates in canonical-key order
    pub fn all(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    pub fn count(&self) -> usize {
        self.candidates.len()
    }

    pub fn by_office(&self, office: Office) -> Vec<&Candidate> {
        self.all().filter(|c| c.office() == office).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(s: &str) -> RaceKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_sighting_creates_candidate() {
        let mut registry = CandidateRegistry::new();

        registry
            .observe("smith_john_oh03", "John Smith", Some("Republican"), &race("OH-03"))
            .unwrap();
        registry
            .observe("smith_john_oh03", "Smith, John", None, &race("OH-03"))
            .unwrap();

        assert_eq!(registry.count(), 1);
        let candidate = registry.get("smith_john_oh03").unwrap();
        assert_eq!(candidate.name, "John Smith");
        assert_eq!(candidate.party.as_deref(), Some("Rep"));
        assert_eq!(candidate.office(), Office::House);
    }

    #[test]
    fn test_party_filled_from_later_sighting() {
        let mut registry = CandidateRegistry::new();

        registry.observe("doe_jane_pa_s3", "Jane Doe", None, &race("PA-S3")).unwrap();
        registry
            .observe("doe_jane_pa_s3", "Jane Doe", Some("Democratic"), &race("PA-S3"))
            .unwrap();

        assert_eq!(registry.get("doe_jane_pa_s3").unwrap().party.as_deref(), Some("Dem"));
    }

    #[test]
    fn test_race_mismatch_is_refused() {
        let mut registry = CandidateRegistry::new();

        registry.observe("lee_pat", "Pat Lee", None, &race("TX-07")).unwrap();
        let err = registry.observe("lee_pat", "Pat Lee", None, &race("TX-08")).unwrap_err();

        assert!(matches!(err, ReconciliationError::RaceMismatch { .. }));
        assert_eq!(registry.get("lee_pat").unwrap().race, race("TX-07"));
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let mut registry = CandidateRegistry::new();
        registry.observe("zed", "Zed", None, &race("OH-01")).unwrap();
        registry.observe("abe", "Abe", None, &race("PA")).unwrap();

        let keys: Vec<&str> = registry.all().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["abe", "zed"]);
        assert_eq!(registry.by_office(Office::Senate).len(), 1);
    }

    #[test]
    fn test_normalize_party() {
        assert_eq!(normalize_party("GOP").as_deref(), Some("Rep"));
        assert_eq!(normalize_party(" d ").as_deref(), Some("Dem"));
        assert_eq!(normalize_party("Libertarian").as_deref(), Some("Libertarian"));
        assert_eq!(normalize_party("  "), None);
    }
}
