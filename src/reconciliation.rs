// 🔗 Name Reconciliation Map - one canonical key per real candidate
//
// Each source spells names its own way:
//   nbc:      "Smith, John" / "John Smith Jr."
//   538:      "John Smith"
//   deniers:  "J. Smith"
// The curated mapping table ties every (source, spelling, race) to one
// canonical key. Built once from the CSV, then a pure lookup.
//
// Contract:
//   resolve(source, raw_name, race) -> canonical key | ReconciliationError
//
// A spelling that maps to two different keys in the same race is ambiguous:
// it is logged when the map is built and every lookup of it fails.

use log::{info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::entities::{normalize_party, Office, RaceKey};
use crate::error::{PipelineError, ReconciliationError};
use crate::parser::SourceTag;

/// Ballot lines that are not people, with the slug of their per-race key.
/// Spellings of the same line share a slug.
const AGGREGATE_LINES: &[(&str, &str)] = &[
    ("write-ins", "write_ins"),
    ("write-in", "write_ins"),
    ("write ins", "write_ins"),
    ("write in", "write_ins"),
    ("writeins", "write_ins"),
    ("none of these candidates", "none_of_these_candidates"),
    ("all others", "all_others"),
    ("others", "all_others"),
];

/// Case-fold and collapse whitespace: "  John   SMITH " → "john smith"
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// MAPPING ROWS
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MappingCsv {
    #[serde(alias = "source_tag")]
    source: Option<String>,
    #[serde(alias = "name", alias = "raw")]
    raw_name: Option<String>,
    #[serde(alias = "candidate_key", alias = "key")]
    canonical_key: Option<String>,
    #[serde(alias = "state_code", alias = "normalized_state")]
    state: Option<String>,
    #[serde(alias = "normalized_district")]
    district: Option<String>,
    office: Option<String>,
    canonical_name: Option<String>,
    party: Option<String>,
}

/// What the mapping table says about one canonical candidate
#[derive(Debug, Clone, PartialEq)]
pub struct MappedIdentity {
    pub race: RaceKey,
    pub canonical_name: Option<String>,
    pub party: Option<String>,
}

// ============================================================================
// NAME MAP
// ============================================================================

#[derive(Debug, Default)]
pub struct NameMap {
    /// (source, normalized spelling, race) → canonical keys (more than one = ambiguous)
    entries: HashMap<(SourceTag, String, RaceKey), BTreeSet<String>>,

    identities: BTreeMap<String, MappedIdentity>,
}

impl NameMap {
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)?;
        let map = Self::from_reader(file, &path.display().to_string())?;
        info!(
            "Name map: {} spellings for {} candidates from {}",
            map.entries.len(),
            map.identities.len(),
            path.display()
        );
        Ok(map)
    }

    /// Build from the curated mapping CSV.
    ///
    /// The table is hand-maintained, so any malformed row is fatal: a
    /// half-loaded map would silently reject good source rows.
    pub fn from_reader<R: Read>(reader: R, source_file: &str) -> Result<Self, PipelineError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: csv::StringRecord = rdr
            .headers()
            .map_err(|source| PipelineError::Input {
                path: source_file.to_string(),
                source,
            })?
            .iter()
            .map(|h| h.to_lowercase().replace(' ', "_"))
            .collect();

        let mut map = NameMap::default();

        for (index, result) in rdr.records().enumerate() {
            let record = result.map_err(|source| PipelineError::Input {
                path: source_file.to_string(),
                source,
            })?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(index + 2);

            if record.iter().all(|field| field.is_empty()) {
                continue;
            }

            let row: MappingCsv = record
                .deserialize(Some(&headers))
                .map_err(|e| table_error(source_file, line, &e.to_string()))?;

            map.add_row(row)
                .map_err(|msg| table_error(source_file, line, &msg))?;
        }

        let ambiguous = map.ambiguous_spellings();
        for (tag, name, race, keys) in &ambiguous {
            warn!(
                "Ambiguous mapping: {} name '{}' in {} → {}",
                tag,
                name,
                race,
                keys.join(", ")
            );
        }

        Ok(map)
    }

    fn add_row(&mut self, row: MappingCsv) -> Result<(), String> {
        let field = |value: Option<String>, name: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("missing '{}'", name))
        };

        let source = field(row.source, "source")?;
        let tag = SourceTag::from_label(&source)
            .ok_or_else(|| format!("unknown source tag '{}'", source))?;
        let raw_name = field(row.raw_name, "raw_name")?;
        let key = field(row.canonical_key, "canonical_key")?;
        let state = field(row.state, "state")?;

        let office_label = row.office.as_deref().map(str::trim).filter(|o| !o.is_empty());
        let race = match office_label {
            Some(label) => RaceKey::normalize_with_label(&state, row.district.as_deref(), label),
            None => RaceKey::normalize(&state, row.district.as_deref(), None),
        }
        .map_err(|e| format!("{} for '{}'", e, key))?;

        if let Some(office) = office_label.and_then(Office::from_label) {
            if race.office() != office {
                return Err(format!("{} is not a {} race ('{}')", race, office, key));
            }
        }

        let canonical_name = row
            .canonical_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let party = row.party.as_deref().and_then(normalize_party);

        self.register_identity(&key, race.clone(), canonical_name, party)?;

        self.entries
            .entry((tag, normalize_name(&raw_name), race))
            .or_default()
            .insert(key);

        Ok(())
    }

    /// One canonical key = one race. Two races under one key would merge two people.
    fn register_identity(
        &mut self,
        key: &str,
        race: RaceKey,
        canonical_name: Option<String>,
        party: Option<String>,
    ) -> Result<(), String> {
        match self.identities.get_mut(key) {
            Some(existing) => {
                if existing.race != race {
                    return Err(format!(
                        "canonical key '{}' mapped to both {} and {}",
                        key, existing.race, race
                    ));
                }
                if existing.canonical_name.is_none() {
                    existing.canonical_name = canonical_name;
                }
                if existing.party.is_none() {
                    existing.party = party;
                }
            }
            None => {
                self.identities.insert(
                    key.to_string(),
                    MappedIdentity {
                        race,
                        canonical_name,
                        party,
                    },
                );
            }
        }
        Ok(())
    }

    /// Resolve a source spelling to its canonical key
    pub fn resolve(
        &self,
        tag: SourceTag,
        raw_name: &str,
        race: &RaceKey,
    ) -> Result<String, ReconciliationError> {
        let name = normalize_name(raw_name);

        if let Some(keys) = self.entries.get(&(tag, name.clone(), race.clone())) {
            return match keys.len() {
                1 => Ok(keys.iter().next().cloned().unwrap_or_default()),
                _ => Err(ReconciliationError::Ambiguous {
                    source_tag: tag.to_string(),
                    raw_name: raw_name.to_string(),
                    race: race.clone(),
                    candidates: keys.iter().cloned().collect(),
                }),
            };
        }

        if let Some(key) = aggregate_key(&name, race) {
            return Ok(key);
        }

        Err(ReconciliationError::NoMatch {
            source_tag: tag.to_string(),
            raw_name: raw_name.to_string(),
            race: race.clone(),
        })
    }

    pub fn identity(&self, key: &str) -> Option<&MappedIdentity> {
        self.identities.get(key)
    }

    pub fn candidate_count(&self) -> usize {
        self.identities.len()
    }

    pub fn spelling_count(&self) -> usize {
        self.entries.len()
    }

    /// Spellings mapped to more than one key, sorted for stable output
    pub fn ambiguous_spellings(&self) -> Vec<(SourceTag, String, RaceKey, Vec<String>)> {
        let mut ambiguous: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, keys)| keys.len() > 1)
            .map(|((tag, name, race), keys)| {
                (*tag, name.clone(), race.clone(), keys.iter().cloned().collect())
            })
            .collect();
        ambiguous.sort();
        ambiguous
    }
}

/// "Write-ins" in NV-S3 → "write_ins_nv_s3"
pub fn aggregate_key(normalized_name: &str, race: &RaceKey) -> Option<String> {
    AGGREGATE_LINES
        .iter()
        .find(|(line, _)| *line == normalized_name)
        .map(|(_, slug)| format!("{}_{}", slug, race.slug()))
}

fn table_error(source_file: &str, line: usize, message: &str) -> PipelineError {
    PipelineError::MappingTable(format!("{}:{}: {}", source_file, line, message))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPINGS: &str = "\
source,raw_name,canonical_key,state,district,canonical_name,party
nbc,John Smith,smith_john_oh03,OH,3,John Smith,Rep
538,John Smith,smith_john_oh03,OH,03,,
deniers,J. Smith,smith_john_oh03,Ohio,OH-3,,
nbc,Jane Doe,doe_jane_pa,PA,,Jane Doe,Dem
538,Jane Doe,doe_jane_pa,PA,S3,,
";

    fn race(s: &str) -> RaceKey {
        s.parse().unwrap()
    }

    fn build(csv: &str) -> Result<NameMap, PipelineError> {
        NameMap::from_reader(csv.as_bytes(), "name_mappings.csv")
    }

    #[test]
    fn test_variants_resolve_to_one_key() {
        let map = build(MAPPINGS).unwrap();

        assert_eq!(
            map.resolve(SourceTag::Results, "John Smith", &race("OH-03")).unwrap(),
            "smith_john_oh03"
        );
        assert_eq!(
            map.resolve(SourceTag::Stances, "j.  SMITH", &race("OH-3")).unwrap(),
            "smith_john_oh03"
        );
        assert_eq!(
            map.resolve(SourceTag::Forecasts, "Jane Doe", &race("PA")).unwrap(),
            "doe_jane_pa"
        );
        assert_eq!(map.candidate_count(), 2);

        let identity = map.identity("smith_john_oh03").unwrap();
        assert_eq!(identity.canonical_name.as_deref(), Some("John Smith"));
        assert_eq!(identity.party.as_deref(), Some("Rep"));
    }

    #[test]
    fn test_unmapped_spelling_is_no_match() {
        let map = build(MAPPINGS).unwrap();

        let err = map
            .resolve(SourceTag::Results, "J. Smith", &race("OH-03"))
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::NoMatch { .. }));

        // Same spelling, different race: still no match
        let err = map
            .resolve(SourceTag::Results, "John Smith", &race("OH-04"))
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::NoMatch { .. }));
    }

    #[test]
    fn test_ambiguous_spelling_fails_every_lookup() {
        let csv = "\
source,raw_name,canonical_key,state,district
538,Pat Lee,lee_pat_tx07,TX,7
538,Pat Lee,lee_patricia_tx07,TX,7
";
        let map = build(csv).unwrap();

        assert_eq!(map.ambiguous_spellings().len(), 1);
        let err = map.resolve(SourceTag::Forecasts, "Pat Lee", &race("TX-07")).unwrap_err();
        match err {
            ReconciliationError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates, vec!["lee_pat_tx07", "lee_patricia_tx07"]);
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_mapping_row_is_not_ambiguous() {
        let csv = "\
source,raw_name,canonical_key,state,district
nbc,Ann Poe,poe_ann_oh03,OH,3
nbc,ANN POE,poe_ann_oh03,OH,3
";
        let map = build(csv).unwrap();
        assert!(map.ambiguous_spellings().is_empty());
        assert_eq!(map.spelling_count(), 1);
    }

    #[test]
    fn test_one_key_two_races_is_fatal() {
        let csv = "\
source,raw_name,canonical_key,state,district
nbc,Pat Lee,lee_pat,TX,7
538,Pat Lee,lee_pat,TX,8
";
        let err = build(csv).unwrap_err();
        assert!(matches!(err, PipelineError::MappingTable(_)));
        assert!(err.to_string().contains("name_mappings.csv:3"));
    }

    #[test]
    fn test_malformed_mapping_rows_are_fatal() {
        assert!(build("source,raw_name,canonical_key,state,district\nap,X,x,OH,3\n").is_err());
        assert!(build("source,raw_name,canonical_key,state,district\nnbc,X,,OH,3\n").is_err());
        assert!(
            build("source,raw_name,canonical_key,state,district\nnbc,X,x,Atlantis,3\n").is_err()
        );
        assert!(build(
            "source,raw_name,canonical_key,state,district,office\nnbc,X,x,OH,3,Senate\n"
        )
        .is_err());
    }

    #[test]
    fn test_aggregate_lines_get_synthetic_keys() {
        let map = build(MAPPINGS).unwrap();

        assert_eq!(
            map.resolve(SourceTag::Results, "Write-ins", &race("NV")).unwrap(),
            "write_ins_nv_s3"
        );
        assert_eq!(
            map.resolve(SourceTag::Results, "None of these candidates", &race("NV-S3"))
                .unwrap(),
            "none_of_these_candidates_nv_s3"
        );
        assert_eq!(
            map.resolve(SourceTag::Forecasts, "All others", &race("OH-03")).unwrap(),
            "all_others_oh03"
        );
    }

    #[test]
    fn test_write_in_spellings_share_one_key() {
        let map = build(MAPPINGS).unwrap();
        let nv = race("NV");

        let keys: BTreeSet<String> = ["Write-ins", "write-in", "Write Ins", "WRITE IN"]
            .iter()
            .map(|name| map.resolve(SourceTag::Results, name, &nv).unwrap())
            .collect();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("write_ins_nv_s3"));

        assert_eq!(
            map.resolve(SourceTag::Results, "Others", &nv).unwrap(),
            map.resolve(SourceTag::Results, "All others", &nv).unwrap()
        );
    }

    #[test]
    fn test_unexpired_term_mapping_matches_special_race() {
        let csv = "\
source,raw_name,canonical_key,state,district,office
deniers,Markwayne Mullin,mullin_markwayne_ok,OK,,Senator (unexpired term)
nbc,Markwayne Mullin,mullin_markwayne_ok,OK,,Senator (unexpired term)
deniers,James Lankford,lankford_james_ok,OK,,Senator
";
        let map = build(csv).unwrap();

        assert_eq!(
            map.identity("mullin_markwayne_ok").unwrap().race.to_string(),
            "OK-S2"
        );
        assert_eq!(
            map.resolve(SourceTag::Stances, "Markwayne Mullin", &race("OK-S2")).unwrap(),
            "mullin_markwayne_ok"
        );
        assert!(map
            .resolve(SourceTag::Stances, "Markwayne Mullin", &race("OK-S3"))
            .is_err());
        assert_eq!(
            map.resolve(SourceTag::Stances, "James Lankford", &race("OK")).unwrap(),
            "lankford_james_ok"
        );
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  John   SMITH "), "john smith");
        assert_eq!(normalize_name("J. Smith"), "j. smith");
    }
}
