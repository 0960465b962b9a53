// 🗺️ Race Keys - normalized (office, state, district) identity
//
// Sources disagree on how a race is written down:
//   "OH-3", "OH-03", "Ohio" + "3", "AK-AL", "AK" + "1", "PA" + "" (Senate)
// Everything is normalized to a RaceKey before it becomes part of any join key.
//
// Canonical text form: "OH-03", "AK-AL", "PA-S3", "OK-S2".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ReasonCode;

// ============================================================================
// STATES
// ============================================================================

const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// States with a single House seat in the 2022 cycle
const AT_LARGE_STATES: &[&str] = &["AK", "DE", "ND", "SD", "VT", "WY"];

/// Two-letter postal code, always uppercase and always a known state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateCode(String);

impl StateCode {
    /// Accepts a postal code or a full state name, any case
    pub fn parse(input: &str) -> Option<StateCode> {
        let trimmed = input.trim();

        if trimmed.len() == 2 {
            let upper = trimmed.to_ascii_uppercase();
            return STATES
                .iter()
                .find(|(code, _)| *code == upper)
                .map(|(code, _)| StateCode(code.to_string()));
        }

        let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        STATES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(&collapsed))
            .map(|(code, _)| StateCode(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> &'static str {
        STATES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, name)| *name)
            .unwrap_or("")
    }

    pub fn has_single_district(&self) -> bool {
        AT_LARGE_STATES.contains(&self.0.as_str())
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// OFFICE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Office {
    House,
    Senate,
}

impl Office {
    pub fn as_str(&self) -> &'static str {
        match self {
            Office::House => "House",
            Office::Senate => "Senate",
        }
    }

    /// Office labels as the sources spell them.
    ///
    /// Returns None for offices outside the dataset (Governor, Attorney General...)
    pub fn from_label(label: &str) -> Option<Office> {
        let lower = label.trim().to_lowercase();
        let lower = lower.trim_start_matches("u.s.").trim_start_matches("us").trim();

        if lower.starts_with("senat") {
            Some(Office::Senate)
        } else if lower == "house"
            || lower == "rep"
            || lower.starts_with("representative")
            || lower.starts_with("house of representatives")
        {
            Some(Office::House)
        } else {
            None
        }
    }

    /// "Senator (unexpired term)" marks a special election
    pub fn is_special_label(label: &str) -> bool {
        label.to_lowercase().contains("unexpired")
    }
}

impl fmt::Display for Office {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Office {
    type Err = RaceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Office::from_label(s).ok_or_else(|| RaceKeyError::UnknownOffice(s.to_string()))
    }
}

// ============================================================================
// DISTRICT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum District {
    /// Numbered House seat
    Seat(u16),
    /// Only House seat of a single-district state
    AtLarge,
    /// Senate seat by class: 3 for the regular 2022 races, 2 for the Oklahoma special
    SenateClass(u8),
}

impl District {
    pub const REGULAR_SENATE: District = District::SenateClass(3);
    pub const SPECIAL_SENATE: District = District::SenateClass(2);

    pub fn office(&self) -> Office {
        match self {
            District::Seat(_) | District::AtLarge => Office::House,
            District::SenateClass(_) => Office::Senate,
        }
    }

    /// Stored form: "03", "AL", "S3"
    pub fn code(&self) -> String {
        match self {
            District::Seat(n) => format!("{:02}", n),
            District::AtLarge => "AL".to_string(),
            District::SenateClass(c) => format!("S{}", c),
        }
    }

    /// Normalize a raw district cell.
    ///
    /// `office` is a hint from the source (file or column); `None` means the
    /// source does not say, in which case an empty district means Senate.
    pub fn normalize(
        raw: Option<&str>,
        state: &StateCode,
        office: Option<Office>,
    ) -> Result<District, RaceKeyError> {
        let value = raw.map(str::trim).unwrap_or("");
        let lower = value.to_lowercase();

        if lower.ends_with("at-large") || lower.ends_with("at large") {
            return Ok(District::AtLarge);
        }

        // "OH-3" / "OH-House-3" style cells carry the state in front
        let lower = match lower.rfind('-') {
            Some(pos) => lower[pos + 1..].to_string(),
            None => lower,
        };

        if lower.is_empty() || lower == "nan" || lower == "statewide" {
            return match office {
                Some(Office::House) if state.has_single_district() => Ok(District::AtLarge),
                Some(Office::House) => Err(RaceKeyError::UnknownDistrict(format!(
                    "{} House race without district",
                    state
                ))),
                _ => Ok(District::REGULAR_SENATE),
            };
        }

        if lower == "al" {
            return Ok(District::AtLarge);
        }

        if let Some(class) = lower.strip_prefix('s') {
            return match class.parse::<u8>() {
                Ok(c @ 1..=3) => Ok(District::SenateClass(c)),
                _ => Err(RaceKeyError::UnknownDistrict(value.to_string())),
            };
        }

        let number: u16 = lower
            .parse()
            .map_err(|_| RaceKeyError::UnknownDistrict(value.to_string()))?;

        if office == Some(Office::Senate) {
            return Err(RaceKeyError::UnknownDistrict(format!(
                "Senate race with numbered district {}",
                value
            )));
        }

        if number == 0 || (number == 1 && state.has_single_district()) {
            Ok(District::AtLarge)
        } else {
            Ok(District::Seat(number))
        }
    }
}

impl fmt::Display for District {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

// ============================================================================
// RACE KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceKeyError {
    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("unknown district '{0}'")]
    UnknownDistrict(String),

    #[error("unknown office '{0}'")]
    UnknownOffice(String),
}

impl RaceKeyError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            RaceKeyError::UnknownState(_) => ReasonCode::UnknownState,
            RaceKeyError::UnknownDistrict(_) | RaceKeyError::UnknownOffice(_) => {
                ReasonCode::UnknownDistrict
            }
        }
    }
}

/// A contest: office is implied by the district variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RaceKey {
    pub state: StateCode,
    pub district: District,
}

impl RaceKey {
    pub fn new(state: StateCode, district: District) -> Self {
        RaceKey { state, district }
    }

    /// Build a key from separate state/district cells
    pub fn normalize(
        state: &str,
        district: Option<&str>,
        office: Option<Office>,
    ) -> Result<RaceKey, RaceKeyError> {
        let state =
            StateCode::parse(state).ok_or_else(|| RaceKeyError::UnknownState(state.to_string()))?;
        let district = District::normalize(district, &state, office)?;
        Ok(RaceKey { state, district })
    }

    /// Build a key for a row that names its office.
    ///
    /// "Senator (unexpired term)" puts the row in the class 2 special race
    /// whatever its district cell says.
    pub fn normalize_with_label(
        state: &str,
        district: Option<&str>,
        office_label: &str,
    ) -> Result<RaceKey, RaceKeyError> {
        let office: Office = office_label.parse()?;
        let mut race = RaceKey::normalize(state, district, Some(office))?;
        if office == Office::Senate && Office::is_special_label(office_label) {
            race.district = District::SPECIAL_SENATE;
        }
        Ok(race)
    }

    pub fn office(&self) -> Office {
        self.district.office()
    }

    /// Lowercase suffix used in synthetic candidate keys: "oh03", "nv_s3"
    pub fn slug(&self) -> String {
        match self.district {
            District::Seat(_) => format!("{}{}", self.state.as_str(), self.district.code()),
            _ => format!("{}_{}", self.state.as_str(), self.district.code()),
        }
        .to_lowercase()
    }
}

impl fmt::Display for RaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.state, self.district)
    }
}

impl FromStr for RaceKey {
    type Err = RaceKeyError;

    /// "OH-03", "oh-3", "Ohio-3", "AK-AL", "PA-S3", or a bare state for Senate
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.split_once('-') {
            Some((state, district)) => {
                let state_code = StateCode::parse(state)
                    .ok_or_else(|| RaceKeyError::UnknownState(state.to_string()))?;
                let district = District::normalize(Some(district), &state_code, None)?;
                Ok(RaceKey::new(state_code, district))
            }
            None => RaceKey::normalize(trimmed, None, Some(Office::Senate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(code: &str) -> StateCode {
        StateCode::parse(code).unwrap()
    }

    #[test]
    fn test_state_code_from_name_and_abbreviation() {
        assert_eq!(state("oh").as_str(), "OH");
        assert_eq!(StateCode::parse("Ohio").unwrap().as_str(), "OH");
        assert_eq!(StateCode::parse("  new   york ").unwrap().as_str(), "NY");
        assert_eq!(state("NY").name(), "New York");
        assert!(StateCode::parse("XX").is_none());
        assert!(StateCode::parse("Atlantis").is_none());
    }

    #[test]
    fn test_district_forms_collapse() {
        let oh = state("OH");
        let three = District::normalize(Some("3"), &oh, Some(Office::House)).unwrap();
        let padded = District::normalize(Some("03"), &oh, Some(Office::House)).unwrap();
        let prefixed = District::normalize(Some("OH-3"), &oh, None).unwrap();

        assert_eq!(three, District::Seat(3));
        assert_eq!(three, padded);
        assert_eq!(three, prefixed);
        assert_eq!(three.code(), "03");
    }

    #[test]
    fn test_at_large_sentinel() {
        let ak = state("AK");
        for raw in ["AL", "at-large", "At Large", "0", "00", "1"] {
            assert_eq!(
                District::normalize(Some(raw), &ak, Some(Office::House)).unwrap(),
                District::AtLarge,
                "raw district {:?}",
                raw
            );
        }
        assert_eq!(
            District::normalize(None, &ak, Some(Office::House)).unwrap(),
            District::AtLarge
        );

        // District 1 is a real seat in multi-district states
        assert_eq!(
            District::normalize(Some("1"), &state("OH"), Some(Office::House)).unwrap(),
            District::Seat(1)
        );
    }

    #[test]
    fn test_senate_districts() {
        let ok = state("OK");
        assert_eq!(District::normalize(None, &ok, None).unwrap(), District::REGULAR_SENATE);
        assert_eq!(
            District::normalize(Some(""), &ok, Some(Office::Senate)).unwrap(),
            District::REGULAR_SENATE
        );
        assert_eq!(District::normalize(Some("S2"), &ok, None).unwrap(), District::SPECIAL_SENATE);
        assert!(District::normalize(Some("4"), &ok, Some(Office::Senate)).is_err());
        assert!(District::normalize(None, &state("OH"), Some(Office::House)).is_err());
    }

    #[test]
    fn test_unexpired_term_label_is_special_senate() {
        let special =
            RaceKey::normalize_with_label("OK", None, "Senator (unexpired term)").unwrap();
        assert_eq!(special.to_string(), "OK-S2");
        assert_eq!(
            RaceKey::normalize_with_label("Oklahoma", Some(""), "U.S. Senate (Unexpired Term)")
                .unwrap(),
            special
        );

        let regular = RaceKey::normalize_with_label("OK", None, "Senator").unwrap();
        assert_eq!(regular.to_string(), "OK-S3");

        let house = RaceKey::normalize_with_label("OH", Some("3"), "Representative").unwrap();
        assert_eq!(house.to_string(), "OH-03");

        assert!(matches!(
            RaceKey::normalize_with_label("OK", None, "Governor"),
            Err(RaceKeyError::UnknownOffice(_))
        ));
    }

    #[test]
    fn test_race_key_round_trip_forms() {
        let key: RaceKey = "OH-03".parse().unwrap();
        assert_eq!(key.to_string(), "OH-03");
        assert_eq!(key.office(), Office::House);
        assert_eq!(key, "Ohio-3".parse().unwrap());
        assert_eq!(key.slug(), "oh03");

        let senate: RaceKey = "PA".parse().unwrap();
        assert_eq!(senate.to_string(), "PA-S3");
        assert_eq!(senate.office(), Office::Senate);
        assert_eq!(senate.slug(), "pa_s3");

        let wy: RaceKey = "WY-AL".parse().unwrap();
        assert_eq!(wy.office(), Office::House);
        assert_eq!(wy.to_string(), "WY-AL");
    }

    #[test]
    fn test_office_labels() {
        assert_eq!(Office::from_label("Representative"), Some(Office::House));
        assert_eq!(Office::from_label("Senator"), Some(Office::Senate));
        assert_eq!(Office::from_label("Senator (unexpired term)"), Some(Office::Senate));
        assert_eq!(Office::from_label("U.S. House"), Some(Office::House));
        assert_eq!(Office::from_label("Governor"), None);
        assert!(Office::is_special_label("Senator (unexpired term)"));
        assert!(!Office::is_special_label("Senator"));
    }
}
