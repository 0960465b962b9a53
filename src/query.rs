// 📊 Query / Aggregation Layer
//
// Read-only views over the integrated store. Every query checks the schema
// first and never writes; open the store with `db::open_read_only`.

use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::race_from_columns;
use crate::entities::{Office, RaceKey, Stance};
use crate::error::PipelineError;
use crate::schema;

#[derive(Debug, Error)]
#[error("unexpected {column} value '{value}'")]
struct ColumnValueError {
    column: &'static str,
    value: String,
}

fn office_at(row: &Row, idx: usize) -> rusqlite::Result<Office> {
    let text: String = row.get(idx)?;
    text.parse::<Office>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn stance_at(row: &Row, idx: usize) -> rusqlite::Result<Stance> {
    let text: String = row.get(idx)?;
    Stance::from_label(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(ColumnValueError {
                column: "stance",
                value: text,
            }),
        )
    })
}

fn race_at(row: &Row, idx: usize) -> rusqlite::Result<RaceKey> {
    let office: String = row.get(idx)?;
    let state: String = row.get(idx + 1)?;
    let district: String = row.get(idx + 2)?;
    race_from_columns(&office, &state, &district)
}

// ============================================================================
// CANDIDATE COUNTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StanceCount {
    pub office: Office,
    pub stance: Stance,
    pub candidates: i64,
}

/// Candidates per (office, stance)
pub fn candidate_counts(
    conn: &Connection,
    office: Option<Office>,
) -> Result<Vec<StanceCount>, PipelineError> {
    schema::verify(conn)?;

    let mut stmt = conn.prepare(
        "SELECT c.office, s.stance, COUNT(*)
         FROM candidates c
         JOIN stances s ON s.candidate_key = c.candidate_key
         WHERE ?1 IS NULL OR c.office = ?1
         GROUP BY c.office, s.stance",
    )?;

    let mut counts = stmt
        .query_map(params![office.map(|o| o.as_str())], |row| {
            Ok(StanceCount {
                office: office_at(row, 0)?,
                stance: stance_at(row, 1)?,
                candidates: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    counts.sort_by_key(|c| (c.office, c.stance));
    Ok(counts)
}

// ============================================================================
// WIN RATES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WinRateFilter {
    pub office: Option<Office>,
    pub incumbent: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinRate {
    pub office: Office,
    pub stance: Stance,
    pub incumbent: bool,
    pub candidates: i64,
    pub winners: i64,
    /// winners / candidates
    pub win_rate: f64,
}

/// Win rate per (office, stance, incumbency).
///
/// Only candidates with a stance, a forecast (for incumbency) and a decided
/// result are counted.
pub fn win_rates(conn: &Connection, filter: &WinRateFilter) -> Result<Vec<WinRate>, PipelineError> {
    schema::verify(conn)?;

    let mut stmt = conn.prepare(
        "SELECT c.office, s.stance, f.is_incumbent,
                COUNT(*),
                SUM(CASE WHEN r.is_winner = 1 THEN 1 ELSE 0 END)
         FROM candidates c
         JOIN stances s ON s.candidate_key = c.candidate_key
         JOIN forecasts f ON f.candidate_key = c.candidate_key
         JOIN results r ON r.candidate_key = c.candidate_key
         WHERE r.is_winner IS NOT NULL
           AND (?1 IS NULL OR c.office = ?1)
           AND (?2 IS NULL OR f.is_incumbent = ?2)
         GROUP BY c.office, s.stance, f.is_incumbent",
    )?;

    let mut rates = stmt
        .query_map(
            params![filter.office.map(|o| o.as_str()), filter.incumbent],
            |row| {
                let candidates: i64 = row.get(3)?;
                let winners: i64 = row.get(4)?;
                Ok(WinRate {
                    office: office_at(row, 0)?,
                    stance: stance_at(row, 1)?,
                    incumbent: row.get(2)?,
                    candidates,
                    winners,
                    win_rate: if candidates > 0 {
                        winners as f64 / candidates as f64
                    } else {
                        0.0
                    },
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    rates.sort_by_key(|r| (r.office, r.stance, r.incumbent));
    Ok(rates)
}

// ============================================================================
// AVERAGE FORECASTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastAverage {
    pub office: Office,
    pub stance: Stance,
    pub candidates: i64,
    pub mean_win_probability: f64,
}

/// Mean forecast win probability per (office, stance)
pub fn average_forecasts(
    conn: &Connection,
    office: Option<Office>,
) -> Result<Vec<ForecastAverage>, PipelineError> {
    schema::verify(conn)?;

    let mut stmt = conn.prepare(
        "SELECT c.office, s.stance, COUNT(*), AVG(f.win_probability)
         FROM candidates c
         JOIN stances s ON s.candidate_key = c.candidate_key
         JOIN forecasts f ON f.candidate_key = c.candidate_key
         WHERE ?1 IS NULL OR c.office = ?1
         GROUP BY c.office, s.stance",
    )?;

    let mut averages = stmt
        .query_map(params![office.map(|o| o.as_str())], |row| {
            Ok(ForecastAverage {
                office: office_at(row, 0)?,
                stance: stance_at(row, 1)?,
                candidates: row.get(2)?,
                mean_win_probability: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    averages.sort_by_key(|a| (a.office, a.stance));
    Ok(averages)
}

// ============================================================================
// CANDIDATE OUTCOMES (joined view)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub candidate_key: String,
    pub name: String,
    pub party: Option<String>,
    pub race: String,
    pub stance: Option<Stance>,
    pub win_probability: Option<f64>,
    pub is_incumbent: Option<bool>,
    pub vote_share: Option<f64>,
    pub is_winner: Option<bool>,
}

/// One row per candidate with whatever each source knows about them
pub fn candidate_outcomes(conn: &Connection) -> Result<Vec<CandidateOutcome>, PipelineError> {
    schema::verify(conn)?;

    let mut stmt = conn.prepare(
        "SELECT c.candidate_key, c.name, c.party, c.office, c.state_code, c.district,
                s.stance, f.win_probability, f.is_incumbent, r.vote_share, r.is_winner
         FROM candidates c
         LEFT JOIN stances s ON s.candidate_key = c.candidate_key
         LEFT JOIN forecasts f ON f.candidate_key = c.candidate_key
         LEFT JOIN results r ON r.candidate_key = c.candidate_key
         ORDER BY c.candidate_key",
    )?;

    let outcomes = stmt
        .query_map([], |row| {
            let stance = match row.get::<_, Option<String>>(6)? {
                Some(_) => Some(stance_at(row, 6)?),
                None => None,
            };

            Ok(CandidateOutcome {
                candidate_key: row.get(0)?,
                name: row.get(1)?,
                party: row.get(2)?,
                race: race_at(row, 3)?.to_string(),
                stance,
                win_probability: row.get(7)?,
                is_incumbent: row.get(8)?,
                vote_share: row.get(9)?,
                is_winner: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(outcomes)
}

// ============================================================================
// RACE RATINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    SolidR,
    LikelyR,
    LeanR,
    TossUp,
    LeanD,
    LikelyD,
    SolidD,
}

impl Rating {
    /// Republican thresholds are checked before Democratic ones
    pub fn from_probabilities(dem: f64, rep: f64) -> Rating {
        if rep >= 0.95 {
            Rating::SolidR
        } else if rep >= 0.75 {
            Rating::LikelyR
        } else if rep >= 0.60 {
            Rating::LeanR
        } else if dem >= 0.95 {
            Rating::SolidD
        } else if dem >= 0.75 {
            Rating::LikelyD
        } else if dem >= 0.60 {
            Rating::LeanD
        } else {
            Rating::TossUp
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Rating::SolidR => "Solid-R",
            Rating::LikelyR => "Likely-R",
            Rating::LeanR => "Lean-R",
            Rating::TossUp => "Toss-Up",
            Rating::LeanD => "Lean-D",
            Rating::LikelyD => "Likely-D",
            Rating::SolidD => "Solid-D",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRating {
    pub race: String,
    pub office: Office,
    pub dem_probability: f64,
    pub rep_probability: f64,
    pub rating: Rating,
}

/// Forecast rating per race from summed party win probabilities
pub fn race_ratings(conn: &Connection) -> Result<Vec<RaceRating>, PipelineError> {
    schema::verify(conn)?;

    let mut stmt = conn.prepare(
        "SELECT c.office, c.state_code, c.district,
                SUM(CASE WHEN c.party = 'Dem' THEN f.win_probability ELSE 0.0 END),
                SUM(CASE WHEN c.party = 'Rep' THEN f.win_probability ELSE 0.0 END)
         FROM forecasts f
         JOIN candidates c ON c.candidate_key = f.candidate_key
         GROUP BY c.office, c.state_code, c.district",
    )?;

    let mut ratings: Vec<(RaceKey, RaceRating)> = stmt
        .query_map([], |row| {
            let race = race_at(row, 0)?;
            let dem: f64 = row.get(3)?;
            let rep: f64 = row.get(4)?;
            Ok((
                race.clone(),
                RaceRating {
                    race: race.to_string(),
                    office: race.office(),
                    dem_probability: dem,
                    rep_probability: rep,
                    rating: Rating::from_probabilities(dem, rep),
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    ratings.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ratings.into_iter().map(|(_, r)| r).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::db;
    use crate::parser::{ForecastLoader, Loaded, ResultsLoader, SourceLoader, StanceLoader};
    use crate::pipeline::{IntegrationPipeline, SourceRows};
    use crate::reconciliation::NameMap;

    const MAPPINGS: &str = "\
source,raw_name,canonical_key,state,district,canonical_name,party
nbc,John Smith,smith_john_oh03,OH,3,John Smith,Rep
538,\"Smith, John\",smith_john_oh03,OH,3,,
deniers,John Smith,smith_john_oh03,OH,3,,
nbc,Mary Jones,jones_mary_oh03,OH,3,Mary Jones,Dem
538,Mary Jones,jones_mary_oh03,OH,3,,
deniers,Mary Jones,jones_mary_oh03,OH,3,,
nbc,Jane Doe,doe_jane_pa,PA,S3,Jane Doe,Dem
538,Jane Doe,doe_jane_pa,PA,S3,,
deniers,Jane Doe,doe_jane_pa,PA,,,
nbc,Al Roe,roe_al_pa,PA,S3,Al Roe,Rep
538,Al Roe,roe_al_pa,PA,S3,,
deniers,Al Roe,roe_al_pa,PA,,,
";

    const RESULTS: &str = "\
candidate,state,district,vote_share,winner
John Smith,OH,3,58.3,true
Mary Jones,OH,3,41.7,false
Jane Doe,PA,,51.0,true
Al Roe,PA,,49.0,false
";

    const HOUSE: &str = "\
candidate,state,district,win_probability,incumbent
\"Smith, John\",OH,3,0.81,true
Mary Jones,OH,3,0.19,false
";

    const SENATE: &str = "\
candidate,state,district,win_probability,incumbent
Jane Doe,PA,,0.55,false
Al Roe,PA,,0.45,false
";

    const STANCES: &str = "\
candidate,office,state,district,stance
John Smith,Representative,OH,3,Fully Denied
Mary Jones,Representative,OH,3,Accepted
Jane Doe,Senator,PA,,Accepted
Al Roe,Senator,PA,,Fully Denied
";

    fn populated() -> Connection {
        let map = NameMap::from_reader(MAPPINGS.as_bytes(), "name_mappings.csv").unwrap();
        let pipeline = IntegrationPipeline::new(PipelineConfig::default(), map);

        let mut sources = SourceRows::default();
        sources.add_results(
            ResultsLoader::scraped().load_reader(RESULTS.as_bytes(), "nbc.csv").unwrap(),
            Loaded::default(),
        );
        let house = ForecastLoader::house().load_reader(HOUSE.as_bytes(), "house.csv");
        sources.add_forecasts(house.unwrap());
        let senate = ForecastLoader::senate().load_reader(SENATE.as_bytes(), "senate.csv");
        sources.add_forecasts(senate.unwrap());
        let stances = StanceLoader::new().load_reader(STANCES.as_bytes(), "deniers.csv");
        sources.add_stances(stances.unwrap());

        let mut conn = db::open_in_memory().unwrap();
        pipeline.run_with(&mut conn, sources).unwrap();
        conn
    }

    #[test]
    fn test_candidate_counts() {
        let conn = populated();

        let all = candidate_counts(&conn, None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].office, Office::House);
        assert_eq!(all[0].stance, Stance::FullyDenied);
        assert_eq!(all[0].candidates, 1);

        let senate = candidate_counts(&conn, Some(Office::Senate)).unwrap();
        assert_eq!(senate.len(), 2);
        assert!(senate.iter().all(|c| c.office == Office::Senate));
    }

    #[test]
    fn test_incumbent_denier_counted_once() {
        let conn = populated();

        let rates = win_rates(
            &conn,
            &WinRateFilter {
                office: Some(Office::House),
                incumbent: Some(true),
            },
        )
        .unwrap();

        assert_eq!(
            rates,
            vec![WinRate {
                office: Office::House,
                stance: Stance::FullyDenied,
                incumbent: true,
                candidates: 1,
                winners: 1,
                win_rate: 1.0,
            }]
        );
    }

    #[test]
    fn test_win_rates_unfiltered() {
        let conn = populated();
        let rates = win_rates(&conn, &WinRateFilter::default()).unwrap();

        assert_eq!(rates.len(), 4);
        let denier_senate = rates
            .iter()
            .find(|r| r.office == Office::Senate && r.stance == Stance::FullyDenied)
            .unwrap();
        assert_eq!(denier_senate.winners, 0);
        assert_eq!(denier_senate.win_rate, 0.0);
    }

    #[test]
    fn test_average_forecasts() {
        let conn = populated();
        let averages = average_forecasts(&conn, Some(Office::Senate)).unwrap();

        assert_eq!(averages.len(), 2);
        let accepted = averages.iter().find(|a| a.stance == Stance::Accepted).unwrap();
        assert!((accepted.mean_win_probability - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_candidate_outcomes_join() {
        let conn = populated();
        let outcomes = candidate_outcomes(&conn).unwrap();

        assert_eq!(outcomes.len(), 4);
        let smith = outcomes.iter().find(|o| o.candidate_key == "smith_john_oh03").unwrap();
        assert_eq!(smith.race, "OH-03");
        assert_eq!(smith.stance, Some(Stance::FullyDenied));
        assert_eq!(smith.is_incumbent, Some(true));
        assert_eq!(smith.is_winner, Some(true));
        assert_eq!(smith.vote_share, Some(58.3));
    }

    #[test]
    fn test_race_ratings() {
        let conn = populated();
        let ratings = race_ratings(&conn).unwrap();

        assert_eq!(ratings.len(), 2);
        assert_eq!(ratings[0].race, "OH-03");
        assert_eq!(ratings[0].rating, Rating::LikelyR);
        assert_eq!(ratings[1].race, "PA-S3");
        assert_eq!(ratings[1].rating, Rating::TossUp);
    }

    #[test]
    fn test_rating_thresholds() {
        assert_eq!(Rating::from_probabilities(0.02, 0.97), Rating::SolidR);
        assert_eq!(Rating::from_probabilities(0.96, 0.04), Rating::SolidD);
        assert_eq!(Rating::from_probabilities(0.39, 0.61), Rating::LeanR);
        assert_eq!(Rating::from_probabilities(0.75, 0.25), Rating::LikelyD);
        assert_eq!(Rating::from_probabilities(0.5, 0.5), Rating::TossUp);
        assert_eq!(Rating::TossUp.label(), "Toss-Up");
    }

    #[test]
    fn test_queries_fail_fast_without_schema() {
        let conn = Connection::open_in_memory().unwrap();
        let err = candidate_counts(&conn, None).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
        assert!(race_ratings(&conn).is_err());
    }
}
