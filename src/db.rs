use chrono::NaiveDate;
use log::info;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, OpenFlags};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::entities::{Candidate, Office, RaceKey, Stance};
use crate::error::PipelineError;
use crate::parser::ResultLayer;
use crate::schema::TABLES;

// ============================================================================
// RECORDS (one per satellite table row)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StanceRecord {
    pub candidate_key: String,
    pub race: RaceKey,
    pub stance: Stance,
    pub source: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub candidate_key: String,
    pub race: RaceKey,
    /// 0.0 - 1.0
    pub win_probability: f64,
    pub is_incumbent: bool,
    /// Percent, 0 - 100
    pub average_voteshare: Option<f64>,
    pub forecast_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub candidate_key: String,
    pub race: RaceKey,
    /// Percent, 0 - 100; None when the source has no figure
    pub vote_share: Option<f64>,
    pub is_winner: Option<bool>,
    pub total_votes: Option<i64>,
    pub provenance: ResultLayer,
}

// ============================================================================
// CONNECTIONS
// ============================================================================

/// Open the store for the pipeline (single writer)
pub fn open(path: &Path) -> Result<Connection, PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, PipelineError> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

/// Open the store for analysis; any write through this connection fails
pub fn open_read_only(path: &Path) -> Result<Connection, PipelineError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<(), PipelineError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

// ============================================================================
// INSERTS
// ============================================================================

pub fn insert_candidates<'a>(
    conn: &Connection,
    candidates: impl IntoIterator<Item = &'a Candidate>,
) -> Result<usize, PipelineError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO candidates (candidate_key, name, party, office, state_code, district)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    let mut inserted = 0;
    for c in candidates {
        stmt.execute(params![
            c.key,
            c.name,
            c.party,
            c.office().as_str(),
            c.race.state.as_str(),
            c.race.district.code(),
        ])
        .map_err(|e| PipelineError::from_insert(e, &format!("candidate {}", c.key)))?;
        inserted += 1;
    }

    Ok(inserted)
}

pub fn insert_stances(conn: &Connection, records: &[StanceRecord]) -> Result<usize, PipelineError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO stances (candidate_key, office, state_code, district, stance, source, url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for r in records {
        stmt.execute(params![
            r.candidate_key,
            r.race.office().as_str(),
            r.race.state.as_str(),
            r.race.district.code(),
            r.stance.as_str(),
            r.source,
            r.url,
        ])
        .map_err(|e| PipelineError::from_insert(e, &format!("stance for {}", r.candidate_key)))?;
    }

    Ok(records.len())
}

pub fn insert_forecasts(
    conn: &Connection,
    records: &[ForecastRecord],
) -> Result<usize, PipelineError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO forecasts (
            candidate_key, office, state_code, district,
            win_probability, is_incumbent, average_voteshare, forecast_date
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    for r in records {
        stmt.execute(params![
            r.candidate_key,
            r.race.office().as_str(),
            r.race.state.as_str(),
            r.race.district.code(),
            r.win_probability,
            r.is_incumbent,
            r.average_voteshare,
            r.forecast_date.map(|d| d.format("%Y-%m-%d").to_string()),
        ])
        .map_err(|e| PipelineError::from_insert(e, &format!("forecast for {}", r.candidate_key)))?;
    }

    Ok(records.len())
}

pub fn insert_results(conn: &Connection, records: &[ResultRecord]) -> Result<usize, PipelineError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO results (
            candidate_key, office, state_code, district,
            vote_share, is_winner, total_votes, provenance
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    for r in records {
        stmt.execute(params![
            r.candidate_key,
            r.race.office().as_str(),
            r.race.state.as_str(),
            r.race.district.code(),
            r.vote_share,
            r.is_winner,
            r.total_votes,
            r.provenance.as_str(),
        ])
        .map_err(|e| PipelineError::from_insert(e, &format!("result for {}", r.candidate_key)))?;
    }

    Ok(records.len())
}

// ============================================================================
// READ BACK
// ============================================================================

/// Rebuild a RaceKey from the stored (office, state_code, district) columns
pub fn race_from_columns(office: &str, state: &str, district: &str) -> rusqlite::Result<RaceKey> {
    let office = office
        .parse::<Office>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    RaceKey::normalize(state, Some(district), Some(office))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

pub fn get_all_candidates(conn: &Connection) -> Result<Vec<Candidate>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT candidate_key, name, party, office, state_code, district
         FROM candidates
         ORDER BY candidate_key",
    )?;

    let candidates = stmt
        .query_map([], |row| {
            let office: String = row.get(3)?;
            let state: String = row.get(4)?;
            let district: String = row.get(5)?;

            Ok(Candidate {
                key: row.get(0)?,
                name: row.get(1)?,
                party: row.get(2)?,
                race: race_from_columns(&office, &state, &district)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(candidates)
}

pub fn count(conn: &Connection, table: &str) -> Result<i64, PipelineError> {
    if !TABLES.contains(&table) {
        return Err(PipelineError::Schema(format!("unknown table '{}'", table)));
    }
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}

/// Satellite rows whose (candidate, race) has no parent row
pub fn orphaned_rows(conn: &Connection) -> Result<i64, PipelineError> {
    let mut total = 0;
    for table in &TABLES[1..] {
        let orphans: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {t} s
                 LEFT JOIN candidates c
                   ON c.candidate_key = s.candidate_key
                  AND c.office = s.office
                  AND c.state_code = s.state_code
                  AND c.district = s.district
                 WHERE c.candidate_key IS NULL",
                t = table
            ),
            [],
            |row| row.get(0),
        )?;
        total += orphans;
    }
    Ok(total)
}

// ============================================================================
// DIGESTS
// ============================================================================

/// SHA-256 over every row of `table` in primary-key order
pub fn table_digest(conn: &Connection, table: &str) -> Result<String, PipelineError> {
    if !TABLES.contains(&table) {
        return Err(PipelineError::Schema(format!("unknown table '{}'", table)));
    }

    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY candidate_key", table))?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut hasher = Sha256::new();

    while let Some(row) = rows.next()? {
        for i in 0..columns {
            match row.get_ref(i)? {
                ValueRef::Null => hasher.update([0u8]),
                ValueRef::Integer(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_le_bytes());
                }
                ValueRef::Real(v) => {
                    hasher.update([2u8]);
                    hasher.update(v.to_bits().to_le_bytes());
                }
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    hasher.update([3u8]);
                    hasher.update((bytes.len() as u64).to_le_bytes());
                    hasher.update(bytes);
                }
            }
        }
        hasher.update([0xffu8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest of all four tables; equal digests mean identical contents
pub fn store_digest(conn: &Connection) -> Result<String, PipelineError> {
    let mut hasher = Sha256::new();
    for table in TABLES {
        hasher.update(table.as_bytes());
        hasher.update(table_digest(conn, table)?.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    info!("Store digest: {}", digest);
    Ok(digest)
}
