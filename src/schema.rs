// 📐 Schema Builder
// Four tables, candidates as the referential parent:
//
//   candidates (candidate_key PK, race)
//     ├── stances   (candidate_key, race) → candidates
//     ├── forecasts (candidate_key, race) → candidates
//     └── results   (candidate_key, race) → candidates
//
// Satellites reference the parent through the composite
// (candidate_key, office, state_code, district), so a satellite row can't
// point at the right candidate in the wrong race.

use log::info;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Behaviour when the store already has tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Drop and recreate every table (each run starts clean)
    #[default]
    Recreate,
    /// Create missing tables; refuse to run if any table holds rows
    FailIfPopulated,
}

/// Tables in dependency order (parent first)
pub const TABLES: [&str; 4] = ["candidates", "stances", "forecasts", "results"];

/// Columns the query layer relies on
pub const EXPECTED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "candidates",
        &["candidate_key", "name", "party", "office", "state_code", "district"],
    ),
    (
        "stances",
        &["candidate_key", "office", "state_code", "district", "stance", "source", "url"],
    ),
    (
        "forecasts",
        &[
            "candidate_key",
            "office",
            "state_code",
            "district",
            "win_probability",
            "is_incumbent",
            "average_voteshare",
            "forecast_date",
        ],
    ),
    (
        "results",
        &[
            "candidate_key",
            "office",
            "state_code",
            "district",
            "vote_share",
            "is_winner",
            "total_votes",
            "provenance",
        ],
    ),
];

const CREATE_CANDIDATES: &str = "CREATE TABLE IF NOT EXISTS candidates (
    candidate_key TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    party TEXT,
    office TEXT NOT NULL CHECK (office IN ('House', 'Senate')),
    state_code TEXT NOT NULL CHECK (length(state_code) = 2),
    district TEXT NOT NULL,
    UNIQUE (candidate_key, office, state_code, district)
)";

const CREATE_STANCES: &str = "CREATE TABLE IF NOT EXISTS stances (
    candidate_key TEXT PRIMARY KEY NOT NULL,
    office TEXT NOT NULL,
    state_code TEXT NOT NULL,
    district TEXT NOT NULL,
    stance TEXT NOT NULL CHECK (stance IN (
        'Fully Denied', 'Accepted with concerns', 'Accepted', 'Ambiguous', 'No comment'
    )),
    source TEXT,
    url TEXT,
    FOREIGN KEY (candidate_key, office, state_code, district)
        REFERENCES candidates (candidate_key, office, state_code, district)
)";

const CREATE_FORECASTS: &str = "CREATE TABLE IF NOT EXISTS forecasts (
    candidate_key TEXT NOT NULL,
    office TEXT NOT NULL,
    state_code TEXT NOT NULL,
    district TEXT NOT NULL,
    win_probability REAL NOT NULL CHECK (win_probability BETWEEN 0 AND 1),
    is_incumbent INTEGER NOT NULL CHECK (is_incumbent IN (0, 1)),
    average_voteshare REAL CHECK (average_voteshare BETWEEN 0 AND 100),
    forecast_date TEXT,
    PRIMARY KEY (candidate_key, office, state_code, district),
    FOREIGN KEY (candidate_key, office, state_code, district)
        REFERENCES candidates (candidate_key, office, state_code, district)
)";

const CREATE_RESULTS: &str = "CREATE TABLE IF NOT EXISTS results (
    candidate_key TEXT NOT NULL,
    office TEXT NOT NULL,
    state_code TEXT NOT NULL,
    district TEXT NOT NULL,
    vote_share REAL CHECK (vote_share BETWEEN 0 AND 100),
    is_winner INTEGER CHECK (is_winner IN (0, 1)),
    total_votes INTEGER CHECK (total_votes >= 0),
    provenance TEXT NOT NULL CHECK (provenance IN ('scraped', 'manual')),
    PRIMARY KEY (candidate_key, office, state_code, district),
    FOREIGN KEY (candidate_key, office, state_code, district)
        REFERENCES candidates (candidate_key, office, state_code, district)
)";

/// Create the schema according to `mode`.
///
/// Safe to call inside a transaction: SQLite DDL is transactional, so a
/// rolled-back run leaves the previous tables untouched.
pub fn create(conn: &Connection, mode: SchemaMode) -> Result<(), PipelineError> {
    match mode {
        SchemaMode::Recreate => drop_all(conn)?,
        SchemaMode::FailIfPopulated => {
            for table in TABLES {
                if table_exists(conn, table)? {
                    let rows: i64 =
                        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                            row.get(0)
                        })?;
                    if rows > 0 {
                        return Err(PipelineError::Schema(format!(
                            "table '{}' already holds {} rows",
                            table, rows
                        )));
                    }
                }
            }
        }
    }

    for ddl in [CREATE_CANDIDATES, CREATE_STANCES, CREATE_FORECASTS, CREATE_RESULTS] {
        conn.execute(ddl, [])?;
    }

    // Indexes for the race joins in the query layer
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_candidates_race ON candidates(office, state_code, district)",
        [],
    )?;

    info!("Schema ready ({:?})", mode);
    Ok(())
}

/// Drop every table, children first so foreign keys never dangle
pub fn drop_all(conn: &Connection) -> Result<(), PipelineError> {
    for table in TABLES.iter().rev() {
        conn.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
    }
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, PipelineError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn columns(conn: &Connection, table: &str) -> Result<Vec<String>, PipelineError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Fail fast when an expected table or column is missing
pub fn verify(conn: &Connection) -> Result<(), PipelineError> {
    for (table, expected) in EXPECTED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(PipelineError::Schema(format!("missing table '{}'", table)));
        }

        let present = columns(conn, table)?;
        if let Some(missing) = expected
            .iter()
            .find(|c| !present.iter().any(|p| p.as_str() == **c))
        {
            return Err(PipelineError::Schema(format!(
                "table '{}' is missing column '{}'",
                table, missing
            )));
        }
    }
    Ok(())
}
