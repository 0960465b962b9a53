// 🏗️ Raw Table Loaders
// One loader per source CSV: typing, cleanup, race-key normalization.
//
// A bad row never stops a load: it becomes a ParseError rejection and the
// loader moves on. Only an unreadable file is fatal.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::entities::{Office, RaceKey, RaceKeyError, Stance};
use crate::error::{PipelineError, ReasonCode, Rejection, RejectionKind};
use crate::reconciliation::normalize_name;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceType - which input file a row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Stances,
    HouseForecasts,
    SenateForecasts,
    ScrapedResults,
    ManualResults,
}

impl SourceType {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceType::Stances => "Election stances",
            SourceType::HouseForecasts => "House forecasts",
            SourceType::SenateForecasts => "Senate forecasts",
            SourceType::ScrapedResults => "Scraped results",
            SourceType::ManualResults => "Manual results",
        }
    }

    /// Tag the name map uses for this source's spellings
    pub fn tag(&self) -> SourceTag {
        match self {
            SourceType::Stances => SourceTag::Stances,
            SourceType::HouseForecasts | SourceType::SenateForecasts => SourceTag::Forecasts,
            // Manual corrections patch the scrape, so they share its spellings
            SourceType::ScrapedResults | SourceType::ManualResults => SourceTag::Results,
        }
    }
}

/// Name-spelling families in the mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTag {
    Results,
    Forecasts,
    Stances,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Results => "nbc",
            SourceTag::Forecasts => "538",
            SourceTag::Stances => "deniers",
        }
    }

    pub fn from_label(label: &str) -> Option<SourceTag> {
        match label.trim().to_lowercase().as_str() {
            "nbc" | "results" | "nbc_election_data" | "manual" => Some(SourceTag::Results),
            "538" | "fivethirtyeight" | "fte" | "forecasts" | "toplines" | "combined_toplines" => {
                Some(SourceTag::Forecasts)
            }
            "deniers" | "election_deniers" | "stances" | "stance" => Some(SourceTag::Stances),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a raw row came from (for rejections and logs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOrigin {
    pub source_type: SourceType,
    pub source_file: String,
    pub line_number: usize,
}

impl RowOrigin {
    pub fn reject(
        &self,
        kind: RejectionKind,
        reason: ReasonCode,
        raw_name: Option<&str>,
        race: Option<&RaceKey>,
        detail: impl Into<String>,
    ) -> Rejection {
        Rejection {
            kind,
            reason,
            source_file: self.source_file.clone(),
            line_number: self.line_number,
            raw_name: raw_name.map(str::to_string),
            race: race.map(|r| r.to_string()),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawStanceRow {
    pub origin: RowOrigin,
    pub raw_name: String,
    pub race: RaceKey,
    pub stance: Stance,
    pub source: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawForecastRow {
    pub origin: RowOrigin,
    pub raw_name: String,
    pub race: RaceKey,
    pub win_probability: f64,
    pub is_incumbent: bool,
    pub average_voteshare: Option<f64>,
    pub forecast_date: Option<NaiveDate>,
}

/// Which input layer a result came from; manual beats scraped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultLayer {
    Scraped,
    Manual,
}

impl ResultLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultLayer::Scraped => "scraped",
            ResultLayer::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResultRow {
    pub origin: RowOrigin,
    pub raw_name: String,
    pub race: RaceKey,
    /// Percent of the race total, None when the source has no figure
    pub vote_share: Option<f64>,
    pub is_winner: Option<bool>,
    pub party: Option<String>,
    pub total_votes: Option<i64>,
    pub layer: ResultLayer,
}

/// Output of a loader: good rows plus the rows it had to drop
#[derive(Debug)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub rejections: Vec<Rejection>,
    /// Rows outside the dataset's scope (other offices, other forecast models)
    pub filtered: usize,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Loaded {
            rows: Vec::new(),
            rejections: Vec::new(),
            filtered: 0,
        }
    }
}

// ============================================================================
// LOADER TRAIT
// ============================================================================

/// SourceLoader - one implementation per input file format
pub trait SourceLoader {
    type Row;

    fn source_type(&self) -> SourceType;

    /// Turn one CSV record into a typed row.
    ///
    /// `Ok(None)` means the row is out of scope and is only counted.
    fn parse_record(
        &self,
        record: &StringRecord,
        headers: &StringRecord,
        origin: RowOrigin,
    ) -> Result<Option<Self::Row>, Rejection>;

    fn load(&self, path: &Path) -> Result<Loaded<Self::Row>, PipelineError> {
        let file = File::open(path)?;
        let loaded = self.load_reader(file, &path.display().to_string())?;
        info!(
            "{}: {} rows from {} ({} rejected, {} filtered)",
            self.source_type().name(),
            loaded.rows.len(),
            path.display(),
            loaded.rejections.len(),
            loaded.filtered
        );
        Ok(loaded)
    }

    fn load_reader<R: Read>(
        &self,
        reader: R,
        source_file: &str,
    ) -> Result<Loaded<Self::Row>, PipelineError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = lowercase_headers(&mut rdr).map_err(|source| PipelineError::Input {
            path: source_file.to_string(),
            source,
        })?;

        let mut loaded = Loaded::default();

        for (index, result) in rdr.records().enumerate() {
            // header is line 1
            let fallback_line = index + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => {
                    return Err(PipelineError::Input {
                        path: source_file.to_string(),
                        source: e,
                    })
                }
                Err(e) => {
                    let line = e
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or(fallback_line);
                    warn!("{}:{} unreadable CSV record: {}", source_file, line, e);
                    loaded.rejections.push(Rejection {
                        kind: RejectionKind::ParseError,
                        reason: ReasonCode::MissingField,
                        source_file: source_file.to_string(),
                        line_number: line,
                        raw_name: None,
                        race: None,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            if record.iter().all(|field| field.is_empty()) {
                continue;
            }

            let origin = RowOrigin {
                source_type: self.source_type(),
                source_file: source_file.to_string(),
                line_number: record
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line),
            };

            match self.parse_record(&record, &headers, origin) {
                Ok(Some(row)) => loaded.rows.push(row),
                Ok(None) => loaded.filtered += 1,
                Err(rejection) => {
                    warn!("Skipping row: {}", rejection.summary());
                    loaded.rejections.push(rejection);
                }
            }
        }

        Ok(loaded)
    }
}

// ============================================================================
// CSV ROW SHAPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StanceCsv {
    #[serde(alias = "name", alias = "candidate_name")]
    candidate: Option<String>,
    office: Option<String>,
    #[serde(alias = "state_code")]
    state: Option<String>,
    district: Option<String>,
    stance: Option<String>,
    source: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastCsv {
    #[serde(alias = "name", alias = "candidate_name")]
    candidate: Option<String>,
    #[serde(alias = "state_code")]
    state: Option<String>,
    district: Option<String>,
    #[serde(alias = "chance_of_winning", alias = "winner")]
    win_probability: Option<String>,
    #[serde(alias = "is_incumbent", alias = "incumbency")]
    incumbent: Option<String>,
    #[serde(alias = "voteshare_mean", alias = "average_vote_share")]
    average_voteshare: Option<String>,
    #[serde(alias = "forecastdate")]
    forecast_date: Option<String>,
    expression: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultCsv {
    #[serde(alias = "name", alias = "candidate_name")]
    candidate: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    office: Option<String>,
    #[serde(alias = "state_code")]
    state: Option<String>,
    district: Option<String>,
    #[serde(alias = "percent_total_vote", alias = "voteshare")]
    vote_share: Option<String>,
    #[serde(alias = "is_winner", alias = "won")]
    winner: Option<String>,
    #[serde(alias = "political_party")]
    party: Option<String>,
    total_votes: Option<String>,
}

// ============================================================================
// STANCE LOADER
// ============================================================================

pub struct StanceLoader;

impl StanceLoader {
    pub fn new() -> Self {
        StanceLoader
    }
}

impl Default for StanceLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceLoader for StanceLoader {
    type Row = RawStanceRow;

    fn source_type(&self) -> SourceType {
        SourceType::Stances
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        headers: &StringRecord,
        origin: RowOrigin,
    ) -> Result<Option<RawStanceRow>, Rejection> {
        let row: StanceCsv = deserialize(record, headers, &origin)?;

        let raw_name = required(&origin, row.candidate, "candidate", None)?;
        let office_label = required(&origin, row.office, "office", Some(&raw_name))?;

        // The survey also covers governors, secretaries of state...
        if Office::from_label(&office_label).is_none() {
            debug!(
                "{}:{} skipping office '{}'",
                origin.source_file, origin.line_number, office_label
            );
            return Ok(None);
        }

        let state = required(&origin, row.state, "state", Some(&raw_name))?;
        let race = labelled_race_key(
            &origin,
            &state,
            row.district.as_deref(),
            &office_label,
            &raw_name,
        )?;

        let label = required(&origin, row.stance, "stance", Some(&raw_name))?;
        let stance = Stance::from_label(&label).ok_or_else(|| {
            origin.reject(
                RejectionKind::ParseError,
                ReasonCode::UnknownStance,
                Some(&raw_name),
                Some(&race),
                format!("unknown stance '{}'", label),
            )
        })?;

        Ok(Some(RawStanceRow {
            origin,
            raw_name,
            race,
            stance,
            source: non_empty(row.source),
            url: non_empty(row.url),
        }))
    }
}

// ============================================================================
// FORECAST LOADER
// ============================================================================

/// One loader per forecast file; the file decides the office
pub struct ForecastLoader {
    office: Office,
    /// Keep only this forecast date when set
    forecast_date: Option<NaiveDate>,
}

impl ForecastLoader {
    /// Model variant kept when the file carries several
    pub const EXPRESSION: &'static str = "_deluxe";

    pub fn new(office: Office) -> Self {
        ForecastLoader {
            office,
            forecast_date: None,
        }
    }

    pub fn house() -> Self {
        Self::new(Office::House)
    }

    pub fn senate() -> Self {
        Self::new(Office::Senate)
    }

    pub fn with_forecast_date(mut self, date: Option<NaiveDate>) -> Self {
        self.forecast_date = date;
        self
    }
}

impl SourceLoader for ForecastLoader {
    type Row = RawForecastRow;

    fn source_type(&self) -> SourceType {
        match self.office {
            Office::House => SourceType::HouseForecasts,
            Office::Senate => SourceType::SenateForecasts,
        }
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        headers: &StringRecord,
        origin: RowOrigin,
    ) -> Result<Option<RawForecastRow>, Rejection> {
        let row: ForecastCsv = deserialize(record, headers, &origin)?;

        if let Some(expression) = non_empty(row.expression) {
            if expression != Self::EXPRESSION {
                return Ok(None);
            }
        }

        let raw_name = required(&origin, row.candidate, "candidate", None)?;
        let state = required(&origin, row.state, "state", Some(&raw_name))?;
        let race = race_key(
            &origin,
            &state,
            row.district.as_deref(),
            Some(self.office),
            &raw_name,
        )?;

        let forecast_date = match non_empty(row.forecast_date) {
            Some(text) => Some(parse_date(&text).ok_or_else(|| {
                origin.reject(
                    RejectionKind::ParseError,
                    ReasonCode::MissingField,
                    Some(&raw_name),
                    Some(&race),
                    format!("unreadable forecast date '{}'", text),
                )
            })?),
            None => None,
        };

        if let (Some(wanted), Some(date)) = (self.forecast_date, forecast_date) {
            if wanted != date {
                return Ok(None);
            }
        }

        let win_probability =
            number(&origin, row.win_probability, "win_probability", &raw_name, &race)?
                .ok_or_else(|| missing(&origin, "win_probability", Some(&raw_name), Some(&race)))?;
        let is_incumbent = flag(&origin, row.incumbent, "incumbent", &raw_name, &race)?
            .ok_or_else(|| missing(&origin, "incumbent", Some(&raw_name), Some(&race)))?;
        let average_voteshare =
            number(&origin, row.average_voteshare, "average_voteshare", &raw_name, &race)?;

        Ok(Some(RawForecastRow {
            origin,
            raw_name,
            race,
            win_probability,
            is_incumbent,
            average_voteshare,
            forecast_date,
        }))
    }
}

// ============================================================================
// RESULTS LOADER
// ============================================================================

pub struct ResultsLoader {
    layer: ResultLayer,
}

impl ResultsLoader {
    pub fn scraped() -> Self {
        ResultsLoader {
            layer: ResultLayer::Scraped,
        }
    }

    pub fn manual() -> Self {
        ResultsLoader {
            layer: ResultLayer::Manual,
        }
    }
}

impl SourceLoader for ResultsLoader {
    type Row = RawResultRow;

    fn source_type(&self) -> SourceType {
        match self.layer {
            ResultLayer::Scraped => SourceType::ScrapedResults,
            ResultLayer::Manual => SourceType::ManualResults,
        }
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        headers: &StringRecord,
        origin: RowOrigin,
    ) -> Result<Option<RawResultRow>, Rejection> {
        let row: ResultCsv = deserialize(record, headers, &origin)?;

        // Scraped rows may split the name in two
        let candidate = non_empty(row.candidate).or_else(|| {
            let last = non_empty(row.last_name)?;
            Some(match non_empty(row.first_name) {
                Some(first) => format!("{} {}", first, last),
                None => last,
            })
        });
        let raw_name = required(&origin, candidate, "candidate", None)?;

        let office_label = non_empty(row.office);
        if office_label
            .as_deref()
            .is_some_and(|label| Office::from_label(label).is_none())
        {
            return Ok(None);
        }

        let state = required(&origin, row.state, "state", Some(&raw_name))?;
        let race = match office_label.as_deref() {
            Some(label) => {
                labelled_race_key(&origin, &state, row.district.as_deref(), label, &raw_name)?
            }
            None => race_key(&origin, &state, row.district.as_deref(), None, &raw_name)?,
        };

        let vote_share = number(&origin, row.vote_share, "vote_share", &raw_name, &race)?;
        let is_winner = flag(&origin, row.winner, "winner", &raw_name, &race)?;
        let total_votes = number(&origin, row.total_votes, "total_votes", &raw_name, &race)?
            .map(|v| v.round() as i64);

        Ok(Some(RawResultRow {
            origin,
            raw_name,
            race,
            vote_share,
            is_winner,
            party: non_empty(row.party),
            total_votes,
            layer: self.layer,
        }))
    }
}

/// Merge the manual-correction layer over the scraped layer.
///
/// A manual row replaces the scraped row with the same (name, race) in place;
/// manual rows with no scraped counterpart are appended in file order.
/// Corrections spelled differently from the scrape are matched later, by
/// canonical key, once names are resolved.
pub fn merge_result_layers(
    scraped: Vec<RawResultRow>,
    manual: Vec<RawResultRow>,
) -> Vec<RawResultRow> {
    let mut overrides: HashMap<(String, RaceKey), RawResultRow> = HashMap::new();
    let mut manual_order = Vec::new();

    for row in manual {
        let key = (normalize_name(&row.raw_name), row.race.clone());
        if overrides.insert(key.clone(), row).is_none() {
            manual_order.push(key);
        }
    }

    let mut merged = Vec::with_capacity(scraped.len() + overrides.len());
    let mut replaced = 0;

    for row in scraped {
        let key = (normalize_name(&row.raw_name), row.race.clone());
        match overrides.remove(&key) {
            Some(correction) => {
                replaced += 1;
                merged.push(correction);
            }
            None => merged.push(row),
        }
    }

    let mut added = 0;
    for key in manual_order {
        if let Some(row) = overrides.remove(&key) {
            added += 1;
            merged.push(row);
        }
    }

    if replaced + added > 0 {
        info!("Manual results: {} scraped rows overridden, {} rows added", replaced, added);
    }

    merged
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

fn lowercase_headers<R: Read>(rdr: &mut csv::Reader<R>) -> Result<StringRecord, csv::Error> {
    let headers: StringRecord = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase().replace(' ', "_"))
        .collect();
    rdr.set_headers(headers.clone());
    Ok(headers)
}

fn deserialize<'de, T: Deserialize<'de>>(
    record: &'de StringRecord,
    headers: &'de StringRecord,
    origin: &RowOrigin,
) -> Result<T, Rejection> {
    record.deserialize(Some(headers)).map_err(|e| {
        origin.reject(
            RejectionKind::ParseError,
            ReasonCode::MissingField,
            None,
            None,
            format!("malformed row: {}", e),
        )
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| {
            !v.is_empty() && !v.eq_ignore_ascii_case("nan") && !v.eq_ignore_ascii_case("null")
        })
}

fn missing(
    origin: &RowOrigin,
    field: &str,
    raw_name: Option<&str>,
    race: Option<&RaceKey>,
) -> Rejection {
    origin.reject(
        RejectionKind::ParseError,
        ReasonCode::MissingField,
        raw_name,
        race,
        format!("missing required field '{}'", field),
    )
}

fn required(
    origin: &RowOrigin,
    value: Option<String>,
    field: &str,
    raw_name: Option<&str>,
) -> Result<String, Rejection> {
    non_empty(value).ok_or_else(|| missing(origin, field, raw_name, None))
}

fn race_key(
    origin: &RowOrigin,
    state: &str,
    district: Option<&str>,
    office: Option<Office>,
    raw_name: &str,
) -> Result<RaceKey, Rejection> {
    RaceKey::normalize(state, district, office).map_err(|e| race_rejection(origin, raw_name, e))
}

fn labelled_race_key(
    origin: &RowOrigin,
    state: &str,
    district: Option<&str>,
    office_label: &str,
    raw_name: &str,
) -> Result<RaceKey, Rejection> {
    RaceKey::normalize_with_label(state, district, office_label)
        .map_err(|e| race_rejection(origin, raw_name, e))
}

fn race_rejection(origin: &RowOrigin, raw_name: &str, err: RaceKeyError) -> Rejection {
    origin.reject(
        RejectionKind::ParseError,
        err.reason(),
        Some(raw_name),
        None,
        err.to_string(),
    )
}

/// Numbers may carry a trailing '%' or thousands separators
fn number(
    origin: &RowOrigin,
    value: Option<String>,
    field: &str,
    raw_name: &str,
    race: &RaceKey,
) -> Result<Option<f64>, Rejection> {
    let Some(text) = non_empty(value) else {
        return Ok(None);
    };

    let cleaned = text.trim_end_matches('%').replace(',', "");
    match cleaned.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(origin.reject(
            RejectionKind::ParseError,
            ReasonCode::MalformedNumber,
            Some(raw_name),
            Some(race),
            format!("{} '{}' is not a number", field, text),
        )),
    }
}

fn flag(
    origin: &RowOrigin,
    value: Option<String>,
    field: &str,
    raw_name: &str,
    race: &RaceKey,
) -> Result<Option<bool>, Rejection> {
    let Some(text) = non_empty(value) else {
        return Ok(None);
    };

    match text.to_lowercase().as_str() {
        "true" | "t" | "1" | "1.0" | "yes" | "y" | "won" | "winner" | "incumbent" => Ok(Some(true)),
        "false" | "f" | "0" | "0.0" | "no" | "n" | "lost" | "challenger" => Ok(Some(false)),
        _ => Err(origin.reject(
            RejectionKind::ParseError,
            ReasonCode::MalformedFlag,
            Some(raw_name),
            Some(race),
            format!("{} '{}' is not a yes/no value", field, text),
        )),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

// ============================================================================
// TESTS
// ============================================================================
