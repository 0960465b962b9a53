// 🔄 Integration Pipeline
//
//   load → merge result layers → resolve → validate → register → dedupe
//        → rejection-rate gate → tally → write (one transaction) → digest
//
// Everything up to `write` is pure: it works on rows in memory and never
// touches the store. The write step creates the schema and inserts every
// table inside one exclusive transaction, so a failed run leaves the previous
// store exactly as it was.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::data_quality::{DataQualityEngine, QualitySummary};
use crate::db::{self, ForecastRecord, ResultRecord, StanceRecord};
use crate::deduplication::{DeduplicationEngine, DuplicateMatch, KeyedRow};
use crate::entities::{Candidate, CandidateRegistry, RaceKey};
use crate::error::{PipelineError, ReconciliationError, Rejection, RejectionKind};
use crate::parser::{
    merge_result_layers, ForecastLoader, Loaded, RawForecastRow, RawResultRow, RawStanceRow,
    ResultLayer, ResultsLoader, RowOrigin, SourceLoader, StanceLoader,
};
use crate::reconciliation::NameMap;
use crate::schema;
use crate::tally::{VoteShareEngine, VoteShareReport};

// ============================================================================
// SOURCE ROWS
// ============================================================================

/// Everything the loaders produced, before reconciliation
#[derive(Debug, Default)]
pub struct SourceRows {
    pub stances: Vec<RawStanceRow>,
    pub forecasts: Vec<RawForecastRow>,
    pub results: Vec<RawResultRow>,
    /// Parse rejections from every loader
    pub rejections: Vec<Rejection>,
    /// Rows outside the dataset's scope
    pub filtered: usize,
}

impl SourceRows {
    /// Load every input named in `config`
    pub fn load(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let inputs = &config.inputs;
        let mut sources = SourceRows::default();

        sources.add_stances(StanceLoader::new().load(&inputs.stances)?);
        sources.add_forecasts(
            ForecastLoader::house()
                .with_forecast_date(config.forecast_date)
                .load(&inputs.house_forecasts)?,
        );
        sources.add_forecasts(
            ForecastLoader::senate()
                .with_forecast_date(config.forecast_date)
                .load(&inputs.senate_forecasts)?,
        );

        let scraped = ResultsLoader::scraped().load(&inputs.results)?;
        let manual = match &inputs.manual_results {
            Some(path) => ResultsLoader::manual().load(path)?,
            None => Loaded::default(),
        };
        sources.add_results(scraped, manual);

        Ok(sources)
    }

    pub fn add_stances(&mut self, loaded: Loaded<RawStanceRow>) {
        self.absorb_counts(loaded.rejections, loaded.filtered);
        self.stances.extend(loaded.rows);
    }

    pub fn add_forecasts(&mut self, loaded: Loaded<RawForecastRow>) {
        self.absorb_counts(loaded.rejections, loaded.filtered);
        self.forecasts.extend(loaded.rows);
    }

    /// Manual rows override scraped rows for the same name and race
    pub fn add_results(&mut self, scraped: Loaded<RawResultRow>, manual: Loaded<RawResultRow>) {
        self.absorb_counts(scraped.rejections, scraped.filtered);
        self.absorb_counts(manual.rejections, manual.filtered);
        self.results.extend(merge_result_layers(scraped.rows, manual.rows));
    }

    fn absorb_counts(&mut self, rejections: Vec<Rejection>, filtered: usize) {
        self.rejections.extend(rejections);
        self.filtered += filtered;
    }

    pub fn row_count(&self) -> usize {
        self.stances.len() + self.forecasts.len() + self.results.len()
    }
}

// ============================================================================
// INTEGRATED DATA SET
// ============================================================================

/// Output of the pure stage: exactly what `write` will insert
#[derive(Debug, Default)]
pub struct Integrated {
    /// Canonical-key order
    pub candidates: Vec<Candidate>,
    pub stances: Vec<StanceRecord>,
    pub forecasts: Vec<ForecastRecord>,
    pub results: Vec<ResultRecord>,
    pub rejections: Vec<Rejection>,
    pub duplicates: Vec<DuplicateMatch>,
    pub quality: QualitySummary,
    pub filtered: usize,
    /// Rows that reached reconciliation (denominator of the rejection rate)
    pub rows_reconciled: usize,
}

impl Integrated {
    pub fn count(&self, kind: RejectionKind) -> usize {
        self.rejections.iter().filter(|r| r.kind == kind).count()
    }

    pub fn reconciliation_rejection_rate(&self) -> f64 {
        if self.rows_reconciled == 0 {
            return 0.0;
        }
        self.count(RejectionKind::ReconciliationError) as f64 / self.rows_reconciled as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub candidates: usize,
    pub stances: usize,
    pub forecasts: usize,
    pub results: usize,
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inserted: TableCounts,
    pub rows_filtered: usize,
    pub rows_reconciled: usize,
    pub reconciliation_rejection_rate: f64,
    /// Rejections per kind, keyed by kind name
    pub rejection_counts: BTreeMap<String, usize>,
    pub rejections: Vec<Rejection>,
    pub duplicates: Vec<DuplicateMatch>,
    pub quality: QualitySummary,
    pub vote_shares: VoteShareReport,
    /// SHA-256 over all four tables after the write
    pub store_digest: String,
}

impl RunReport {
    pub fn rejections_of(&self, kind: RejectionKind) -> usize {
        self.rejections.iter().filter(|r| r.kind == kind).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} candidates, {} stances, {} forecasts, {} results; {} rows rejected ({} parse, {} reconciliation, {} validation); {}",
            self.run_id,
            self.inserted.candidates,
            self.inserted.stances,
            self.inserted.forecasts,
            self.inserted.results,
            self.rejections.len(),
            self.rejections_of(RejectionKind::ParseError),
            self.rejections_of(RejectionKind::ReconciliationError),
            self.rejections_of(RejectionKind::ValidationError),
            self.vote_shares.summary()
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Run report written to {}", path.display());
        Ok(())
    }
}

// ============================================================================
// INTEGRATION PIPELINE
// ============================================================================

pub struct IntegrationPipeline {
    config: PipelineConfig,
    name_map: NameMap,
}

impl IntegrationPipeline {
    pub fn new(config: PipelineConfig, name_map: NameMap) -> Self {
        IntegrationPipeline { config, name_map }
    }

    /// Build from config, reading the name map it points at
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let name_map = NameMap::from_path(&config.inputs.name_map)?;
        Ok(Self::new(config, name_map))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the configured inputs and run against `conn`
    pub fn run(&self, conn: &mut Connection) -> Result<RunReport, PipelineError> {
        let sources = SourceRows::load(&self.config)?;
        info!(
            "Loaded {} rows ({} parse rejections, {} filtered)",
            sources.row_count(),
            sources.rejections.len(),
            sources.filtered
        );
        self.run_with(conn, sources)
    }

    /// Run on rows that are already loaded
    pub fn run_with(
        &self,
        conn: &mut Connection,
        sources: SourceRows,
    ) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!("Run {} started", run_id);

        let integrated = self.integrate(sources);
        self.check_rejection_rate(&integrated)?;

        let vote_shares = VoteShareEngine::with_tolerance(self.config.vote_share_tolerance)
            .check(&integrated.results);

        let inserted = self.write(conn, &integrated)?;
        let store_digest = db::store_digest(conn)?;

        let mut rejection_counts = BTreeMap::new();
        for r in &integrated.rejections {
            *rejection_counts.entry(format!("{:?}", r.kind)).or_insert(0) += 1;
        }

        let report = RunReport {
            run_id,
            version: crate::VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            inserted,
            rows_filtered: integrated.filtered,
            rows_reconciled: integrated.rows_reconciled,
            reconciliation_rejection_rate: integrated.reconciliation_rejection_rate(),
            rejection_counts,
            rejections: integrated.rejections,
            duplicates: integrated.duplicates,
            quality: integrated.quality,
            vote_shares,
            store_digest,
        };

        info!("{}", report.summary());
        Ok(report)
    }

    /// Resolve, validate, register and dedupe every row. No I/O.
    pub fn integrate(&self, sources: SourceRows) -> Integrated {
        let mut registry = CandidateRegistry::new();
        let mut quality = DataQualityEngine::new();
        let mut rejections = sources.rejections;
        let mut rows_reconciled = 0;

        // Results first: they carry party labels and the fullest names
        let corrected = self.manually_corrected(&sources.results);
        let mut results = Vec::new();
        for row in sources.results {
            if row.layer == ResultLayer::Scraped {
                if let Some(key) = self.resolve_result(&row).filter(|key| corrected.contains(key)) {
                    debug!(
                        "{}:{} '{}' superseded by a manual correction for {}",
                        row.origin.source_file, row.origin.line_number, row.raw_name, key
                    );
                    continue;
                }
            }
            rows_reconciled += 1;
            let party = row.party.as_deref();
            let validate = || {
                let validations = quality.validate_result(&row);
                quality.judge(&row.origin, &row.raw_name, &row.race, &validations)
            };
            let outcome =
                self.admit(&mut registry, &row.origin, &row.raw_name, &row.race, party, validate);
            match outcome {
                Ok(key) => results.push(KeyedRow {
                    record: ResultRecord {
                        candidate_key: key.clone(),
                        race: row.race.clone(),
                        vote_share: row.vote_share,
                        is_winner: row.is_winner,
                        total_votes: row.total_votes,
                        provenance: row.layer,
                    },
                    candidate_key: key,
                    raw_name: row.raw_name,
                    race: row.race,
                    origin: row.origin,
                }),
                Err(rejection) => rejections.push(rejection),
            }
        }

        let mut forecasts = Vec::new();
        for row in sources.forecasts {
            rows_reconciled += 1;
            let validate = || {
                let validations = quality.validate_forecast(&row);
                quality.judge(&row.origin, &row.raw_name, &row.race, &validations)
            };
            let outcome =
                self.admit(&mut registry, &row.origin, &row.raw_name, &row.race, None, validate);
            match outcome {
                Ok(key) => forecasts.push(KeyedRow {
                    record: ForecastRecord {
                        candidate_key: key.clone(),
                        race: row.race.clone(),
                        win_probability: row.win_probability,
                        is_incumbent: row.is_incumbent,
                        average_voteshare: row.average_voteshare,
                        forecast_date: row.forecast_date,
                    },
                    candidate_key: key,
                    raw_name: row.raw_name,
                    race: row.race,
                    origin: row.origin,
                }),
                Err(rejection) => rejections.push(rejection),
            }
        }

        let mut stances = Vec::new();
        for row in sources.stances {
            rows_reconciled += 1;
            // Stance rows have no numeric fields to range-check
            let outcome =
                self.admit(&mut registry, &row.origin, &row.raw_name, &row.race, None, || Ok(()));
            match outcome {
                Ok(key) => stances.push(KeyedRow {
                    record: StanceRecord {
                        candidate_key: key.clone(),
                        race: row.race.clone(),
                        stance: row.stance,
                        source: row.source,
                        url: row.url,
                    },
                    candidate_key: key,
                    raw_name: row.raw_name,
                    race: row.race,
                    origin: row.origin,
                }),
                Err(rejection) => rejections.push(rejection),
            }
        }

        let dedup = DeduplicationEngine::new();
        let mut duplicates = Vec::new();

        let results = dedup.dedupe("results", results);
        rejections.extend(results.rejections);
        duplicates.extend(results.matches);

        let forecasts = dedup.dedupe("forecasts", forecasts);
        rejections.extend(forecasts.rejections);
        duplicates.extend(forecasts.matches);

        let stances = dedup.dedupe("stances", stances);
        rejections.extend(stances.rejections);
        duplicates.extend(stances.matches);

        let integrated = Integrated {
            candidates: registry.all().cloned().collect(),
            stances: stances.records,
            forecasts: forecasts.records,
            results: results.records,
            rejections,
            duplicates,
            quality: quality.summary().clone(),
            filtered: sources.filtered,
            rows_reconciled,
        };

        info!(
            "Integrated {} candidates from {} rows ({} rejected, {} duplicates)",
            integrated.candidates.len(),
            integrated.rows_reconciled,
            integrated.rejections.len(),
            integrated.duplicates.len()
        );
        integrated
    }

    /// Canonical keys that have a manual result row.
    ///
    /// Layers are first merged by spelling; a manual row spelled differently
    /// from its scraped twin only meets it here, after resolution.
    fn manually_corrected(&self, rows: &[RawResultRow]) -> BTreeSet<String> {
        rows.iter()
            .filter(|row| row.layer == ResultLayer::Manual)
            .filter_map(|row| self.resolve_result(row))
            .collect()
    }

    fn resolve_result(&self, row: &RawResultRow) -> Option<String> {
        self.name_map
            .resolve(row.origin.source_type.tag(), &row.raw_name, &row.race)
            .ok()
    }

    /// Resolve one row, run its validation, then register its candidate.
    ///
    /// Only rows that pass every step may create a candidate.
    fn admit(
        &self,
        registry: &mut CandidateRegistry,
        origin: &RowOrigin,
        raw_name: &str,
        race: &RaceKey,
        party: Option<&str>,
        validate: impl FnOnce() -> Result<(), Rejection>,
    ) -> Result<String, Rejection> {
        let tag = origin.source_type.tag();
        let reconciliation_rejection = |err: ReconciliationError| {
            let rejection = origin.reject(
                RejectionKind::ReconciliationError,
                err.reason(),
                Some(raw_name),
                Some(race),
                err.to_string(),
            );
            warn!("Skipping row: {}", rejection.summary());
            rejection
        };

        let key = self
            .name_map
            .resolve(tag, raw_name, race)
            .map_err(reconciliation_rejection)?;

        validate()?;

        let identity = self.name_map.identity(&key);
        let name = identity
            .and_then(|i| i.canonical_name.as_deref())
            .unwrap_or_else(|| raw_name.trim());
        let party = identity.and_then(|i| i.party.as_deref()).or(party);

        registry
            .observe(&key, name, party, race)
            .map_err(reconciliation_rejection)?;

        Ok(key)
    }

    fn check_rejection_rate(&self, integrated: &Integrated) -> Result<(), PipelineError> {
        let rate = integrated.reconciliation_rejection_rate();
        let limit = self.config.max_reconciliation_rejection_rate;

        if rate > limit {
            return Err(PipelineError::RejectionThreshold {
                rate,
                limit,
                rejected: integrated.count(RejectionKind::ReconciliationError),
                total: integrated.rows_reconciled,
            });
        }
        Ok(())
    }

    /// Create the schema and insert every table in one exclusive transaction
    pub fn write(
        &self,
        conn: &mut Connection,
        integrated: &Integrated,
    ) -> Result<TableCounts, PipelineError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;

        schema::create(&tx, self.config.schema_mode)?;

        // Parents before children
        let counts = TableCounts {
            candidates: db::insert_candidates(&tx, &integrated.candidates)?,
            stances: db::insert_stances(&tx, &integrated.stances)?,
            forecasts: db::insert_forecasts(&tx, &integrated.forecasts)?,
            results: db::insert_results(&tx, &integrated.results)?,
        };

        tx.commit()?;
        info!(
            "Wrote {} candidates, {} stances, {} forecasts, {} results",
            counts.candidates, counts.stances, counts.forecasts, counts.results
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;

    const MAPPINGS: &str = "\
source,raw_name,canonical_key,state,district,canonical_name,party
nbc,John Smith,smith_john_oh03,OH,3,John Smith,Rep
538,\"Smith, John\",smith_john_oh03,OH,3,,
deniers,John Smith,smith_john_oh03,OH,3,,
nbc,Mary Jones,jones_mary_oh03,OH,3,Mary Jones,Dem
538,Mary Jones,jones_mary_oh03,OH,3,,
nbc,Jane Doe,doe_jane_pa,PA,S3,Jane Doe,Dem
538,Jane Doe,doe_jane_pa,PA,S3,,
deniers,Jane Doe,doe_jane_pa,PA,,,
";

    const RESULTS: &str = "\
candidate,state,district,vote_share,winner
John Smith,OH,3,58.3,true
Mary Jones,OH,3,41.7,false
Jane Doe,PA,,51.0,true
Write-ins,PA,,0.4,false
";

    const FORECASTS: &str = "\
candidate,state,district,win_probability,incumbent
\"Smith, John\",OH,3,0.81,true
Mary Jones,OH,3,0.19,false
";

    const STANCES: &str = "\
candidate,office,state,district,stance
John Smith,Representative,OH,3,Fully Denied
Jane Doe,Senator,PA,,Accepted
Pat Quinn,Governor,IL,,Fully Denied
";

    const NO_FORECASTS: &str = "candidate,state,district,win_probability,incumbent\n";
    const NO_STANCES: &str = "candidate,office,state,district,stance\n";

    fn pipeline() -> IntegrationPipeline {
        let map = NameMap::from_reader(MAPPINGS.as_bytes(), "name_mappings.csv").unwrap();
        IntegrationPipeline::new(PipelineConfig::default(), map)
    }

    fn sources(results: &str, forecasts: &str, stances: &str) -> SourceRows {
        let mut s = SourceRows::default();
        s.add_results(
            ResultsLoader::scraped().load_reader(results.as_bytes(), "nbc.csv").unwrap(),
            Loaded::default(),
        );
        s.add_forecasts(
            ForecastLoader::house()
                .load_reader(forecasts.as_bytes(), "house.csv")
                .unwrap(),
        );
        s.add_stances(StanceLoader::new().load_reader(stances.as_bytes(), "deniers.csv").unwrap());
        s
    }

    fn memory() -> Connection {
        db::open_in_memory().unwrap()
    }

    #[test]
    fn test_integrate_merges_variants_into_one_candidate() {
        let out = pipeline().integrate(sources(RESULTS, FORECASTS, STANCES));

        let keys: Vec<&str> = out.candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["doe_jane_pa", "jones_mary_oh03", "smith_john_oh03", "write_ins_pa_s3"]
        );

        let smith = out.candidates.iter().find(|c| c.key == "smith_john_oh03").unwrap();
        assert_eq!(smith.name, "John Smith");
        assert_eq!(smith.party.as_deref(), Some("Rep"));

        // One record per table for the two spellings of Smith
        let smith = |key: &String| key == "smith_john_oh03";
        assert_eq!(out.results.iter().filter(|r| smith(&r.candidate_key)).count(), 1);
        assert_eq!(out.forecasts.iter().filter(|r| smith(&r.candidate_key)).count(), 1);
        assert_eq!(out.stances.iter().filter(|r| smith(&r.candidate_key)).count(), 1);

        // Governor row is out of scope, not rejected
        assert_eq!(out.filtered, 1);
        assert!(out.rejections.is_empty());
    }

    #[test]
    fn test_unmapped_spelling_rejected_once() {
        let results = "\
candidate,state,district,vote_share,winner
J. Smith,OH,3,58.3,true
Mary Jones,OH,3,41.7,false
";
        let out = pipeline().integrate(sources(results, NO_FORECASTS, NO_STANCES));

        assert_eq!(out.rejections.len(), 1);
        let r = &out.rejections[0];
        assert_eq!(r.kind, RejectionKind::ReconciliationError);
        assert_eq!(r.reason, ReasonCode::NoMatch);
        assert_eq!(r.raw_name.as_deref(), Some("J. Smith"));
        assert_eq!(r.race.as_deref(), Some("OH-03"));
        assert_eq!(r.source_file, "nbc.csv");
        assert_eq!(r.line_number, 2);

        assert!(out.candidates.iter().all(|c| c.key != "smith_john_oh03"));
    }

    #[test]
    fn test_invalid_row_creates_no_candidate() {
        let results = "\
candidate,state,district,vote_share,winner
John Smith,OH,3,158.3,true
";
        let out = pipeline().integrate(sources(results, NO_FORECASTS, NO_STANCES));

        assert_eq!(out.count(RejectionKind::ValidationError), 1);
        assert!(out.candidates.is_empty());
        assert!(out.results.is_empty());
    }

    #[test]
    fn test_conflicting_forecasts_keep_first() {
        let forecasts = "\
candidate,state,district,win_probability,incumbent
\"Smith, John\",OH,3,0.81,true
\"Smith, John\",OH,3,0.81,true
\"Smith, John\",OH,3,0.55,true
";
        let out = pipeline().integrate(sources(RESULTS, forecasts, STANCES));

        let smith: Vec<_> = out
            .forecasts
            .iter()
            .filter(|f| f.candidate_key == "smith_john_oh03")
            .collect();
        assert_eq!(smith.len(), 1);
        assert_eq!(smith[0].win_probability, 0.81);
        assert_eq!(out.duplicates.len(), 2);
        assert_eq!(out.rejections.len(), 1);
        assert_eq!(out.rejections[0].reason, ReasonCode::ConflictingDuplicate);
        assert_eq!(out.rejections[0].line_number, 4);
    }

    #[test]
    fn test_manual_result_overrides_scrape() {
        let manual = "\
candidate,state,district,vote_share,winner
John Smith,OH,3,58.0,true
";
        let mut s = SourceRows::default();
        s.add_results(
            ResultsLoader::scraped().load_reader(RESULTS.as_bytes(), "nbc.csv").unwrap(),
            ResultsLoader::manual().load_reader(manual.as_bytes(), "manual.csv").unwrap(),
        );
        let out = pipeline().integrate(s);

        let smith = out.results.iter().find(|r| r.candidate_key == "smith_john_oh03").unwrap();
        assert_eq!(smith.vote_share, Some(58.0));
        assert_eq!(smith.provenance, ResultLayer::Manual);
    }

    #[test]
    fn test_manual_result_spelled_differently_still_overrides() {
        let mappings = "\
source,raw_name,canonical_key,state,district,canonical_name,party
nbc,John Smith,smith_john_oh03,OH,3,John Smith,Rep
nbc,\"Smith, John\",smith_john_oh03,OH,3,,
";
        let scraped = "\
candidate,state,district,vote_share,winner
John Smith,OH,3,,
";
        let manual = "\
candidate,state,district,vote_share,winner
\"Smith, John\",OH,3,58.3,true
";
        let map = NameMap::from_reader(mappings.as_bytes(), "name_mappings.csv").unwrap();
        let p = IntegrationPipeline::new(PipelineConfig::default(), map);

        let mut s = SourceRows::default();
        s.add_results(
            ResultsLoader::scraped().load_reader(scraped.as_bytes(), "nbc.csv").unwrap(),
            ResultsLoader::manual().load_reader(manual.as_bytes(), "manual.csv").unwrap(),
        );
        let out = p.integrate(s);

        assert!(out.rejections.is_empty());
        assert!(out.duplicates.is_empty());
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].candidate_key, "smith_john_oh03");
        assert_eq!(out.results[0].vote_share, Some(58.3));
        assert_eq!(out.results[0].is_winner, Some(true));
        assert_eq!(out.results[0].provenance, ResultLayer::Manual);
        assert_eq!(out.rows_reconciled, 1);
    }

    #[test]
    fn test_ambiguous_spelling_rejected_during_integrate() {
        let mappings = "\
source,raw_name,canonical_key,state,district
538,Pat Lee,lee_pat_tx07,TX,7
538,Pat Lee,lee_patricia_tx07,TX,7
nbc,Pat Lee,lee_pat_tx07,TX,7
";
        let forecasts = "\
candidate,state,district,win_probability,incumbent
Pat Lee,TX,7,0.6,false
";
        let results = "\
candidate,state,district,vote_share,winner
Pat Lee,TX,7,55.0,true
";
        let map = NameMap::from_reader(mappings.as_bytes(), "name_mappings.csv").unwrap();
        let p = IntegrationPipeline::new(PipelineConfig::default(), map);
        let out = p.integrate(sources(results, forecasts, NO_STANCES));

        assert_eq!(out.rejections.len(), 1);
        let r = &out.rejections[0];
        assert_eq!(r.kind, RejectionKind::ReconciliationError);
        assert_eq!(r.reason, ReasonCode::AmbiguousMatch);
        assert_eq!(r.source_file, "house.csv");
        assert_eq!(r.race.as_deref(), Some("TX-07"));

        // The unambiguous results spelling still lands
        assert!(out.forecasts.is_empty());
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn test_run_writes_store_with_integrity() {
        let mut conn = memory();
        let report = pipeline().run_with(&mut conn, sources(RESULTS, FORECASTS, STANCES)).unwrap();

        assert_eq!(report.inserted.candidates, 4);
        assert_eq!(report.inserted.results, 4);
        assert_eq!(report.inserted.forecasts, 2);
        assert_eq!(report.inserted.stances, 2);
        assert_eq!(db::orphaned_rows(&conn).unwrap(), 0);
        assert_eq!(report.store_digest, db::store_digest(&conn).unwrap());

        // OH-03 sums to 100; PA-S3 is 51.4 and gets flagged
        assert_eq!(report.vote_shares.races_checked, 2);
        assert_eq!(report.vote_shares.flagged.len(), 1);
        assert_eq!(report.vote_shares.flagged[0].race, "PA-S3");
    }

    #[test]
    fn test_runs_are_idempotent() {
        let mut first = memory();
        let mut second = memory();

        let a = pipeline().run_with(&mut first, sources(RESULTS, FORECASTS, STANCES)).unwrap();
        let b = pipeline().run_with(&mut second, sources(RESULTS, FORECASTS, STANCES)).unwrap();
        assert_eq!(a.store_digest, b.store_digest);
        assert_ne!(a.run_id, b.run_id);

        // Re-running over an existing store recreates it identically
        let c = pipeline().run_with(&mut first, sources(RESULTS, FORECASTS, STANCES)).unwrap();
        assert_eq!(a.store_digest, c.store_digest);
    }

    #[test]
    fn test_rejection_threshold_aborts_before_write() {
        let results = "\
candidate,state,district,vote_share,winner
Nobody One,OH,3,50,false
Nobody Two,OH,3,50,false
John Smith,OH,3,0,false
";
        let mut conn = memory();
        let err = pipeline()
            .run_with(&mut conn, sources(results, NO_FORECASTS, NO_STANCES))
            .unwrap_err();

        match err {
            PipelineError::RejectionThreshold { rejected, total, .. } => {
                assert_eq!(rejected, 2);
                assert_eq!(total, 3);
            }
            other => panic!("expected RejectionThreshold, got {:?}", other),
        }
        assert!(!schema::table_exists(&conn, "candidates").unwrap());
    }

    #[test]
    fn test_failed_write_keeps_previous_store() {
        let mut conn = memory();
        let p = pipeline();
        let first = p.run_with(&mut conn, sources(RESULTS, FORECASTS, STANCES)).unwrap();

        // A stance pointing at a candidate that was never registered
        let mut broken = p.integrate(sources(RESULTS, FORECASTS, STANCES));
        broken.stances.push(StanceRecord {
            candidate_key: "ghost_oh03".to_string(),
            race: "OH-03".parse().unwrap(),
            stance: crate::entities::Stance::Accepted,
            source: None,
            url: None,
        });

        let err = p.write(&mut conn, &broken).unwrap_err();
        assert!(matches!(err, PipelineError::Integrity(_)));
        assert_eq!(db::store_digest(&conn).unwrap(), first.store_digest);
    }

    #[test]
    fn test_fail_if_populated_refuses_second_run() {
        let map = NameMap::from_reader(MAPPINGS.as_bytes(), "name_mappings.csv").unwrap();
        let config = PipelineConfig {
            schema_mode: schema::SchemaMode::FailIfPopulated,
            ..PipelineConfig::default()
        };
        let p = IntegrationPipeline::new(config, map);
        let mut conn = memory();

        p.run_with(&mut conn, sources(RESULTS, FORECASTS, STANCES)).unwrap();
        let err = p.run_with(&mut conn, sources(RESULTS, FORECASTS, STANCES)).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
        assert_eq!(db::count(&conn, "candidates").unwrap(), 4);
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let mut conn = memory();

        let report = pipeline().run_with(&mut conn, sources(RESULTS, FORECASTS, STANCES)).unwrap();
        report.write_json(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.inserted, report.inserted);
        assert!(report.summary().contains("4 candidates"));
    }
}
