//! Identity resolution, reconciliation and seed passes over the local fixture store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use matchday_adapters::{
    provider_for_source, ApiFootballConfig, FixtureProvider, ProviderError, ProviderFixture,
    TeamCandidate, API_FOOTBALL, DEFAULT_API_FOOTBALL_BASE,
};
use matchday_core::{
    same_team, Fixture, FixtureId, FixtureRecord, FixtureStatus, MatchOutcome, MatchResult,
};
use matchday_storage::{
    BackoffPolicy, Collection, CollectionStore, HttpClientConfig, PassLock, SavedCollection,
    StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "matchday-sync";

pub const DEFAULT_CONFIG_FILE: &str = "matchday.yaml";
pub const DEFAULT_SYNC_CRON: &str = "0 */5 * * * *";
pub const DEFAULT_SEED_COUNT: u32 = 10;
const LOCK_FILE_NAME: &str = ".matchday.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProfile {
    /// Display name sent to the provider's team search.
    pub search: String,
    /// Case-insensitive substring used to pick among search results.
    #[serde(default)]
    pub token: Option<String>,
}

impl TeamProfile {
    pub fn token(&self) -> &str {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.search)
    }
}

impl Default for TeamProfile {
    fn default() -> Self {
        Self {
            search: "Luton".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_id: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub team: TeamProfile,
    pub timezone: String,
    pub fixtures_path: PathBuf,
    pub results_path: PathBuf,
    pub lock_path: PathBuf,
    pub sync_cron: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let fixtures_path = PathBuf::from("data/fixtures.json");
        Self {
            source_id: API_FOOTBALL.to_string(),
            base_url: DEFAULT_API_FOOTBALL_BASE.to_string(),
            api_key: None,
            team: TeamProfile::default(),
            timezone: "Europe/London".to_string(),
            lock_path: default_lock_path(&fixtures_path),
            fixtures_path,
            results_path: PathBuf::from("data/results.json"),
            sync_cron: DEFAULT_SYNC_CRON.to_string(),
            http_timeout_secs: 20,
            user_agent: format!("matchday/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Optional YAML profile; every key may be overridden from the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    source: Option<String>,
    base_url: Option<String>,
    team: Option<TeamProfile>,
    timezone: Option<String>,
    fixtures_path: Option<PathBuf>,
    results_path: Option<PathBuf>,
    lock_path: Option<PathBuf>,
    sync_cron: Option<String>,
    http_timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let path = std::env::var("MATCHDAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = match load_config_file(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "ignoring unreadable config profile"
                );
                ConfigFile::default()
            }
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    fn from_sources(file: ConfigFile, var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let mut team = file.team.unwrap_or(defaults.team);
        if let Some(search) = var("MATCHDAY_TEAM_SEARCH") {
            team.search = search;
        }
        if let Some(token) = var("MATCHDAY_TEAM_TOKEN") {
            team.token = Some(token);
        }

        let fixtures_path = var("FIXTURES_PATH")
            .map(PathBuf::from)
            .or(file.fixtures_path)
            .unwrap_or(defaults.fixtures_path);
        let lock_path = var("MATCHDAY_LOCK_PATH")
            .map(PathBuf::from)
            .or(file.lock_path)
            .unwrap_or_else(|| default_lock_path(&fixtures_path));

        Self {
            source_id: file.source.unwrap_or(defaults.source_id),
            base_url: var("APISPORTS_BASE")
                .or(file.base_url)
                .unwrap_or(defaults.base_url),
            api_key: var("APISPORTS_KEY"),
            team,
            timezone: var("MATCHDAY_TIMEZONE")
                .or(file.timezone)
                .unwrap_or(defaults.timezone),
            results_path: var("RESULTS_PATH")
                .map(PathBuf::from)
                .or(file.results_path)
                .unwrap_or(defaults.results_path),
            fixtures_path,
            lock_path,
            sync_cron: var("SYNC_CRON")
                .or(file.sync_cron)
                .unwrap_or(defaults.sync_cron),
            http_timeout_secs: var("MATCHDAY_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .or(file.http_timeout_secs)
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: var("MATCHDAY_USER_AGENT")
                .or(file.user_agent)
                .unwrap_or(defaults.user_agent),
        }
    }

    pub fn provider_config(&self) -> ApiFootballConfig {
        ApiFootballConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            http: HttpClientConfig {
                timeout: Duration::from_secs(self.http_timeout_secs),
                user_agent: Some(self.user_agent.clone()),
                backoff: BackoffPolicy::default(),
            },
        }
    }
}

fn default_lock_path(fixtures_path: &Path) -> PathBuf {
    match fixtures_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(LOCK_FILE_NAME),
        _ => PathBuf::from(LOCK_FILE_NAME),
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    if raw.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration: {0}")]
    Config(String),
    #[error("team search for `{search}` returned no candidates")]
    NoTeamCandidates { search: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Another pass already holds the store lock.
    pub fn is_locked(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::Locked { .. }))
    }
}

/// A provider fixture reduced to the keys the resolver matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub id: FixtureId,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
}

/// Keyed on the provider's own calendar day. Entries without a kickoff, and ids
/// already held locally, are left out.
pub fn build_lookup(fixtures: &[ProviderFixture], held: &HashSet<FixtureId>) -> Vec<LookupEntry> {
    fixtures
        .iter()
        .filter(|f| !held.contains(&f.id))
        .filter_map(|f| {
            Some(LookupEntry {
                id: f.id,
                date: f.civil_date()?,
                home_team: f.home_team.clone(),
                away_team: f.away_team.clone(),
            })
        })
        .collect()
}

/// Same day, home against home and away against away.
pub fn match_fixture(fixture: &Fixture, lookup: &[LookupEntry]) -> MatchOutcome {
    MatchOutcome::from_candidates(
        lookup
            .iter()
            .filter(|entry| {
                entry.date == fixture.date
                    && same_team(&fixture.home_team, &entry.home_team)
                    && same_team(&fixture.away_team, &entry.away_team)
            })
            .map(|entry| entry.id)
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureOutcome {
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    #[serde(flatten)]
    pub outcome: MatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveSummary {
    pub run_id: Uuid,
    pub team: Option<TeamCandidate>,
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub provider_fixtures: usize,
    pub already_resolved: usize,
    pub resolved: usize,
    pub ambiguous: usize,
    pub not_found: usize,
    pub outcomes: Vec<FixtureOutcome>,
    pub ingest_failures: Vec<IngestFailure>,
    pub fixtures_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureFailure {
    pub fixture_id: FixtureId,
    pub message: String,
}

/// A stored fixture row that could not be read. It is written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub index: usize,
    pub fixture_id: Option<FixtureId>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub run_id: Uuid,
    /// Every fixture in the collection, resolved or not.
    pub fixtures_checked: usize,
    pub unresolved_skipped: usize,
    pub settled_skipped: usize,
    pub polled: usize,
    pub missing: usize,
    pub status_changes: usize,
    pub committed: usize,
    pub failures: Vec<FixtureFailure>,
    pub ingest_failures: Vec<IngestFailure>,
    /// Stored result rows without a usable `fixtureId`; not written back.
    pub results_dropped: usize,
    pub results_digest: String,
    pub fixtures_digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub run_id: Uuid,
    pub team: TeamCandidate,
    pub requested: u32,
    pub received: usize,
    pub added: usize,
    pub adopted: usize,
    pub already_known: usize,
    pub skipped: usize,
    pub ingest_failures: Vec<IngestFailure>,
    pub fixtures_digest: Option<String>,
}

/// One row of the fixtures collection as loaded for a pass.
enum StoredFixture {
    Ingested(Fixture),
    Unreadable {
        raw: JsonValue,
        id: Option<FixtureId>,
    },
}

impl StoredFixture {
    fn fixture(&self) -> Option<&Fixture> {
        match self {
            Self::Ingested(fixture) => Some(fixture),
            Self::Unreadable { .. } => None,
        }
    }

    fn fixture_mut(&mut self) -> Option<&mut Fixture> {
        match self {
            Self::Ingested(fixture) => Some(fixture),
            Self::Unreadable { .. } => None,
        }
    }

    /// Held ids include those of unreadable rows so they are never handed out twice.
    fn id(&self) -> Option<FixtureId> {
        match self {
            Self::Ingested(fixture) => fixture.id,
            Self::Unreadable { id, .. } => *id,
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum FixtureRow<'a> {
    Record(FixtureRecord),
    Raw(&'a JsonValue),
}

/// `fixtureId` (or legacy `id`) of a raw row, when it holds a real id.
fn raw_fixture_id(raw: &JsonValue) -> Option<FixtureId> {
    ["fixtureId", "id"]
        .into_iter()
        .filter_map(|key| raw.get(key))
        .find_map(|value| FixtureId::deserialize(value).ok())
        .filter(|id| id.0 != 0)
}

/// Results keyed by fixture id, rebuilt from the store at the start of each pass.
struct ResultIndex {
    rows: Vec<MatchResult>,
    positions: HashMap<FixtureId, usize>,
}

impl ResultIndex {
    fn new(stored: Vec<MatchResult>) -> Self {
        let mut index = Self {
            rows: Vec::with_capacity(stored.len()),
            positions: HashMap::new(),
        };
        for row in stored {
            index.upsert(row);
        }
        index
    }

    fn get(&self, id: FixtureId) -> Option<&MatchResult> {
        self.positions.get(&id).map(|&pos| &self.rows[pos])
    }

    fn upsert(&mut self, row: MatchResult) {
        match self.positions.get(&row.fixture_id) {
            Some(&pos) => self.rows[pos] = row,
            None => {
                self.positions.insert(row.fixture_id, self.rows.len());
                self.rows.push(row);
            }
        }
    }

    fn rows(&self) -> &[MatchResult] {
        &self.rows
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    tz: Tz,
    store: CollectionStore,
    provider: Box<dyn FixtureProvider>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let provider = provider_for_source(&config.source_id, config.provider_config())?;
        Self::with_provider(config, provider)
    }

    pub fn with_provider(
        config: SyncConfig,
        provider: Box<dyn FixtureProvider>,
    ) -> Result<Self, SyncError> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|err| SyncError::Config(format!("timezone `{}`: {err}", config.timezone)))?;
        if config.team.search.trim().is_empty() {
            return Err(SyncError::Config("team search string is empty".to_string()));
        }
        let store = CollectionStore::new(config.fixtures_path.clone(), config.results_path.clone());
        Ok(Self {
            config,
            tz,
            store,
            provider,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fill missing fixture ids from the provider's listing for the local date span.
    pub async fn resolve_identities(&self) -> Result<ResolveSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("resolve", %run_id, source_id = self.provider.source_id());
        async move {
            let _lock = self.lock_pass()?;
            let (mut rows, ingest_failures) = self.load_fixtures().await?;
            let ingested: Vec<&Fixture> = rows.iter().filter_map(StoredFixture::fixture).collect();
            let already_resolved = ingested.iter().filter(|f| f.is_resolved()).count();
            let unresolved = ingested.len() - already_resolved;
            let dates = ingested.iter().map(|f| f.date);
            let window = dates.clone().min().zip(dates.max());

            let mut summary = ResolveSummary {
                run_id,
                team: None,
                window: None,
                provider_fixtures: 0,
                already_resolved,
                resolved: 0,
                ambiguous: 0,
                not_found: 0,
                outcomes: Vec::new(),
                ingest_failures,
                fixtures_digest: None,
            };

            let Some((from, to)) = window else {
                info!("no fixtures stored; nothing to resolve");
                return Ok(summary);
            };
            if unresolved == 0 {
                info!(fixtures = already_resolved, "every fixture already has an id");
                return Ok(summary);
            }

            let team = self.resolve_team().await?;
            let listed = self.provider.list_fixtures(team.id, from, to).await?;
            info!(
                team_id = team.id,
                %from,
                %to,
                listed = listed.len(),
                "fetched provider fixtures"
            );

            let held: HashSet<FixtureId> = rows.iter().filter_map(StoredFixture::id).collect();
            let lookup = build_lookup(&listed, &held);

            let mut pending: Vec<(usize, MatchOutcome)> = rows
                .iter()
                .enumerate()
                .filter_map(|(pos, row)| row.fixture().map(|f| (pos, f)))
                .filter(|(_, f)| !f.is_resolved())
                .map(|(pos, f)| (pos, match_fixture(f, &lookup)))
                .collect();

            // Two local fixtures claiming the same id would break uniqueness; assign neither.
            let mut claims: HashMap<FixtureId, usize> = HashMap::new();
            for id in pending.iter().filter_map(|(_, o)| o.matched_id()) {
                *claims.entry(id).or_default() += 1;
            }
            for (_, outcome) in pending.iter_mut() {
                if let Some(id) = outcome.matched_id() {
                    if claims.get(&id).copied().unwrap_or_default() > 1 {
                        *outcome = MatchOutcome::Ambiguous(vec![id]);
                    }
                }
            }

            for (pos, outcome) in pending {
                let Some(fixture) = rows[pos].fixture_mut() else {
                    continue;
                };
                match &outcome {
                    MatchOutcome::Matched(id) => {
                        if fixture.assign_id(*id) {
                            summary.resolved += 1;
                            info!(
                                fixture = %fixture.label(),
                                fixture_id = %id,
                                "resolved fixture id"
                            );
                        }
                    }
                    MatchOutcome::Ambiguous(ids) => {
                        summary.ambiguous += 1;
                        warn!(
                            fixture = %fixture.label(),
                            candidates = ?ids,
                            "ambiguous match; left unresolved"
                        );
                    }
                    MatchOutcome::NotFound => {
                        summary.not_found += 1;
                        warn!(fixture = %fixture.label(), "no provider fixture matched");
                    }
                }
                summary.outcomes.push(FixtureOutcome {
                    date: fixture.date,
                    home_team: fixture.home_team.clone(),
                    away_team: fixture.away_team.clone(),
                    outcome,
                });
            }

            if summary.resolved > 0 {
                let saved = self.save_fixtures(&rows).await?;
                summary.fixtures_digest = Some(saved.content_hash);
            }
            summary.team = Some(team);
            summary.window = Some((from, to));
            summary.provider_fixtures = listed.len();
            info!(
                resolved = summary.resolved,
                ambiguous = summary.ambiguous,
                not_found = summary.not_found,
                "identity resolution finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// One reconciliation pass. Per-fixture provider failures are collected, not fatal.
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, source_id = self.provider.source_id());
        async move {
            let _lock = self.lock_pass()?;
            let (mut rows, ingest_failures) = self.load_fixtures().await?;
            let (stored, results_dropped) = self.load_results().await?;
            let mut results = ResultIndex::new(stored);

            let mut unresolved_skipped = 0usize;
            let mut settled_skipped = 0usize;
            let mut polled = 0usize;
            let mut missing = 0usize;
            let mut status_changes = 0usize;
            let mut committed = 0usize;
            let mut failures = Vec::new();

            for fixture in rows.iter_mut().filter_map(StoredFixture::fixture_mut) {
                let Some(id) = fixture.id else {
                    unresolved_skipped += 1;
                    continue;
                };
                if results.get(id).is_some_and(MatchResult::is_settled) {
                    settled_skipped += 1;
                    debug!(fixture_id = %id, "result already settled");
                    continue;
                }

                polled += 1;
                let current = match self.provider.fixture_by_id(id).await {
                    Ok(Some(current)) => current,
                    Ok(None) => {
                        missing += 1;
                        warn!(fixture_id = %id, "provider does not know this fixture; skipping");
                        continue;
                    }
                    Err(err) => {
                        warn!(fixture_id = %id, error = %err, "fetch failed; retrying next pass");
                        failures.push(FixtureFailure {
                            fixture_id: id,
                            message: err.to_string(),
                        });
                        continue;
                    }
                };

                let Some(status) = current.status.clone() else {
                    debug!(fixture_id = %id, "provider reported no status");
                    continue;
                };
                if fixture.status.as_ref() != Some(&status) {
                    status_changes += 1;
                    info!(
                        fixture_id = %id,
                        status = %status,
                        in_play = status.is_in_play(),
                        "status changed"
                    );
                }
                fixture.status = Some(status.clone());

                if status.is_finished() {
                    let extra = results.get(id).map(|r| r.extra.clone()).unwrap_or_default();
                    results.upsert(result_row(fixture, id, &current, status, extra));
                    committed += 1;
                    info!(
                        fixture_id = %id,
                        home_score = ?current.home_score,
                        away_score = ?current.away_score,
                        "committed final result"
                    );
                }
            }

            let results_saved = self.store.save(Collection::Results, results.rows()).await?;
            let fixtures_saved = self.save_fixtures(&rows).await?;

            let summary = ReconcileSummary {
                run_id,
                fixtures_checked: rows.len(),
                unresolved_skipped,
                settled_skipped,
                polled,
                missing,
                status_changes,
                committed,
                failures,
                ingest_failures,
                results_dropped,
                results_digest: results_saved.content_hash,
                fixtures_digest: fixtures_saved.content_hash,
            };
            info!(
                checked = summary.fixtures_checked,
                polled = summary.polled,
                committed = summary.committed,
                failures = summary.failures.len(),
                "reconciliation pass finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Merge the team's next `count` fixtures. Known ids are never touched; an
    /// unresolved local fixture that matches exactly one incoming fixture adopts its id.
    pub async fn seed_fixtures(&self, count: u32) -> Result<SeedSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("seed", %run_id, source_id = self.provider.source_id());
        async move {
            let _lock = self.lock_pass()?;
            let (mut rows, ingest_failures) = self.load_fixtures().await?;
            let team = self.resolve_team().await?;
            let upcoming = self.provider.next_fixtures(team.id, count).await?;

            let mut known: HashSet<FixtureId> = rows.iter().filter_map(StoredFixture::id).collect();
            let mut added = 0usize;
            let mut adopted = 0usize;
            let mut already_known = 0usize;
            let mut skipped = 0usize;

            for incoming in &upcoming {
                if known.contains(&incoming.id) {
                    already_known += 1;
                    continue;
                }
                let Some(kickoff) = incoming.kickoff else {
                    warn!(fixture_id = %incoming.id, "incoming fixture has no kickoff; skipped");
                    skipped += 1;
                    continue;
                };

                let lookup = build_lookup(std::slice::from_ref(incoming), &known);
                let local_matches: Vec<usize> = rows
                    .iter()
                    .enumerate()
                    .filter_map(|(pos, row)| row.fixture().map(|f| (pos, f)))
                    .filter(|(_, f)| !f.is_resolved())
                    .filter(|(_, f)| match_fixture(f, &lookup).matched_id().is_some())
                    .map(|(pos, _)| pos)
                    .collect();

                match local_matches.as_slice() {
                    [pos] => {
                        if let Some(fixture) = rows[*pos].fixture_mut() {
                            fixture.assign_id(incoming.id);
                            info!(
                                fixture = %fixture.label(),
                                fixture_id = %incoming.id,
                                "existing fixture adopted id"
                            );
                        }
                        adopted += 1;
                    }
                    [] => {
                        let kickoff_utc = kickoff.with_timezone(&Utc);
                        rows.push(StoredFixture::Ingested(Fixture {
                            id: Some(incoming.id),
                            date: kickoff_utc.with_timezone(&self.tz).date_naive(),
                            kickoff_utc: Some(kickoff_utc),
                            home_team: incoming.home_team.clone(),
                            away_team: incoming.away_team.clone(),
                            competition: incoming.competition.clone(),
                            season: incoming.season.clone(),
                            venue: incoming.venue.clone(),
                            status: incoming.status.clone(),
                            source: Some(self.provider.source_id().to_string()),
                            extra: Map::new(),
                        }));
                        added += 1;
                    }
                    _ => {
                        warn!(fixture_id = %incoming.id, "several local fixtures match; skipped");
                        skipped += 1;
                        continue;
                    }
                }
                known.insert(incoming.id);
            }

            let fixtures_digest = if added + adopted > 0 {
                Some(self.save_fixtures(&rows).await?.content_hash)
            } else {
                None
            };
            info!(added, adopted, already_known, skipped, "seed import finished");
            Ok(SeedSummary {
                run_id,
                team,
                requested: count,
                received: upcoming.len(),
                added,
                adopted,
                already_known,
                skipped,
                ingest_failures,
                fixtures_digest,
            })
        }
        .instrument(span)
        .await
    }

    /// Reconcile on `sync_cron`. A tick that finds the lock held is skipped.
    pub async fn build_scheduler(self: Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.reconcile_once().await {
                    Ok(summary) => info!(
                        committed = summary.committed,
                        polled = summary.polled,
                        "scheduled reconciliation done"
                    ),
                    Err(err) if err.is_locked() => {
                        warn!(error = %err, "previous pass still running; tick skipped")
                    }
                    Err(err) => error!(error = %err, "scheduled reconciliation failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }

    async fn resolve_team(&self) -> Result<TeamCandidate, SyncError> {
        let search = &self.config.team.search;
        let candidates = self.provider.search_team(search).await?;
        let token = self.config.team.token().to_lowercase();
        let chosen = candidates
            .iter()
            .find(|c| c.name.to_lowercase().contains(&token))
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| SyncError::NoTeamCandidates {
                search: search.clone(),
            })?;
        info!(
            team_id = chosen.id,
            team = %chosen.name,
            candidates = candidates.len(),
            "team resolved"
        );
        Ok(chosen)
    }

    fn lock_pass(&self) -> Result<PassLock, SyncError> {
        let lock = PassLock::acquire(&self.config.lock_path)?;
        debug!(lock = %lock.path().display(), "pass lock held");
        Ok(lock)
    }

    /// Rows that cannot be ingested are kept as they are and reported, not fatal.
    async fn load_fixtures(&self) -> Result<(Vec<StoredFixture>, Vec<IngestFailure>), SyncError> {
        let raw_rows: Vec<JsonValue> = self.store.load(Collection::Fixtures).await?;
        let mut rows = Vec::with_capacity(raw_rows.len());
        let mut failures = Vec::new();
        for (index, raw) in raw_rows.into_iter().enumerate() {
            let ingested = serde_json::from_value::<FixtureRecord>(raw.clone())
                .map_err(|err| err.to_string())
                .and_then(|record| {
                    Fixture::from_record(record, self.tz).map_err(|err| err.to_string())
                });
            match ingested {
                Ok(fixture) => rows.push(StoredFixture::Ingested(fixture)),
                Err(message) => {
                    let id = raw_fixture_id(&raw);
                    warn!(
                        index,
                        fixture_id = ?id,
                        error = %message,
                        "fixture row unreadable; kept as is"
                    );
                    failures.push(IngestFailure {
                        index,
                        fixture_id: id,
                        message,
                    });
                    rows.push(StoredFixture::Unreadable { raw, id });
                }
            }
        }
        Ok((rows, failures))
    }

    async fn save_fixtures(&self, rows: &[StoredFixture]) -> Result<SavedCollection, SyncError> {
        let out: Vec<FixtureRow<'_>> = rows
            .iter()
            .map(|row| match row {
                StoredFixture::Ingested(fixture) => FixtureRow::Record(fixture.to_record()),
                StoredFixture::Unreadable { raw, .. } => FixtureRow::Raw(raw),
            })
            .collect();
        Ok(self.store.save(Collection::Fixtures, &out).await?)
    }

    /// Result rows without a usable fixture id cannot be keyed; they are dropped.
    async fn load_results(&self) -> Result<(Vec<MatchResult>, usize), SyncError> {
        let raw_rows: Vec<JsonValue> = self.store.load(Collection::Results).await?;
        let mut rows = Vec::with_capacity(raw_rows.len());
        let mut dropped = 0usize;
        for (index, raw) in raw_rows.into_iter().enumerate() {
            if raw_fixture_id(&raw).is_none() {
                warn!(index, "result row has no fixtureId; dropped");
                dropped += 1;
                continue;
            }
            let row = serde_json::from_value(raw).map_err(|source| StoreError::Decode {
                collection: Collection::Results,
                path: self.config.results_path.clone(),
                source,
            })?;
            rows.push(row);
        }
        Ok((rows, dropped))
    }
}

fn result_row(
    fixture: &Fixture,
    id: FixtureId,
    current: &ProviderFixture,
    status: FixtureStatus,
    extra: Map<String, serde_json::Value>,
) -> MatchResult {
    let name = |provided: &str, local: &str| {
        if provided.trim().is_empty() {
            local.to_string()
        } else {
            provided.to_string()
        }
    };
    MatchResult {
        fixture_id: id,
        date: fixture.date,
        kickoff_utc: current
            .kickoff
            .map(|k| k.with_timezone(&Utc))
            .or(fixture.kickoff_utc),
        home_team: name(&current.home_team, &fixture.home_team),
        away_team: name(&current.away_team, &fixture.away_team),
        home_score: current.home_score,
        away_score: current.away_score,
        status,
        competition: current
            .competition
            .clone()
            .or_else(|| fixture.competition.clone()),
        extra,
    }
}

pub async fn run_resolve_from_env() -> Result<ResolveSummary> {
    let pipeline = SyncPipeline::new(SyncConfig::from_env()).context("configuring sync pipeline")?;
    pipeline
        .resolve_identities()
        .await
        .context("resolving fixture ids")
}

pub async fn run_reconcile_once_from_env() -> Result<ReconcileSummary> {
    let pipeline = SyncPipeline::new(SyncConfig::from_env()).context("configuring sync pipeline")?;
    pipeline.reconcile_once().await.context("reconciling fixtures")
}

pub async fn run_seed_from_env(count: u32) -> Result<SeedSummary> {
    let pipeline = SyncPipeline::new(SyncConfig::from_env()).context("configuring sync pipeline")?;
    pipeline
        .seed_fixtures(count)
        .await
        .context("seeding fixtures")
}

/// Run one pass immediately, then on the cron schedule until Ctrl-C.
pub async fn run_watch_from_env() -> Result<()> {
    let pipeline = Arc::new(
        SyncPipeline::new(SyncConfig::from_env()).context("configuring sync pipeline")?,
    );
    match pipeline.reconcile_once().await {
        Ok(summary) => info!(committed = summary.committed, "initial reconciliation done"),
        Err(err) if err.is_locked() => warn!(error = %err, "initial pass skipped"),
        Err(err) => return Err(err).context("initial reconciliation"),
    }

    let cron = pipeline.config().sync_cron.clone();
    let mut sched = Arc::clone(&pipeline).build_scheduler().await?;
    sched.start().await.context("starting scheduler")?;
    info!(%cron, "watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
