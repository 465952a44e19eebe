//! Results-provider contract + the API-Football implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use matchday_core::{FixtureId, FixtureStatus, Season};
use matchday_storage::{FetchError, HttpClientConfig, HttpFetcher};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "matchday-adapters";

pub const API_FOOTBALL: &str = "api-football";
pub const DEFAULT_API_FOOTBALL_BASE: &str = "https://v3.football.api-sports.io";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamCandidate {
    pub id: u64,
    pub name: String,
}

/// A fixture as the provider currently knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFixture {
    pub id: FixtureId,
    /// Kickoff with the offset the provider reported it in.
    pub kickoff: Option<DateTime<FixedOffset>>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub status: Option<FixtureStatus>,
    pub competition: Option<String>,
    pub season: Option<Season>,
    pub venue: Option<String>,
}

impl ProviderFixture {
    /// Calendar day as reported by the provider; time of day is dropped.
    pub fn civil_date(&self) -> Option<NaiveDate> {
        self.kickoff.map(|k| k.date_naive())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("provider reported errors for {endpoint}: {message}")]
    Api {
        endpoint: &'static str,
        message: String,
    },
}

#[async_trait]
pub trait FixtureProvider: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn search_team(&self, name: &str) -> Result<Vec<TeamCandidate>, ProviderError>;

    async fn list_fixtures(
        &self,
        team_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderFixture>, ProviderError>;

    /// `Ok(None)` when the provider no longer knows the id.
    async fn fixture_by_id(&self, id: FixtureId) -> Result<Option<ProviderFixture>, ProviderError>;

    async fn next_fixtures(
        &self,
        team_id: u64,
        count: u32,
    ) -> Result<Vec<ProviderFixture>, ProviderError>;
}

#[async_trait]
impl<P: FixtureProvider + ?Sized> FixtureProvider for Arc<P> {
    fn source_id(&self) -> &'static str {
        (**self).source_id()
    }

    async fn search_team(&self, name: &str) -> Result<Vec<TeamCandidate>, ProviderError> {
        (**self).search_team(name).await
    }

    async fn list_fixtures(
        &self,
        team_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderFixture>, ProviderError> {
        (**self).list_fixtures(team_id, from, to).await
    }

    async fn fixture_by_id(&self, id: FixtureId) -> Result<Option<ProviderFixture>, ProviderError> {
        (**self).fixture_by_id(id).await
    }

    async fn next_fixtures(
        &self,
        team_id: u64,
        count: u32,
    ) -> Result<Vec<ProviderFixture>, ProviderError> {
        (**self).next_fixtures(team_id, count).await
    }
}

#[derive(Debug, Clone)]
pub struct ApiFootballConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub http: HttpClientConfig,
}

impl Default for ApiFootballConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_FOOTBALL_BASE.to_string(),
            api_key: None,
            http: HttpClientConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct ApiFootballClient {
    base_url: String,
    headers: HeaderMap,
    http: HttpFetcher,
}

impl ApiFootballClient {
    /// Fails before any request when the key is missing.
    pub fn new(config: ApiFootballConfig) -> Result<Self, ProviderError> {
        let key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Config("APISPORTS_KEY is missing".to_string()))?;
        let mut key_value = HeaderValue::from_str(key).map_err(|_| {
            ProviderError::Config("APISPORTS_KEY is not a valid header value".into())
        })?;
        key_value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("x-apisports-key", key_value);

        let http = HttpFetcher::new(config.http)
            .map_err(|e| ProviderError::Config(format!("{e:#}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers,
            http,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let fetched = self
            .http
            .fetch_bytes(API_FOOTBALL, &url, query, &self.headers)
            .await?;
        let envelope: Envelope<T> = serde_json::from_slice(&fetched.body)
            .map_err(|source| ProviderError::Decode { endpoint, source })?;
        if let Some(message) = describe_api_errors(&envelope.errors) {
            return Err(ProviderError::Api { endpoint, message });
        }
        debug!(endpoint, items = envelope.response.len(), "provider response");
        Ok(envelope.response)
    }
}

#[async_trait]
impl FixtureProvider for ApiFootballClient {
    fn source_id(&self) -> &'static str {
        API_FOOTBALL
    }

    async fn search_team(&self, name: &str) -> Result<Vec<TeamCandidate>, ProviderError> {
        let items: Vec<ApiTeamItem> = self.get("teams", &[("search", name.to_string())]).await?;
        Ok(items
            .into_iter()
            .map(|item| TeamCandidate {
                id: item.team.id,
                name: item.team.name,
            })
            .collect())
    }

    async fn list_fixtures(
        &self,
        team_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderFixture>, ProviderError> {
        let items: Vec<ApiFixtureItem> = self
            .get(
                "fixtures",
                &[
                    ("team", team_id.to_string()),
                    ("from", from.format("%Y-%m-%d").to_string()),
                    ("to", to.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;
        Ok(items.into_iter().map(ProviderFixture::from).collect())
    }

    async fn fixture_by_id(&self, id: FixtureId) -> Result<Option<ProviderFixture>, ProviderError> {
        let items: Vec<ApiFixtureItem> = self.get("fixtures", &[("id", id.to_string())]).await?;
        Ok(items.into_iter().next().map(ProviderFixture::from))
    }

    async fn next_fixtures(
        &self,
        team_id: u64,
        count: u32,
    ) -> Result<Vec<ProviderFixture>, ProviderError> {
        let items: Vec<ApiFixtureItem> = self
            .get(
                "fixtures",
                &[("team", team_id.to_string()), ("next", count.to_string())],
            )
            .await?;
        Ok(items.into_iter().map(ProviderFixture::from).collect())
    }
}

pub fn provider_for_source(
    source_id: &str,
    config: ApiFootballConfig,
) -> Result<Box<dyn FixtureProvider>, ProviderError> {
    match source_id {
        API_FOOTBALL => Ok(Box::new(ApiFootballClient::new(config)?)),
        other => Err(ProviderError::Config(format!("no provider registered for `{other}`"))),
    }
}

/// API-Football answers 200 with `errors` populated (object or array) on key/quota problems.
fn describe_api_errors(errors: &JsonValue) -> Option<String> {
    let text = |v: &JsonValue| v.as_str().map(ToString::to_string).unwrap_or_else(|| v.to_string());
    match errors {
        JsonValue::Object(map) if !map.is_empty() => Some(
            map.iter()
                .map(|(k, v)| format!("{k}: {}", text(v)))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        JsonValue::Array(items) if !items.is_empty() => {
            Some(items.iter().map(text).collect::<Vec<_>>().join("; "))
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    errors: JsonValue,
    #[serde(default = "Vec::new")]
    response: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiTeamItem {
    team: ApiTeam,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    id: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiFixtureItem {
    fixture: ApiFixture,
    #[serde(default)]
    league: ApiLeague,
    #[serde(default)]
    teams: ApiTeams,
    #[serde(default)]
    goals: ApiGoals,
}

#[derive(Debug, Deserialize)]
struct ApiFixture {
    id: FixtureId,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    venue: Option<ApiNamed>,
    #[serde(default)]
    status: Option<ApiStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    short: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiLeague {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    season: Option<Season>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiTeams {
    #[serde(default)]
    home: Option<ApiNamed>,
    #[serde(default)]
    away: Option<ApiNamed>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiGoals {
    #[serde(default)]
    home: Option<u32>,
    #[serde(default)]
    away: Option<u32>,
}

impl From<ApiFixtureItem> for ProviderFixture {
    fn from(item: ApiFixtureItem) -> Self {
        let kickoff = item.fixture.date.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map_err(|err| {
                    debug!(
                        fixture_id = %item.fixture.id,
                        raw,
                        error = %err,
                        "unparseable kickoff"
                    )
                })
                .ok()
        });
        let side = |named: Option<ApiNamed>| named.and_then(|n| n.name).unwrap_or_default();
        Self {
            id: item.fixture.id,
            kickoff,
            home_team: side(item.teams.home),
            away_team: side(item.teams.away),
            home_score: item.goals.home,
            away_score: item.goals.away,
            status: item
                .fixture
                .status
                .and_then(|s| s.short)
                .filter(|s| !s.trim().is_empty())
                .map(|s| FixtureStatus::from_code(&s)),
            competition: item.league.name,
            season: item.league.season,
            venue: item.fixture.venue.and_then(|v| v.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_key_is_a_config_error() {
        let err = ApiFootballClient::new(ApiFootballConfig::default()).unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
        let blank = ApiFootballConfig {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(
            ApiFootballClient::new(blank).unwrap_err(),
            ProviderError::Config(_)
        ));
    }

    #[test]
    fn unknown_source_is_rejected() {
        let config = ApiFootballConfig {
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert!(provider_for_source("thesportsdb", config.clone()).is_err());
        assert_eq!(
            provider_for_source(API_FOOTBALL, config).unwrap().source_id(),
            API_FOOTBALL
        );
    }

    #[test]
    fn api_errors_accept_object_and_array_shapes() {
        assert_eq!(describe_api_errors(&json!([])), None);
        assert_eq!(describe_api_errors(&json!({})), None);
        assert_eq!(describe_api_errors(&JsonValue::Null), None);
        assert_eq!(
            describe_api_errors(&json!({
                "requests": "You have reached the request limit for the day"
            })),
            Some("requests: You have reached the request limit for the day".to_string())
        );
        assert_eq!(
            describe_api_errors(&json!(["bad season"])),
            Some("bad season".to_string())
        );
    }

    #[test]
    fn fixture_items_map_to_provider_fixtures() {
        let item: ApiFixtureItem = serde_json::from_value(json!({
            "fixture": {
                "id": 1208101,
                "date": "2026-03-01T23:45:00-01:00",
                "venue": {"name": "Kenilworth Road"},
                "status": {"short": "FT"}
            },
            "league": {"name": "League One", "season": 2025},
            "teams": {"home": {"name": "Luton Town"}, "away": {"name": "Derby County"}},
            "goals": {"home": 2, "away": 1}
        }))
        .unwrap();
        let fx = ProviderFixture::from(item);
        assert_eq!(fx.id, FixtureId(1208101));
        assert_eq!(fx.civil_date(), NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(fx.status, Some(FixtureStatus::FullTime));
        assert_eq!((fx.home_score, fx.away_score), (Some(2), Some(1)));
        assert_eq!(fx.season, Some(Season::Year(2025)));
        assert_eq!(fx.venue.as_deref(), Some("Kenilworth Road"));
    }

    #[test]
    fn sparse_fixture_items_still_decode() {
        let item: ApiFixtureItem = serde_json::from_value(json!({
            "fixture": {"id": 5, "date": null, "status": {"short": null}}
        }))
        .unwrap();
        let fx = ProviderFixture::from(item);
        assert_eq!(fx.kickoff, None);
        assert_eq!(fx.status, None);
        assert_eq!(fx.home_team, "");
    }
}
