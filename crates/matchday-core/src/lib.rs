//! Core fixture/result model and team matching rules for matchday.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub const CRATE_NAME: &str = "matchday-core";

/// Canonical provider identifier for a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureId(pub u64);

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FixtureId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(FixtureId)
    }
}

impl Serialize for FixtureId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

/// Ids arrive as JSON numbers from one provider and numeric strings from another.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for FixtureId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(FixtureId(n)),
            RawId::Text(s) => s
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid fixture id `{s}`"))),
        }
    }
}

/// Blank strings and zero mean "not resolved yet" in legacy fixture files.
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<FixtureId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        None | Some(RawId::Number(0)) => Ok(None),
        Some(RawId::Number(n)) => Ok(Some(FixtureId(n))),
        Some(RawId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawId::Text(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid fixture id `{s}`"))),
    }
}

/// Explicit `null` reads as the default, same as an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Short status codes as reported by the provider (`NS`, `1H`, `HT`, `FT`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FixtureStatus {
    TimeToBeDefined,
    NotStarted,
    FirstHalf,
    HalfTime,
    SecondHalf,
    ExtraTime,
    BreakTime,
    PenaltiesInProgress,
    Suspended,
    Interrupted,
    FullTime,
    AfterExtraTime,
    FinishedOnPenalties,
    Postponed,
    Cancelled,
    Abandoned,
    TechnicalLoss,
    WalkOver,
    Live,
    Other(String),
}

impl FixtureStatus {
    pub fn from_code(code: &str) -> Self {
        let trimmed = code.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "TBD" => Self::TimeToBeDefined,
            "NS" => Self::NotStarted,
            "1H" => Self::FirstHalf,
            "HT" => Self::HalfTime,
            "2H" => Self::SecondHalf,
            "ET" => Self::ExtraTime,
            "BT" => Self::BreakTime,
            "P" => Self::PenaltiesInProgress,
            "SUSP" => Self::Suspended,
            "INT" => Self::Interrupted,
            "FT" => Self::FullTime,
            "AET" => Self::AfterExtraTime,
            "PEN" => Self::FinishedOnPenalties,
            "PST" => Self::Postponed,
            "CANC" => Self::Cancelled,
            "ABD" => Self::Abandoned,
            "AWD" => Self::TechnicalLoss,
            "WO" => Self::WalkOver,
            "LIVE" => Self::Live,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::TimeToBeDefined => "TBD",
            Self::NotStarted => "NS",
            Self::FirstHalf => "1H",
            Self::HalfTime => "HT",
            Self::SecondHalf => "2H",
            Self::ExtraTime => "ET",
            Self::BreakTime => "BT",
            Self::PenaltiesInProgress => "P",
            Self::Suspended => "SUSP",
            Self::Interrupted => "INT",
            Self::FullTime => "FT",
            Self::AfterExtraTime => "AET",
            Self::FinishedOnPenalties => "PEN",
            Self::Postponed => "PST",
            Self::Cancelled => "CANC",
            Self::Abandoned => "ABD",
            Self::TechnicalLoss => "AWD",
            Self::WalkOver => "WO",
            Self::Live => "LIVE",
            Self::Other(code) => code,
        }
    }

    /// Terminal statuses: the match has concluded and a result may be committed.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::FullTime | Self::AfterExtraTime | Self::FinishedOnPenalties
        )
    }

    pub fn is_in_play(&self) -> bool {
        matches!(
            self,
            Self::FirstHalf
                | Self::HalfTime
                | Self::SecondHalf
                | Self::ExtraTime
                | Self::BreakTime
                | Self::PenaltiesInProgress
                | Self::Suspended
                | Self::Interrupted
                | Self::Live
        )
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for FixtureStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for FixtureStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::from_code(&code))
    }
}

/// Seasons are a start year for one provider and a label like `2025-2026` for another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Season {
    Year(i32),
    Label(String),
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (its provider-local calendar day).
pub fn parse_civil_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

mod civil_date {
    use super::*;

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format("%Y-%m-%d"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_civil_date(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date `{raw}`")))
    }

    pub fn serialize_opt<S: Serializer>(
        date: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serialize(date, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_civil_date(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date `{raw}`"))),
        }
    }
}

/// On-disk fixture shape. Tolerates every layout the fixture pool has been written in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureRecord {
    #[serde(
        rename = "fixtureId",
        alias = "id",
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub fixture_id: Option<FixtureId>,
    #[serde(
        default,
        serialize_with = "civil_date::serialize_opt",
        deserialize_with = "civil_date::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<NaiveDate>,
    /// Local wall-clock kickoff paired with `date`; folded into `kickoffUTC` on ingestion.
    #[serde(default, skip_serializing)]
    pub time: Option<String>,
    #[serde(rename = "kickoffUTC", default, skip_serializing_if = "Option::is_none")]
    pub kickoff_utc: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub home_team: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub away_team: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FixtureStatus>,
    /// Provider spelling of `status`; `status` wins when a row carries both.
    #[serde(rename = "statusShort", default, skip_serializing)]
    pub status_short: Option<FixtureStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fixture {home} vs {away} has neither a date nor a kickoff")]
    MissingDate { home: String, away: String },
    #[error("invalid kickoff instant `{value}`")]
    InvalidKickoff { value: String },
    #[error("invalid local kickoff time `{value}`")]
    InvalidTime { value: String },
    #[error("local kickoff {date} {time} does not exist in {tz}")]
    NonexistentLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        tz: String,
    },
}

/// A locally tracked fixture with a single, unified kickoff representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub id: Option<FixtureId>,
    pub date: NaiveDate,
    pub kickoff_utc: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub competition: Option<String>,
    pub season: Option<Season>,
    pub venue: Option<String>,
    pub status: Option<FixtureStatus>,
    pub source: Option<String>,
    pub extra: Map<String, JsonValue>,
}

impl Fixture {
    /// Unify the stored record. `kickoffUTC` wins; otherwise `date` + `time` are
    /// read as wall-clock time in `tz`.
    pub fn from_record(record: FixtureRecord, tz: Tz) -> Result<Self, IngestError> {
        let kickoff_raw = record
            .kickoff_utc
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let time_raw = record
            .time
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let kickoff_utc = match (kickoff_raw, record.date, time_raw) {
            (Some(raw), _, _) => Some(parse_instant(raw)?),
            (None, Some(date), Some(time)) => Some(local_kickoff(date, time, tz)?),
            _ => None,
        };

        let date = match (record.date, kickoff_utc) {
            (Some(date), _) => date,
            (None, Some(kickoff)) => kickoff.with_timezone(&tz).date_naive(),
            (None, None) => {
                return Err(IngestError::MissingDate {
                    home: record.home_team,
                    away: record.away_team,
                })
            }
        };

        Ok(Self {
            id: record.fixture_id,
            date,
            kickoff_utc,
            home_team: record.home_team,
            away_team: record.away_team,
            competition: record.competition,
            season: record.season,
            venue: record.venue,
            status: record.status.or(record.status_short),
            source: record.source,
            extra: record.extra,
        })
    }

    pub fn to_record(&self) -> FixtureRecord {
        FixtureRecord {
            fixture_id: self.id,
            date: Some(self.date),
            time: None,
            kickoff_utc: self
                .kickoff_utc
                .map(|k| k.to_rfc3339_opts(SecondsFormat::Secs, true)),
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            competition: self.competition.clone(),
            season: self.season.clone(),
            venue: self.venue.clone(),
            status: self.status.clone(),
            status_short: None,
            source: self.source.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }

    /// Fill the canonical id. An id, once set, is never reassigned.
    pub fn assign_id(&mut self, id: FixtureId) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    pub fn label(&self) -> String {
        format!("{} {} vs {}", self.date, self.home_team, self.away_team)
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, IngestError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .map_err(|_| IngestError::InvalidKickoff {
            value: raw.to_string(),
        })
}

fn local_kickoff(date: NaiveDate, time: &str, tz: Tz) -> Result<DateTime<Utc>, IngestError> {
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .map_err(|_| IngestError::InvalidTime {
            value: time.to_string(),
        })?;
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| IngestError::NonexistentLocalTime {
            date,
            time,
            tz: tz.name().to_string(),
        })
}

/// Finalized outcome of a fixture, keyed by its canonical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    #[serde(rename = "fixtureId", alias = "id")]
    pub fixture_id: FixtureId,
    #[serde(with = "civil_date")]
    pub date: NaiveDate,
    #[serde(rename = "kickoffUTC", default, skip_serializing_if = "Option::is_none")]
    pub kickoff_utc: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub home_team: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub away_team: String,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    pub status: FixtureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl MatchResult {
    /// A settled result is never revisited by later reconciliation passes.
    pub fn is_settled(&self) -> bool {
        self.status.is_finished()
    }
}

/// Lower-case, drop `fc` and `.`, turn `-` into a space, trim.
pub fn normalize_team_name(name: &str) -> String {
    name.to_lowercase()
        .replace("fc", "")
        .replace('.', "")
        .replace('-', " ")
        .trim()
        .to_string()
}

/// Permissive equality: identical after normalization, or one contains the other.
pub fn same_team(a: &str, b: &str) -> bool {
    let a = normalize_team_name(a);
    let b = normalize_team_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a)
}

/// Outcome of matching one local fixture against provider candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "ids", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(FixtureId),
    Ambiguous(Vec<FixtureId>),
    NotFound,
}

impl MatchOutcome {
    pub fn from_candidates(mut ids: Vec<FixtureId>) -> Self {
        ids.sort();
        ids.dedup();
        match ids.as_slice() {
            [] => Self::NotFound,
            [only] => Self::Matched(*only),
            _ => Self::Ambiguous(ids),
        }
    }

    pub fn matched_id(&self) -> Option<FixtureId> {
        match self {
            Self::Matched(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::London;
    use serde_json::json;

    fn record(value: JsonValue) -> FixtureRecord {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn normalization_strips_club_suffixes_and_punctuation() {
        assert_eq!(normalize_team_name("  Luton Town FC "), "luton town");
        assert_eq!(normalize_team_name("A.F.C. Bournemouth"), "afc bournemouth");
        assert_eq!(normalize_team_name("Stoke-on-Trent"), "stoke on trent");
    }

    #[test]
    fn same_team_accepts_prefix_and_suffix_variants() {
        assert!(same_team("Luton", "Luton Town"));
        assert!(same_team("Derby County", "Derby"));
        assert!(same_team("Wycombe", "wycombe"));
        assert!(!same_team("Luton", "Derby County"));
    }

    #[test]
    fn empty_normalized_names_never_match() {
        assert!(!same_team("FC", "Luton Town"));
        assert!(!same_team("", ""));
    }

    #[test]
    fn status_codes_round_trip_and_finished_set() {
        for code in ["NS", "1H", "HT", "2H", "FT", "AET", "PEN", "PST", "CANC"] {
            assert_eq!(FixtureStatus::from_code(code).code(), code);
        }
        assert!(FixtureStatus::from_code("ft").is_finished());
        assert!(FixtureStatus::AfterExtraTime.is_finished());
        assert!(!FixtureStatus::Postponed.is_finished());
        assert!(!FixtureStatus::HalfTime.is_finished());
        assert!(FixtureStatus::HalfTime.is_in_play());
        assert_eq!(
            FixtureStatus::from_code("XYZ"),
            FixtureStatus::Other("XYZ".into())
        );
    }

    #[test]
    fn kickoff_instant_wins_and_derives_date() {
        let rec = record(json!({
            "fixtureId": 1208021,
            "kickoffUTC": "2026-03-01T15:00:00+00:00",
            "homeTeam": "Luton Town",
            "awayTeam": "Derby County",
            "statusShort": "NS",
            "source": "api-football"
        }));
        let fx = Fixture::from_record(rec, London).unwrap();
        assert_eq!(fx.id, Some(FixtureId(1208021)));
        assert_eq!(fx.date, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(
            fx.kickoff_utc,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap())
        );
        assert_eq!(fx.status, Some(FixtureStatus::NotStarted));
    }

    #[test]
    fn status_wins_over_status_short_when_both_are_present() {
        let rec = record(json!({
            "fixtureId": 1208021,
            "date": "2026-03-01",
            "homeTeam": "Luton Town",
            "awayTeam": "Derby County",
            "statusShort": "NS",
            "status": "FT"
        }));
        let fx = Fixture::from_record(rec, London).unwrap();
        assert_eq!(fx.status, Some(FixtureStatus::FullTime));

        let out = serde_json::to_value(fx.to_record()).unwrap();
        assert_eq!(out["status"], "FT");
        assert!(out.get("statusShort").is_none());
    }

    #[test]
    fn null_team_names_read_as_blank() {
        let rec = record(json!({
            "fixtureId": 7,
            "date": "2026-03-01",
            "homeTeam": null,
            "awayTeam": "Derby"
        }));
        assert_eq!(rec.home_team, "");
        assert_eq!(rec.away_team, "Derby");

        let result: MatchResult = serde_json::from_value(json!({
            "fixtureId": 7,
            "date": "2026-03-01",
            "homeTeam": "Luton",
            "awayTeam": null,
            "status": "NS"
        }))
        .unwrap();
        assert_eq!(result.away_team, "");
        assert!(!result.is_settled());
    }

    #[test]
    fn local_date_and_time_respect_british_summer_time() {
        let winter = record(json!({"date": "2026-03-01", "time": "15:00", "homeTeam": "Luton", "awayTeam": "Derby"}));
        let summer = record(json!({"date": "2026-04-11", "time": "15:00", "homeTeam": "Luton", "awayTeam": "Derby"}));
        let winter = Fixture::from_record(winter, London).unwrap();
        let summer = Fixture::from_record(summer, London).unwrap();
        assert_eq!(
            winter.kickoff_utc,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap())
        );
        assert_eq!(
            summer.kickoff_utc,
            Some(Utc.with_ymd_and_hms(2026, 4, 11, 14, 0, 0).unwrap())
        );
        assert_eq!(summer.id, None);
    }

    #[test]
    fn late_utc_kickoff_lands_on_local_civil_day() {
        let rec = record(json!({"kickoffUTC": "2026-07-10T23:30:00Z", "homeTeam": "A", "awayTeam": "B"}));
        let fx = Fixture::from_record(rec, London).unwrap();
        assert_eq!(fx.date, NaiveDate::from_ymd_opt(2026, 7, 11).unwrap());
    }

    #[test]
    fn gap_time_and_missing_date_are_ingest_errors() {
        let gap = record(json!({"date": "2026-03-29", "time": "01:30", "homeTeam": "A", "awayTeam": "B"}));
        assert!(matches!(
            Fixture::from_record(gap, London),
            Err(IngestError::NonexistentLocalTime { .. })
        ));
        let bare = record(json!({"homeTeam": "A", "awayTeam": "B"}));
        assert!(matches!(
            Fixture::from_record(bare, London),
            Err(IngestError::MissingDate { .. })
        ));
    }

    #[test]
    fn repeated_autumn_hour_takes_the_summer_time_instant() {
        let rec = record(json!({
            "date": "2026-10-25",
            "time": "01:30",
            "homeTeam": "Luton",
            "awayTeam": "Derby"
        }));
        let fx = Fixture::from_record(rec, London).unwrap();
        assert_eq!(
            fx.kickoff_utc,
            Some(Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap())
        );
        assert_eq!(fx.date, NaiveDate::from_ymd_opt(2026, 10, 25).unwrap());
    }

    #[test]
    fn legacy_ids_are_tolerated() {
        let text = record(json!({"fixtureId": "2046113", "date": "2026-03-01", "homeTeam": "A", "awayTeam": "B"}));
        assert_eq!(text.fixture_id, Some(FixtureId(2046113)));
        let blank = record(json!({"fixtureId": "", "date": "2026-03-01", "homeTeam": "A", "awayTeam": "B"}));
        assert_eq!(blank.fixture_id, None);
        let null = record(json!({"fixtureId": null, "date": "2026-03-01", "homeTeam": "A", "awayTeam": "B"}));
        assert_eq!(null.fixture_id, None);
    }

    #[test]
    fn unknown_fields_survive_and_time_is_folded_into_kickoff() {
        let rec = record(json!({
            "date": "2026-03-01",
            "time": "15:00",
            "homeTeam": "Luton",
            "awayTeam": "Derby",
            "tvChannel": "Sky Sports"
        }));
        let fx = Fixture::from_record(rec, London).unwrap();
        let out = serde_json::to_value(fx.to_record()).unwrap();
        assert_eq!(out["tvChannel"], "Sky Sports");
        assert_eq!(out["kickoffUTC"], "2026-03-01T15:00:00Z");
        assert!(out.get("time").is_none());
        assert!(out.get("fixtureId").is_none());
    }

    #[test]
    fn assign_id_never_overwrites() {
        let rec = record(json!({"fixtureId": 7, "date": "2026-03-01", "homeTeam": "A", "awayTeam": "B"}));
        let mut fx = Fixture::from_record(rec, London).unwrap();
        assert!(!fx.assign_id(FixtureId(8)));
        assert_eq!(fx.id, Some(FixtureId(7)));
    }

    #[test]
    fn match_outcome_from_candidates() {
        assert_eq!(MatchOutcome::from_candidates(vec![]), MatchOutcome::NotFound);
        assert_eq!(
            MatchOutcome::from_candidates(vec![FixtureId(4), FixtureId(4)]),
            MatchOutcome::Matched(FixtureId(4))
        );
        assert_eq!(
            MatchOutcome::from_candidates(vec![FixtureId(9), FixtureId(4)]),
            MatchOutcome::Ambiguous(vec![FixtureId(4), FixtureId(9)])
        );
    }

    #[test]
    fn legacy_result_dates_accept_full_timestamps() {
        let result: MatchResult = serde_json::from_value(json!({
            "fixtureId": 11,
            "date": "2026-03-01T15:00:00+00:00",
            "homeTeam": "Luton Town",
            "awayTeam": "Derby County",
            "homeScore": 2,
            "awayScore": 1,
            "status": "FT"
        }))
        .unwrap();
        assert_eq!(result.date, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert!(result.is_settled());
        let out = serde_json::to_value(&result).unwrap();
        assert_eq!(out["date"], "2026-03-01");
        assert_eq!(out["status"], "FT");
    }
}
