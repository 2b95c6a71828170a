//! Per-player aggregation over the match log

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StatsQuery {
    pub user_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Substring of the match's `placeName`
    pub map: Option<String>,
    /// `false` omits the aggregate
    pub stats: Option<String>,
    /// `true` includes the matching matches
    pub matches: Option<String>,
    /// `true` includes the player's command log entries
    pub commands: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct PlayerStats {
    /// Rounded average over numeric samples
    #[serde(rename = "Ping")]
    pub ping: i64,
    #[serde(rename = "Kills")]
    pub kills: f64,
    #[serde(rename = "Deaths")]
    pub deaths: f64,
    /// Minutes, rounded
    #[serde(rename = "playTime")]
    pub play_time: i64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PlayerReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PlayerStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub matches: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub commands: Option<Vec<Value>>,
}

/// Parse the date formats found in match records: epoch seconds, epoch
/// milliseconds, `M/D/Y[ h:m:s]` (UTC), RFC 3339 or `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(n) = raw.parse::<f64>() {
        return from_epoch_number(n);
    }

    let parts: Vec<&str> = raw.split(['/', ' ', ':']).filter(|p| !p.is_empty()).collect();
    if parts.len() >= 3 {
        let nums: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
        if let Some(nums) = nums {
            let (month, day, year) = (nums[0], nums[1], nums[2] as i32);
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            let (h, m, s) = if nums.len() >= 6 {
                (nums[3], nums[4], nums[5])
            } else {
                (0, 0, 0)
            };
            return date.and_hms_opt(h, m, s).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Values between 1e9 and 2e9 are epoch seconds, anything else millis
fn from_epoch_number(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() {
        return None;
    }
    if n > 1_000_000_000.0 && n < 2_000_000_000.0 {
        Utc.timestamp_opt(n as i64, 0).single()
    } else {
        Utc.timestamp_millis_opt(n as i64).single()
    }
}

fn match_date(record: &Value) -> Option<DateTime<Utc>> {
    let raw = ["date", "timestamp", "startTime"]
        .iter()
        .find_map(|f| record.get(*f).filter(|v| !v.is_null()))?;
    match raw {
        Value::Number(n) => n.as_f64().and_then(from_epoch_number),
        Value::String(s) => parse_date(s),
        _ => None,
    }
}

/// Compare object keys or `userId` fields against the requested id
fn same_user(value: &Value, user_id: &str) -> bool {
    match value {
        Value::String(s) => s == user_id,
        Value::Number(n) => n.to_string() == user_id,
        _ => false,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn flag(value: &Option<String>, expected: &str) -> bool {
    value.as_deref() == Some(expected)
}

pub(super) fn aggregate(records: &[Value], query: &StatsQuery) -> PlayerReport {
    let user_id = query.user_id.as_str();
    let from = query.from.as_deref().and_then(parse_date);
    let to = query.to.as_deref().and_then(parse_date);
    let date_filtered = query.from.is_some() || query.to.is_some();

    let mut ping_sum = 0.0;
    let mut ping_samples = 0u32;
    let mut kills = 0.0;
    let mut deaths = 0.0;
    let mut play_secs = 0.0;
    let mut matches = Vec::new();
    let mut commands = Vec::new();

    for record in records {
        if let Some(wanted) = query.map.as_deref().filter(|m| !m.is_empty()) {
            let place = record.get("placeName").and_then(Value::as_str).unwrap_or("");
            if !place.contains(wanted) {
                continue;
            }
        }

        if date_filtered {
            let Some(at) = match_date(record) else {
                continue;
            };
            if from.is_some_and(|f| at < f) || to.is_some_and(|t| at > t) {
                continue;
            }
        }

        let mut involved = false;

        if let Some(row) = record.pointer(&format!("/leaderstats/{}", escape_pointer(user_id))) {
            involved = true;
            if let Some(p) = number(row.get("Ping")) {
                ping_sum += p;
                ping_samples += 1;
            }
            kills += number(row.get("Kills")).unwrap_or(0.0);
            deaths += number(row.get("Deaths")).unwrap_or(0.0);
        }

        if let Some(pt) = record.pointer(&format!("/playTimeList/{}", escape_pointer(user_id))) {
            involved = true;
            play_secs += number(pt.get("defenders")).unwrap_or(0.0);
            play_secs += number(pt.get("attackers")).unwrap_or(0.0);
        }

        if let Some(logs) = record.get("logs").and_then(Value::as_array) {
            let own: Vec<Value> = logs
                .iter()
                .filter(|l| l.get("userId").is_some_and(|u| same_user(u, user_id)))
                .cloned()
                .collect();
            if !own.is_empty() {
                involved = true;
                commands.extend(own);
            }
        }

        if involved {
            matches.push(record.clone());
        }
    }

    let stats = PlayerStats {
        ping: if ping_samples > 0 {
            (ping_sum / ping_samples as f64).round() as i64
        } else {
            0
        },
        kills,
        deaths,
        play_time: (play_secs / 60.0).round() as i64,
    };

    PlayerReport {
        stats: (!flag(&query.stats, "false")).then_some(stats),
        matches: flag(&query.matches, "true").then_some(matches),
        commands: flag(&query.commands, "true").then_some(commands),
    }
}

/// JSON pointer escaping for a single reference token
fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
