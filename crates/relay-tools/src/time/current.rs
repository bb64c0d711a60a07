use async_trait::async_trait;
use chrono::{Datelike, TimeDelta, Utc};
use chrono_tz::OffsetComponents;
use relay_core::tools::{Tool, ToolError, ToolOutput};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_args, parse_tz, structured, DEFAULT_FORMAT};

const COMMON_TIMEZONES: &[(&str, &[&str])] = &[
    (
        "Asia",
        &[
            "Asia/Shanghai",
            "Asia/Tokyo",
            "Asia/Seoul",
            "Asia/Hong_Kong",
            "Asia/Singapore",
            "Asia/Kolkata",
            "Asia/Dubai",
        ],
    ),
    (
        "Europe",
        &[
            "Europe/London",
            "Europe/Paris",
            "Europe/Berlin",
            "Europe/Moscow",
            "Europe/Rome",
        ],
    ),
    (
        "America",
        &[
            "America/New_York",
            "America/Chicago",
            "America/Denver",
            "America/Los_Angeles",
            "America/Toronto",
            "America/Sao_Paulo",
        ],
    ),
    (
        "Pacific",
        &["Pacific/Auckland", "Australia/Sydney", "Pacific/Honolulu"],
    ),
    ("UTC", &["UTC"]),
];

const WORLD_CLOCK_DEFAULTS: &[&str] = &[
    "UTC",
    "Asia/Shanghai",
    "America/New_York",
    "Europe/London",
    "Asia/Tokyo",
    "Australia/Sydney",
];

#[derive(Deserialize)]
struct CurrentTimeArgs {
    #[serde(default = "utc", alias = "timezone_name")]
    timezone: String,
}

fn utc() -> String {
    "UTC".to_string()
}

/// Current wall-clock time in one timezone.
pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> Option<&str> {
        Some("Get the current time in a timezone (e.g. 'Asia/Shanghai', 'UTC')")
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "timezone": {"type": "string", "default": "UTC"}
            },
            "required": []
        }))
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let args: CurrentTimeArgs = parse_args(arguments)?;
        let tz = parse_tz(&args.timezone)?;
        let now = Utc::now().with_timezone(&tz);

        Ok(structured(json!({
            "timezone": args.timezone,
            "current_time": now.format(DEFAULT_FORMAT).to_string(),
            "iso_format": now.to_rfc3339(),
            "timestamp": now.timestamp(),
            "day_of_week": now.format("%A").to_string(),
            "day_of_year": now.ordinal(),
            "week_number": now.iso_week().week(),
            "is_dst": now.offset().dst_offset() != TimeDelta::zero(),
        })))
    }
}

/// Timezones grouped by region.
pub struct ListCommonTimezones;

#[async_trait]
impl Tool for ListCommonTimezones {
    fn name(&self) -> &str {
        "list_common_timezones"
    }

    fn description(&self) -> Option<&str> {
        Some("List commonly used timezone names grouped by region")
    }

    async fn call(&self, _arguments: Value) -> Result<ToolOutput, ToolError> {
        let mut groups = Map::new();
        let mut total = 0;
        for (region, zones) in COMMON_TIMEZONES {
            total += zones.len();
            groups.insert((*region).to_string(), json!(zones));
        }
        Ok(structured(json!({
            "common_timezones": groups,
            "total_count": total,
            "note": "Use any of these timezone names with 'get_current_time'",
        })))
    }
}

#[derive(Deserialize)]
struct WorldClockArgs {
    #[serde(default)]
    timezones: Option<Vec<String>>,
}

/// Current time across several timezones. Unknown zones are reported
/// per entry instead of failing the whole call.
pub struct WorldClock;

#[async_trait]
impl Tool for WorldClock {
    fn name(&self) -> &str {
        "get_world_clock"
    }

    fn description(&self) -> Option<&str> {
        Some("Get the current time in several timezones at once")
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "timezones": {"type": "array", "items": {"type": "string"}}
            },
            "required": []
        }))
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let args: WorldClockArgs = parse_args(arguments)?;
        let zones = args.timezones.unwrap_or_else(|| {
            WORLD_CLOCK_DEFAULTS.iter().map(|z| z.to_string()).collect()
        });

        let now = Utc::now();
        let mut clock = Map::new();
        for name in &zones {
            let entry = match parse_tz(name) {
                Ok(tz) => {
                    let local = now.with_timezone(&tz);
                    json!({
                        "time": local.format(DEFAULT_FORMAT).to_string(),
                        "iso": local.to_rfc3339(),
                        "day_of_week": local.format("%A").to_string(),
                    })
                }
                Err(e) => json!({ "error": e.to_string() }),
            };
            clock.insert(name.clone(), entry);
        }

        Ok(structured(json!({
            "world_clock": clock,
            "query_time_utc": now.to_rfc3339(),
            "total_timezones": zones.len(),
        })))
    }
}
