//! Time query tools backed by the IANA database in `chrono-tz`.

mod convert;
mod current;

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use relay_core::tools::{ContentBlock, Tool, ToolError, ToolOutput};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use convert::{ConvertTime, TimeDifference};
pub use current::{GetCurrentTime, ListCommonTimezones, WorldClock};

pub(crate) const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) const SUPPORTED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%H:%M:%S",
    "%H:%M",
];

/// Every time tool, ready to register.
pub fn time_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetCurrentTime),
        Arc::new(ListCommonTimezones),
        Arc::new(ConvertTime),
        Arc::new(TimeDifference),
        Arc::new(WorldClock),
    ]
}

pub(crate) fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Resolve a timezone name. `utc` is accepted in any case.
pub(crate) fn parse_tz(name: &str) -> Result<Tz, ToolError> {
    if name.eq_ignore_ascii_case("utc") {
        return Ok(chrono_tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|e| ToolError::InvalidArguments(format!("invalid timezone '{name}': {e}")))
}

/// Parse a wall-clock time in `tz`. Date-only input means midnight; time-only
/// input means that time today in `tz`.
pub(crate) fn parse_local(input: &str, format: &str, tz: &Tz) -> Result<DateTime<Tz>, ToolError> {
    let naive = NaiveDateTime::parse_from_str(input, format)
        .or_else(|_| NaiveDate::parse_from_str(input, format).map(|d| d.and_time(NaiveTime::MIN)))
        .or_else(|_| {
            NaiveTime::parse_from_str(input, format)
                .map(|t| Utc::now().with_timezone(tz).date_naive().and_time(t))
        })
        .map_err(|e| {
            ToolError::InvalidArguments(format!(
                "cannot parse '{input}' with format '{format}': {e} (supported: {})",
                SUPPORTED_FORMATS.join(", ")
            ))
        })?;
    tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
        ToolError::InvalidArguments(format!("'{input}' does not exist in timezone {tz}"))
    })
}

/// Render with a caller-supplied format without panicking on bad specifiers.
pub(crate) fn format_with<Z: TimeZone>(dt: &DateTime<Z>, format: &str) -> Result<String, ToolError>
where
    Z::Offset: std::fmt::Display,
{
    let mut out = String::new();
    write!(out, "{}", dt.format(format))
        .map_err(|_| ToolError::InvalidArguments(format!("invalid format string '{format}'")))?;
    Ok(out)
}

/// `1 day, 2:03:04` style rendering of a signed duration. Days are floored,
/// so the clock part is never negative: minus one hour is `-1 day, 23:00:00`.
pub(crate) fn human_duration(delta: TimeDelta) -> String {
    let (days, secs) = floor_days(delta);
    let clock = format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
    let clock = match floor_micros(delta) {
        0 => clock,
        micros => format!("{clock}.{micros:06}"),
    };
    match days {
        0 => clock,
        1 | -1 => format!("{days} day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// Whole days, rounded towards negative infinity, and the seconds left over.
pub(crate) fn floor_days(delta: TimeDelta) -> (i64, i64) {
    let secs = floor_seconds(delta);
    (secs.div_euclid(86_400), secs.rem_euclid(86_400))
}

fn floor_seconds(delta: TimeDelta) -> i64 {
    let secs = delta.num_seconds();
    if delta.subsec_nanos() < 0 {
        secs - 1
    } else {
        secs
    }
}

fn floor_micros(delta: TimeDelta) -> i32 {
    let nanos = delta.subsec_nanos();
    let nanos = if nanos < 0 { nanos + 1_000_000_000 } else { nanos };
    nanos / 1000
}

/// Wrap a JSON payload as text content plus structured content.
pub(crate) fn structured(value: Value) -> ToolOutput {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    ToolOutput::Structured {
        content: vec![ContentBlock::text(text)],
        structured: value,
    }
}
