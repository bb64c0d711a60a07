use async_trait::async_trait;
use relay_core::tools::{Tool, ToolError, ToolOutput};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    floor_days, format_with, human_duration, parse_args, parse_local, parse_tz, structured,
};

fn default_format() -> String {
    super::DEFAULT_FORMAT.to_string()
}

fn utc() -> String {
    "UTC".to_string()
}

#[derive(Deserialize)]
struct ConvertArgs {
    time_str: String,
    from_timezone: String,
    to_timezone: String,
    #[serde(default = "default_format")]
    format_str: String,
}

/// Re-express a wall-clock time from one timezone in another.
pub struct ConvertTime;

#[async_trait]
impl Tool for ConvertTime {
    fn name(&self) -> &str {
        "convert_time"
    }

    fn description(&self) -> Option<&str> {
        Some("Convert a time from one timezone to another")
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "time_str": {"type": "string"},
                "from_timezone": {"type": "string"},
                "to_timezone": {"type": "string"},
                "format_str": {"type": "string", "default": super::DEFAULT_FORMAT}
            },
            "required": ["time_str", "from_timezone", "to_timezone"]
        }))
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let args: ConvertArgs = parse_args(arguments)?;
        let from_tz = parse_tz(&args.from_timezone)?;
        let to_tz = parse_tz(&args.to_timezone)?;

        let source = parse_local(&args.time_str, &args.format_str, &from_tz)?;
        let converted = source.with_timezone(&to_tz);
        let offset_change = converted.naive_local() - source.naive_local();

        Ok(structured(json!({
            "original_time": args.time_str,
            "original_timezone": args.from_timezone,
            "converted_time": format_with(&converted, &args.format_str)?,
            "converted_timezone": args.to_timezone,
            "iso_format": converted.to_rfc3339(),
            "timestamp": converted.timestamp(),
            "time_difference": human_duration(offset_change),
        })))
    }
}

#[derive(Deserialize)]
struct DifferenceArgs {
    time1: String,
    time2: String,
    #[serde(default = "utc")]
    timezone1: String,
    #[serde(default = "utc")]
    timezone2: String,
    #[serde(default = "default_format")]
    format_str: String,
}

/// Signed span from `time1` to `time2`, each read in its own timezone.
pub struct TimeDifference;

#[async_trait]
impl Tool for TimeDifference {
    fn name(&self) -> &str {
        "time_difference"
    }

    fn description(&self) -> Option<&str> {
        Some("Calculate the difference between two times")
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "time1": {"type": "string"},
                "time2": {"type": "string"},
                "timezone1": {"type": "string", "default": "UTC"},
                "timezone2": {"type": "string", "default": "UTC"},
                "format_str": {"type": "string", "default": super::DEFAULT_FORMAT}
            },
            "required": ["time1", "time2"]
        }))
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let args: DifferenceArgs = parse_args(arguments)?;
        let first = parse_local(&args.time1, &args.format_str, &parse_tz(&args.timezone1)?)?;
        let second = parse_local(&args.time2, &args.format_str, &parse_tz(&args.timezone2)?)?;

        let diff = second.signed_duration_since(first);
        let seconds = diff.num_milliseconds() as f64 / 1000.0;
        let (days, _) = floor_days(diff);

        Ok(structured(json!({
            "time1": args.time1,
            "timezone1": args.timezone1,
            "time2": args.time2,
            "timezone2": args.timezone2,
            "difference_seconds": seconds,
            "difference_days": days,
            "difference_hours": seconds / 3600.0,
            "difference_minutes": seconds / 60.0,
            "human_readable": human_duration(diff),
            "is_positive": seconds > 0.0,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn payload(output: ToolOutput) -> Value {
        match output {
            ToolOutput::Structured { structured, .. } => structured,
            other => panic!("expected structured output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn converts_between_zones() {
        let out = payload(
            ConvertTime
                .call(json!({
                    "time_str": "2024-01-15 09:00:00",
                    "from_timezone": "Asia/Shanghai",
                    "to_timezone": "Europe/London"
                }))
                .await
                .unwrap(),
        );
        assert_eq!(out["converted_time"], "2024-01-15 01:00:00");
        assert_eq!(out["iso_format"], "2024-01-15T01:00:00+00:00");
        assert_eq!(out["time_difference"], "-1 day, 16:00:00");
    }

    #[tokio::test]
    async fn convert_honours_custom_format() {
        let out = payload(
            ConvertTime
                .call(json!({
                    "time_str": "2024-07-04 12:00",
                    "from_timezone": "UTC",
                    "to_timezone": "America/New_York",
                    "format_str": "%Y-%m-%d %H:%M"
                }))
                .await
                .unwrap(),
        );
        assert_eq!(out["converted_time"], "2024-07-04 08:00");
    }

    #[tokio::test]
    async fn convert_requires_arguments() {
        let err = ConvertTime.call(json!({"time_str": "x"})).await.unwrap_err();
        assert_matches!(err, ToolError::InvalidArguments(msg) if msg.contains("from_timezone"));
    }

    #[tokio::test]
    async fn difference_across_zones() {
        let out = payload(
            TimeDifference
                .call(json!({
                    "time1": "2024-01-01 00:00:00",
                    "time2": "2024-01-01 09:00:00",
                    "timezone2": "Asia/Tokyo"
                }))
                .await
                .unwrap(),
        );
        // 09:00 in Tokyo is 00:00 UTC.
        assert_eq!(out["difference_seconds"], 0.0);
        assert_eq!(out["is_positive"], false);
    }

    #[tokio::test]
    async fn difference_reports_days_and_hours() {
        let out = payload(
            TimeDifference
                .call(json!({
                    "time1": "2024-01-01 00:00:00",
                    "time2": "2024-01-02 06:00:00"
                }))
                .await
                .unwrap(),
        );
        assert_eq!(out["difference_days"], 1);
        assert_eq!(out["difference_hours"], 30.0);
        assert_eq!(out["human_readable"], "1 day, 6:00:00");
        assert_eq!(out["is_positive"], true);
    }

    #[tokio::test]
    async fn negative_difference_floors_days() {
        let out = payload(
            TimeDifference
                .call(json!({
                    "time1": "2024-01-01 01:00:00",
                    "time2": "2024-01-01 00:00:00"
                }))
                .await
                .unwrap(),
        );
        assert_eq!(out["difference_seconds"], -3600.0);
        assert_eq!(out["difference_days"], -1);
        assert_eq!(out["human_readable"], "-1 day, 23:00:00");
        assert_eq!(out["is_positive"], false);
    }
}
