//! History export as CSV or JSON.

use std::{fmt::Display, str::FromStr};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;

use crate::db::SessionWithLaps;
use crate::timer::Lap;
use crate::utils::time_format::format_duration;

const EXPORT_PREFIX: &str = "laplog_history_";
const CSV_HEADER: &str = "Date,Start Time,End Time,Duration (ms),Duration,Comment,Lap Number,Lap Total Time (ms),Lap Duration (ms)";
const CSV_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => bail!("unknown export format '{other}'"),
        }
    }
}

/// `laplog_history_yyyy-MM-dd_HHmmss.<ext>` in the zone of `at`.
pub fn export_file_name<Tz>(format: ExportFormat, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{EXPORT_PREFIX}{}.{}",
        at.format("%Y-%m-%d_%H%M%S"),
        format.extension()
    )
}

pub fn render<Tz>(format: ExportFormat, sessions: &[SessionWithLaps], tz: &Tz) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match format {
        ExportFormat::Csv => Ok(history_csv(sessions, tz)),
        ExportFormat::Json => history_json(sessions),
    }
}

/// One row per lap; a session without laps gets a single row with the lap
/// columns left empty. Dates are rendered in `tz`.
pub fn history_csv<Tz>(sessions: &[SessionWithLaps], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut csv = String::with_capacity(128 * (sessions.len() + 1));
    csv.push_str(CSV_HEADER);
    csv.push('\n');

    for stored in sessions {
        let session = &stored.session;
        let start = session.started_at.with_timezone(tz).format(CSV_DATE_FORMAT).to_string();
        let end = session.ended_at.with_timezone(tz).format(CSV_DATE_FORMAT).to_string();
        let prefix = format!(
            "{start},{start},{end},{},{},{}",
            session.total_duration_ms,
            format_duration(session.total_duration_ms),
            session.comment.as_deref().unwrap_or("").replace(',', ";"),
        );

        if stored.laps.is_empty() {
            csv.push_str(&prefix);
            csv.push_str(",,,\n");
            continue;
        }
        for lap in &stored.laps {
            csv.push_str(&format!(
                "{prefix},{},{},{}\n",
                lap.lap_number, lap.total_time, lap.lap_duration
            ));
        }
    }

    csv
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedSession<'a> {
    id: i64,
    start_time: String,
    end_time: String,
    total_duration: u64,
    comment: Option<&'a str>,
    laps: &'a [Lap],
}

#[derive(Serialize)]
struct ExportedHistory<'a> {
    sessions: Vec<ExportedSession<'a>>,
}

fn iso_millis(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Pretty JSON `{"sessions": [...]}` with UTC ISO-8601 timestamps.
pub fn history_json(sessions: &[SessionWithLaps]) -> Result<String> {
    let history = ExportedHistory {
        sessions: sessions
            .iter()
            .map(|stored| ExportedSession {
                id: stored.session.id,
                start_time: iso_millis(&stored.session.started_at),
                end_time: iso_millis(&stored.session.ended_at),
                total_duration: stored.session.total_duration_ms,
                comment: stored.session.comment.as_deref(),
                laps: &stored.laps,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&history).context("failed to encode history export")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Session;
    use serde_json::Value;

    fn stored(id: i64, comment: Option<&str>, laps: Vec<Lap>) -> SessionWithLaps {
        SessionWithLaps {
            session: Session {
                id,
                started_at: Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap(),
                ended_at: Utc.with_ymd_and_hms(2025, 3, 4, 6, 7, 9).unwrap(),
                total_duration_ms: 3_662_500,
                comment: comment.map(str::to_string),
            },
            laps,
        }
    }

    #[test]
    fn csv_has_a_row_per_lap_and_escapes_commas() {
        let laps = vec![
            Lap { lap_number: 1, total_time: 1_500, lap_duration: 1_500 },
            Lap { lap_number: 2, total_time: 4_200, lap_duration: 2_700 },
        ];
        let csv = history_csv(&[stored(1, Some("hills, wind"), laps)], &Utc);
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "2025-03-04 05:06:07,2025-03-04 05:06:07,2025-03-04 06:07:09,3662500,01:01:02,hills; wind,1,1500,1500"
        );
        assert!(lines[2].ends_with(",2,4200,2700"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn csv_session_without_laps_leaves_lap_columns_empty() {
        let csv = history_csv(&[stored(1, None, Vec::new())], &Utc);
        let row = csv.lines().nth(1).unwrap();
        assert!(row.ends_with("01:01:02,,,,"));
        assert_eq!(row.split(',').count(), 9);
    }

    #[test]
    fn json_uses_utc_iso_timestamps_and_null_comments() {
        let json: Value = serde_json::from_str(
            &history_json(&[stored(4, None, Vec::new()), stored(5, Some("say \"hi\""), Vec::new())])
                .unwrap(),
        )
        .unwrap();

        let first = &json["sessions"][0];
        assert_eq!(first["id"], 4);
        assert_eq!(first["startTime"], "2025-03-04T05:06:07.000Z");
        assert_eq!(first["totalDuration"], 3_662_500);
        assert!(first["comment"].is_null());
        assert_eq!(first["laps"], Value::Array(Vec::new()));
        assert_eq!(json["sessions"][1]["comment"], "say \"hi\"");
    }

    #[test]
    fn export_names_follow_format() {
        let at = Utc.with_ymd_and_hms(2025, 11, 13, 14, 30, 22).unwrap();
        assert_eq!(
            export_file_name(ExportFormat::Csv, &at),
            "laplog_history_2025-11-13_143022.csv"
        );
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
