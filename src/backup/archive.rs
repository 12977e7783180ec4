use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::{helpers::datetime_from_millis, NewSession, SessionWithLaps};
use crate::settings::{ScreenOnMode, Settings};
use crate::timer::Lap;

/// Version stamped into every archive written by this build.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_true() -> bool {
    true
}

fn default_screen_on_mode() -> String {
    ScreenOnMode::default().as_str().to_string()
}

/// Preferences carried inside an archive. Absent fields take the
/// application defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    #[serde(default = "default_true")]
    pub show_milliseconds: bool,
    #[serde(default = "default_screen_on_mode")]
    pub screen_on_mode: String,
    #[serde(default)]
    pub lock_orientation: bool,
    #[serde(default)]
    pub show_milliseconds_in_history: bool,
    #[serde(default)]
    pub invert_lap_colors: bool,
    #[serde(default)]
    pub app_language: Option<String>,
}

impl BackupSettings {
    pub fn capture(settings: &Settings) -> Self {
        Self {
            show_milliseconds: settings.show_milliseconds(),
            screen_on_mode: settings.screen_on_mode().as_str().to_string(),
            lock_orientation: settings.lock_orientation(),
            show_milliseconds_in_history: settings.show_milliseconds_in_history(),
            invert_lap_colors: settings.invert_lap_colors(),
            app_language: settings.app_language(),
        }
    }

    /// Writes every field back. An unknown screen mode becomes the default and
    /// a missing language leaves the current one alone.
    pub fn apply_to(&self, settings: &Settings) -> Result<()> {
        settings.set_show_milliseconds(self.show_milliseconds)?;
        settings.set_screen_on_mode(ScreenOnMode::parse_or_default(&self.screen_on_mode))?;
        settings.set_lock_orientation(self.lock_orientation)?;
        settings.set_show_milliseconds_in_history(self.show_milliseconds_in_history)?;
        settings.set_invert_lap_colors(self.invert_lap_colors)?;
        if let Some(language) = &self.app_language {
            settings.set_app_language(Some(language))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSession {
    pub id: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub total_duration: u64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub laps: Vec<Lap>,
}

impl From<&SessionWithLaps> for BackupSession {
    fn from(stored: &SessionWithLaps) -> Self {
        Self {
            id: stored.session.id,
            start_time: stored.session.started_at.timestamp_millis(),
            end_time: stored.session.ended_at.timestamp_millis(),
            total_duration: stored.session.total_duration_ms,
            comment: stored.session.comment.clone(),
            laps: stored.laps.clone(),
        }
    }
}

impl BackupSession {
    /// Storage record for this session; the archived id is not reused.
    pub fn to_new_session(&self) -> Result<NewSession> {
        Ok(NewSession {
            started_at: datetime_from_millis(self.start_time, "startTime")?,
            ended_at: datetime_from_millis(self.end_time, "endTime")?,
            total_duration_ms: self.total_duration,
            comment: self.comment.clone(),
            laps: self.laps.clone(),
        })
    }
}

/// Self-describing document holding the whole history and preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArchive {
    pub version: String,
    /// Creation time in Unix milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BackupSettings>,
    pub sessions: Vec<BackupSession>,
}

impl BackupArchive {
    pub fn new(
        sessions: &[SessionWithLaps],
        settings: Option<BackupSettings>,
        created_at_ms: i64,
    ) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            timestamp: created_at_ms,
            settings,
            sessions: sessions.iter().map(BackupSession::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to encode backup archive")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("backup file is not a valid archive")
    }

    /// Whether a later release wrote this archive. Unparseable versions count
    /// as older.
    pub fn is_from_newer_version(&self) -> bool {
        fn parts(version: &str) -> Vec<u64> {
            version
                .split('.')
                .map(|part| part.parse().unwrap_or(0))
                .collect()
        }
        parts(&self.version) > parts(FORMAT_VERSION)
    }

    pub fn new_sessions(&self) -> Result<Vec<NewSession>> {
        self.sessions
            .iter()
            .map(BackupSession::to_new_session)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Session;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn stored(id: i64, comment: Option<&str>) -> SessionWithLaps {
        SessionWithLaps {
            session: Session {
                id,
                started_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
                ended_at: Utc.timestamp_millis_opt(1_700_000_004_200).unwrap(),
                total_duration_ms: 4_200,
                comment: comment.map(str::to_string),
            },
            laps: vec![
                Lap { lap_number: 1, total_time: 1_500, lap_duration: 1_500 },
                Lap { lap_number: 2, total_time: 4_200, lap_duration: 2_700 },
            ],
        }
    }

    #[test]
    fn archive_layout_matches_the_document_format() {
        let archive = BackupArchive::new(
            &[stored(7, None)],
            Some(BackupSettings::capture(&Settings::in_memory())),
            1_700_000_100_000,
        );
        let json: Value = serde_json::from_str(&archive.to_json().unwrap()).unwrap();

        assert_eq!(json["version"], FORMAT_VERSION);
        assert_eq!(json["timestamp"], 1_700_000_100_000i64);
        assert_eq!(json["settings"]["screenOnMode"], "WHILE_RUNNING");
        assert_eq!(json["settings"]["showMilliseconds"], true);
        assert!(json["settings"]["appLanguage"].is_null());
        assert_eq!(json["sessions"][0]["id"], 7);
        assert_eq!(json["sessions"][0]["startTime"], 1_700_000_000_000i64);
        assert!(json["sessions"][0]["comment"].is_null());
        assert_eq!(json["sessions"][0]["laps"][1]["lapDuration"], 2_700);
    }

    #[test]
    fn decoding_tolerates_missing_settings_fields() {
        let archive = BackupArchive::from_json(
            r#"{
                "version": "0.7.0",
                "timestamp": 1,
                "settings": { "lockOrientation": true },
                "sessions": [
                    { "id": 3, "startTime": 10, "endTime": 20, "totalDuration": 10, "comment": null, "laps": [] }
                ]
            }"#,
        )
        .unwrap();

        let settings = archive.settings.clone().unwrap();
        assert!(settings.show_milliseconds);
        assert!(settings.lock_orientation);
        assert_eq!(settings.screen_on_mode, "WHILE_RUNNING");
        assert_eq!(settings.app_language, None);

        let sessions = archive.new_sessions().unwrap();
        assert_eq!(sessions[0].comment, None);
        assert_eq!(sessions[0].total_duration_ms, 10);

        let bare = BackupArchive::from_json(r#"{"version":"0.8.0","timestamp":1,"sessions":[]}"#).unwrap();
        assert_eq!(bare.settings, None);
        assert!(!bare.is_from_newer_version());
        let future = BackupArchive { version: "99.0.0".into(), ..bare };
        assert!(future.is_from_newer_version());
        assert!(BackupArchive::from_json("[]").is_err());
    }

    #[test]
    fn applying_settings_keeps_language_when_absent() {
        let settings = Settings::in_memory();
        settings.set_app_language(Some("de")).unwrap();

        BackupSettings {
            show_milliseconds: false,
            screen_on_mode: "BLINKING".into(),
            lock_orientation: true,
            show_milliseconds_in_history: true,
            invert_lap_colors: true,
            app_language: None,
        }
        .apply_to(&settings)
        .unwrap();

        assert!(!settings.show_milliseconds());
        assert_eq!(settings.screen_on_mode(), ScreenOnMode::WhileRunning);
        assert!(settings.lock_orientation());
        assert!(settings.show_milliseconds_in_history());
        assert!(settings.invert_lap_colors());
        assert_eq!(settings.app_language().as_deref(), Some("de"));
    }
}
