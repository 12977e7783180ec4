//! Where LapLog keeps its files, resolved once at startup.
//!
//! | File | Location |
//! |------|----------|
//! | Session database | `<data_dir>/laplog.sqlite3` |
//! | Preferences and timer snapshot | `<data_dir>/preferences.json` |
//! | Default backup folder | `<data_dir>/backups/` |
//!
//! `LAPLOG_DATA_DIR` overrides the platform data directory and
//! `LAPLOG_DEBUG=1` turns on per-second heartbeats.

use std::path::{Path, PathBuf};

const DATA_DIR_ENV: &str = "LAPLOG_DATA_DIR";
const DEBUG_ENV: &str = "LAPLOG_DEBUG";

const DATABASE_FILE: &str = "laplog.sqlite3";
const PREFERENCES_FILE: &str = "preferences.json";
const BACKUPS_DIR: &str = "backups";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub debug: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var_os(DATA_DIR_ENV).map(PathBuf::from),
            std::env::var(DEBUG_ENV).ok().as_deref(),
        )
    }

    fn resolve(data_dir_override: Option<PathBuf>, debug: Option<&str>) -> Self {
        let data_dir = data_dir_override.unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("laplog"))
                .unwrap_or_else(|| PathBuf::from("/tmp/laplog-data"))
        });

        Self {
            data_dir,
            debug: debug
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE)
    }

    pub fn default_backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUPS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_and_debug_flag_are_honoured() {
        let config = AppConfig::resolve(Some(PathBuf::from("/srv/laplog")), Some("TRUE"));
        assert!(config.debug);
        assert_eq!(config.database_path(), PathBuf::from("/srv/laplog/laplog.sqlite3"));
        assert_eq!(config.preferences_path(), PathBuf::from("/srv/laplog/preferences.json"));
        assert_eq!(config.default_backup_dir(), PathBuf::from("/srv/laplog/backups"));
    }

    #[test]
    fn defaults_to_platform_data_dir() {
        let config = AppConfig::resolve(None, Some("0"));
        assert!(!config.debug);
        assert!(config.data_dir.ends_with("laplog") || config.data_dir.ends_with("laplog-data"));
    }
}
