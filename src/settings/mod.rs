mod store;

pub use store::{JsonFileStore, KeyValueStore, KvWrite, MemoryStore};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeSet, fmt, path::PathBuf, str::FromStr, sync::Arc};

const KEY_SHOW_MILLISECONDS: &str = "show_milliseconds";
const KEY_SCREEN_ON_MODE: &str = "screen_on_mode";
const KEY_LOCK_ORIENTATION: &str = "lock_orientation";
const KEY_SHOW_MILLISECONDS_IN_HISTORY: &str = "show_milliseconds_in_history";
const KEY_INVERT_LAP_COLORS: &str = "invert_lap_colors";
const KEY_APP_LANGUAGE: &str = "app_language";
const KEY_CURRENT_COMMENT: &str = "current_comment";
const KEY_USED_COMMENTS: &str = "used_comments";
const KEY_BACKUP_FOLDER: &str = "backup_folder";
const KEY_AUTO_BACKUP_ENABLED: &str = "auto_backup_enabled";
const KEY_BACKUP_RETENTION_DAYS: &str = "backup_retention_days";
const KEY_LAST_BACKUP_TIME: &str = "last_backup_time";

pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// When the display should be kept awake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreenOnMode {
    Off,
    #[default]
    WhileRunning,
    Always,
}

impl ScreenOnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenOnMode::Off => "OFF",
            ScreenOnMode::WhileRunning => "WHILE_RUNNING",
            ScreenOnMode::Always => "ALWAYS",
        }
    }

    pub fn cycle(self) -> Self {
        match self {
            ScreenOnMode::Off => ScreenOnMode::WhileRunning,
            ScreenOnMode::WhileRunning => ScreenOnMode::Always,
            ScreenOnMode::Always => ScreenOnMode::Off,
        }
    }

    /// Parses a stored name, falling back to the default for anything unknown.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            log::warn!("unknown screen-on mode '{value}', using {}", Self::default());
            Self::default()
        })
    }
}

impl fmt::Display for ScreenOnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenOnMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "OFF" => Ok(ScreenOnMode::Off),
            "WHILE_RUNNING" => Ok(ScreenOnMode::WhileRunning),
            "ALWAYS" => Ok(ScreenOnMode::Always),
            other => Err(anyhow::anyhow!("unknown screen-on mode '{other}'")),
        }
    }
}

/// Typed access to user preferences with their documented defaults.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn KeyValueStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    pub fn show_milliseconds(&self) -> bool {
        self.store.get_bool(KEY_SHOW_MILLISECONDS, true)
    }

    pub fn set_show_milliseconds(&self, value: bool) -> Result<()> {
        self.store.set(KEY_SHOW_MILLISECONDS, Value::Bool(value))
    }

    pub fn screen_on_mode(&self) -> ScreenOnMode {
        self.store
            .get_string(KEY_SCREEN_ON_MODE)
            .map(|raw| ScreenOnMode::parse_or_default(&raw))
            .unwrap_or_default()
    }

    pub fn set_screen_on_mode(&self, mode: ScreenOnMode) -> Result<()> {
        self.store.set(KEY_SCREEN_ON_MODE, mode.as_str().into())
    }

    pub fn lock_orientation(&self) -> bool {
        self.store.get_bool(KEY_LOCK_ORIENTATION, false)
    }

    pub fn set_lock_orientation(&self, value: bool) -> Result<()> {
        self.store.set(KEY_LOCK_ORIENTATION, Value::Bool(value))
    }

    pub fn show_milliseconds_in_history(&self) -> bool {
        self.store.get_bool(KEY_SHOW_MILLISECONDS_IN_HISTORY, false)
    }

    pub fn set_show_milliseconds_in_history(&self, value: bool) -> Result<()> {
        self.store
            .set(KEY_SHOW_MILLISECONDS_IN_HISTORY, Value::Bool(value))
    }

    pub fn invert_lap_colors(&self) -> bool {
        self.store.get_bool(KEY_INVERT_LAP_COLORS, false)
    }

    pub fn set_invert_lap_colors(&self, value: bool) -> Result<()> {
        self.store.set(KEY_INVERT_LAP_COLORS, Value::Bool(value))
    }

    pub fn app_language(&self) -> Option<String> {
        self.store.get_string(KEY_APP_LANGUAGE)
    }

    pub fn set_app_language(&self, language: Option<&str>) -> Result<()> {
        match language {
            Some(code) => self.store.set(KEY_APP_LANGUAGE, code.into()),
            None => self.store.remove(KEY_APP_LANGUAGE),
        }
    }

    pub fn current_comment(&self) -> String {
        self.store.get_string(KEY_CURRENT_COMMENT).unwrap_or_default()
    }

    /// Stores the comment for the next finished run and remembers non-blank
    /// values for later suggestions.
    pub fn update_current_comment(&self, comment: &str) -> Result<()> {
        let mut batch = vec![KvWrite::set(KEY_CURRENT_COMMENT, comment)];
        if !comment.trim().is_empty() {
            let mut used = self.used_comments();
            if used.insert(comment.to_string()) {
                batch.push(KvWrite::set(KEY_USED_COMMENTS, used_comments_value(&used)));
            }
        }
        self.store.apply(batch)
    }

    pub fn used_comments(&self) -> BTreeSet<String> {
        self.store
            .get(KEY_USED_COMMENTS)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub fn remember_comment(&self, comment: &str) -> Result<()> {
        if comment.trim().is_empty() {
            return Ok(());
        }
        let mut used = self.used_comments();
        if used.insert(comment.to_string()) {
            self.store.set(KEY_USED_COMMENTS, used_comments_value(&used))?;
        }
        Ok(())
    }

    pub fn backup_folder(&self) -> Option<PathBuf> {
        self.store.get_string(KEY_BACKUP_FOLDER).map(PathBuf::from)
    }

    pub fn set_backup_folder(&self, folder: &std::path::Path) -> Result<()> {
        self.store
            .set(KEY_BACKUP_FOLDER, folder.to_string_lossy().into_owned().into())
    }

    pub fn auto_backup_enabled(&self) -> bool {
        self.store.get_bool(KEY_AUTO_BACKUP_ENABLED, false)
    }

    pub fn set_auto_backup_enabled(&self, value: bool) -> Result<()> {
        self.store.set(KEY_AUTO_BACKUP_ENABLED, Value::Bool(value))
    }

    pub fn backup_retention_days(&self) -> u32 {
        let days = self
            .store
            .get_u64(KEY_BACKUP_RETENTION_DAYS, DEFAULT_RETENTION_DAYS as u64);
        u32::try_from(days).unwrap_or(DEFAULT_RETENTION_DAYS)
    }

    pub fn set_backup_retention_days(&self, days: u32) -> Result<()> {
        self.store.set(KEY_BACKUP_RETENTION_DAYS, days.into())
    }

    /// Unix milliseconds of the last successful backup, 0 when none.
    pub fn last_backup_time(&self) -> i64 {
        self.store.get_i64(KEY_LAST_BACKUP_TIME, 0)
    }

    pub fn set_last_backup_time(&self, at_ms: i64) -> Result<()> {
        self.store.set(KEY_LAST_BACKUP_TIME, at_ms.into())
    }
}

fn used_comments_value(used: &BTreeSet<String>) -> Value {
    Value::Array(used.iter().cloned().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_to_an_empty_store() {
        let settings = Settings::in_memory();
        assert!(settings.show_milliseconds());
        assert_eq!(settings.screen_on_mode(), ScreenOnMode::WhileRunning);
        assert!(!settings.lock_orientation());
        assert!(!settings.show_milliseconds_in_history());
        assert!(!settings.invert_lap_colors());
        assert_eq!(settings.app_language(), None);
        assert_eq!(settings.current_comment(), "");
        assert_eq!(settings.backup_folder(), None);
        assert!(!settings.auto_backup_enabled());
        assert_eq!(settings.backup_retention_days(), 30);
        assert_eq!(settings.last_backup_time(), 0);
    }

    #[test]
    fn unknown_screen_mode_falls_back() {
        let settings = Settings::in_memory();
        settings.store().set(KEY_SCREEN_ON_MODE, json!("SOMETIMES")).unwrap();
        assert_eq!(settings.screen_on_mode(), ScreenOnMode::WhileRunning);

        settings.set_screen_on_mode(ScreenOnMode::Always).unwrap();
        assert_eq!(settings.screen_on_mode(), ScreenOnMode::Always);
        assert_eq!(ScreenOnMode::Always.cycle(), ScreenOnMode::Off);
    }

    #[test]
    fn current_comment_is_remembered_unless_blank() {
        let settings = Settings::in_memory();
        settings.update_current_comment("intervals").unwrap();
        settings.update_current_comment("   ").unwrap();
        settings.update_current_comment("tempo").unwrap();
        settings.update_current_comment("intervals").unwrap();

        assert_eq!(settings.current_comment(), "intervals");
        let used: Vec<_> = settings.used_comments().into_iter().collect();
        assert_eq!(used, vec!["intervals".to_string(), "tempo".to_string()]);
    }
}
