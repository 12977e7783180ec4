//! Whole-history backups to a folder of JSON documents, restore in replace or
//! merge mode, retention sweeps and the daily automatic backup.

mod archive;
mod folder;
mod naming;

pub use archive::{BackupArchive, BackupSession, BackupSettings, FORMAT_VERSION};
pub use folder::{DocumentEntry, DocumentFolder, LocalFolder};
pub use naming::{backup_file_name, parse_backup_timestamp, BACKUP_EXTENSION, BACKUP_PREFIX};

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, RestoreMode},
    settings::Settings,
    utils::Clock,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const SCHEDULER_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFileInfo {
    pub name: String,
    /// Creation time taken from the file name, Unix milliseconds.
    pub timestamp: i64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledBackup {
    Disabled,
    Created {
        backup: BackupFileInfo,
        deleted_old: usize,
    },
}

#[derive(Clone)]
pub struct BackupManager {
    db: Database,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl BackupManager {
    pub fn new(db: Database, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            settings,
            clock,
        }
    }

    /// Writes the full history and current preferences as a new archive.
    pub async fn create_backup(&self, folder: &dyn DocumentFolder) -> Result<BackupFileInfo> {
        let sessions = self.db.get_sessions_with_laps().await?;
        let now = self.clock.now();
        let archive = BackupArchive::new(
            &sessions,
            Some(BackupSettings::capture(&self.settings)),
            now.timestamp_millis(),
        );
        let json = archive.to_json()?;

        let name = backup_file_name(&now.with_timezone(&Local));
        let entry = folder
            .write(&name, json.as_bytes())
            .context("failed to write backup file")?;

        log_info!(
            "Created backup {} with {} sessions ({} bytes)",
            entry.name,
            archive.sessions.len(),
            entry.size
        );

        // Same second-precision stamp `list_backups` reads back from the name.
        let timestamp = parse_backup_timestamp(&entry.name, &Local).unwrap_or(archive.timestamp);
        Ok(BackupFileInfo {
            name: entry.name,
            timestamp,
            size: entry.size,
        })
    }

    /// Backups in the folder, newest first. Files that do not follow the
    /// backup naming scheme are ignored.
    pub fn list_backups(&self, folder: &dyn DocumentFolder) -> Result<Vec<BackupFileInfo>> {
        let mut backups: Vec<BackupFileInfo> = folder
            .list()?
            .into_iter()
            .filter_map(|entry| {
                let timestamp = parse_backup_timestamp(&entry.name, &Local)?;
                Some(BackupFileInfo {
                    name: entry.name,
                    timestamp,
                    size: entry.size,
                })
            })
            .collect();

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// Restores sessions from an archive, then its preferences. Returns the
    /// number of sessions restored. Preferences are applied best-effort once
    /// the sessions are committed; a failure there is logged, not returned.
    pub async fn restore_backup(
        &self,
        folder: &dyn DocumentFolder,
        name: &str,
        mode: RestoreMode,
    ) -> Result<usize> {
        let bytes = folder.read(name)?;
        let text = String::from_utf8(bytes).context("backup file is not UTF-8")?;
        let archive = BackupArchive::from_json(&text)?;

        if archive.is_from_newer_version() {
            log_warn!(
                "Backup {name} was written by newer version {}; restoring known fields",
                archive.version
            );
        }

        let restored = self
            .db
            .restore_sessions(archive.new_sessions()?, mode)
            .await?;

        if let Some(settings) = &archive.settings {
            if let Err(err) = settings.apply_to(&self.settings) {
                log_error!("Restored sessions from {name} but not its preferences: {err:?}");
            }
        }

        log_info!("Restored {restored} sessions from {name} ({mode:?})");
        Ok(restored)
    }

    pub fn delete_backup(&self, folder: &dyn DocumentFolder, name: &str) -> Result<()> {
        folder.delete(name)?;
        log_info!("Deleted backup {name}");
        Ok(())
    }

    /// Deletes backups whose stamp is older than `retention_days`. Individual
    /// failures are logged and skipped; returns how many were deleted.
    pub fn delete_old_backups(&self, folder: &dyn DocumentFolder, retention_days: u32) -> usize {
        let cutoff = self.clock.now_ms() - i64::from(retention_days) * DAY_MS;
        let backups = match self.list_backups(folder) {
            Ok(backups) => backups,
            Err(err) => {
                log_warn!("Failed to list backups for retention sweep: {err:?}");
                return 0;
            }
        };

        let mut deleted = 0;
        for backup in backups.iter().filter(|backup| backup.timestamp < cutoff) {
            match folder.delete(&backup.name) {
                Ok(()) => deleted += 1,
                Err(err) => log_warn!("Failed to delete old backup {}: {err:?}", backup.name),
            }
        }

        if deleted > 0 {
            log_info!("Retention sweep removed {deleted} backups older than {retention_days} days");
        }
        deleted
    }

    /// The automatic backup: skipped when disabled, otherwise a new archive in
    /// the configured folder followed by a retention sweep.
    pub async fn run_scheduled_backup(&self) -> Result<ScheduledBackup> {
        if !self.settings.auto_backup_enabled() {
            return Ok(ScheduledBackup::Disabled);
        }

        let folder = self
            .settings
            .backup_folder()
            .map(LocalFolder::new)
            .ok_or_else(|| anyhow!("automatic backup is enabled but no backup folder is set"))?;

        let backup = self.create_backup(&folder).await?;
        self.settings.set_last_backup_time(self.clock.now_ms())?;
        let deleted_old = self.delete_old_backups(&folder, self.settings.backup_retention_days());

        Ok(ScheduledBackup::Created {
            backup,
            deleted_old,
        })
    }

    fn backup_due(&self) -> bool {
        self.settings.auto_backup_enabled()
            && self.clock.now_ms() - self.settings.last_backup_time() >= DAY_MS
    }

    /// Spawns the daily automatic backup. The task wakes hourly and runs a
    /// backup once a day has passed since the last one.
    pub fn spawn_scheduler(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(SCHEDULER_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !manager.backup_due() {
                            continue;
                        }
                        match manager.run_scheduled_backup().await {
                            Ok(ScheduledBackup::Created { backup, .. }) => {
                                log_info!("Automatic backup written to {}", backup.name);
                            }
                            Ok(ScheduledBackup::Disabled) => {}
                            Err(err) => log_error!("Automatic backup failed: {err:?}"),
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        log_info!("backup scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }
}
