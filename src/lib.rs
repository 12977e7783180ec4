pub mod backup;
pub mod cli;
pub mod config;
pub mod db;
pub mod export;
pub mod keepalive;
pub mod settings;
pub mod timer;
pub mod utils;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use backup::BackupManager;
use cli::{Cli, Commands};
use config::AppConfig;
use db::Database;
use keepalive::{KeepAliveHandle, LogLiveness};
use settings::{JsonFileStore, Settings};
use timer::{SnapshotStore, TimerController, TimerSnapshot};
use utils::{Clock, SystemClock};

/// Everything a front end needs, wired against one data directory.
///
/// Opening an `App` never touches the timer snapshot. Only the process that
/// calls [`App::start_timer`] owns the running stopwatch; the other commands
/// may run alongside it.
pub struct App {
    pub config: AppConfig,
    pub db: Database,
    pub settings: Settings,
    pub backups: BackupManager,
    clock: Arc<dyn Clock>,
}

impl App {
    pub async fn open(config: AppConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    async fn open_with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db = Database::new(config.database_path())?;
        let settings = Settings::new(Arc::new(JsonFileStore::new(config.preferences_path())?));
        let backups = BackupManager::new(db.clone(), settings.clone(), clock.clone());

        Ok(Self {
            config,
            db,
            settings,
            backups,
            clock,
        })
    }

    /// Starts the keep-alive holder and the timer, resuming whatever run the
    /// snapshot holds.
    pub async fn start_timer(&self) -> TimerController {
        let keepalive = KeepAliveHandle::spawn(self.clock.clone(), Box::new(LogLiveness::new()));
        TimerController::new(
            self.db.clone(),
            self.settings.clone(),
            keepalive,
            self.clock.clone(),
            self.config.debug,
        )
        .await
    }

    /// The stored run as of now, read without taking ownership of it.
    pub fn peek_timer(&self) -> TimerSnapshot {
        let now = self.clock.now_ms();
        let state = SnapshotStore::new(self.settings.store())
            .load()
            .map(|snapshot| snapshot.into_state(now))
            .unwrap_or_default();
        TimerSnapshot::at(state, now)
    }
}

pub fn run() {
    // Info by default; RUST_LOG takes precedence
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("laplog: failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let mut config = AppConfig::from_env();
        if let Some(dir) = &cli.data_dir {
            config = config.with_data_dir(dir);
        }
        log::info!("LapLog starting with data in {}", config.data_dir.display());

        let app = App::open(config).await?;
        cli::dispatch(&app, cli.command.unwrap_or(Commands::Run)).await
    });

    if let Err(err) = result {
        eprintln!("laplog: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cli::SettingsAction;
    use settings::KeyValueStore;
    use tempfile::TempDir;
    use timer::{PersistedSnapshot, TimerState, TimerStatus};
    use utils::clock::ManualClock;

    const NOW_MS: i64 = 1_700_000_000_000;

    async fn open_at(dir: &TempDir, clock: &ManualClock) -> App {
        let config = AppConfig::from_env().with_data_dir(dir.path());
        App::open_with_clock(config, Arc::new(clock.clone()))
            .await
            .unwrap()
    }

    fn running_for(ms: i64) -> PersistedSnapshot {
        let mut state = TimerState::new();
        state.start(NOW_MS - ms);
        PersistedSnapshot::capture(&state, NOW_MS)
    }

    #[tokio::test]
    async fn status_reads_the_run_without_taking_it_over() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::at(NOW_MS);
        let prefs = AppConfig::from_env().with_data_dir(dir.path()).preferences_path();
        let owner = SnapshotStore::new(Arc::new(JsonFileStore::new(prefs.clone()).unwrap()));
        owner.save(&running_for(3_000)).unwrap();

        let app = open_at(&dir, &clock).await;
        clock.advance(2_000);
        let peeked = app.peek_timer();
        assert_eq!(peeked.state.status, TimerStatus::Running);
        assert_eq!(peeked.elapsed_ms, 5_000);

        // The owning process finishes the run while this one is still open.
        owner.clear().unwrap();
        cli::dispatch(&app, Commands::Status).await.unwrap();
        cli::dispatch(
            &app,
            Commands::Settings {
                action: Some(SettingsAction::Set {
                    key: "auto_backup".into(),
                    value: "on".into(),
                }),
            },
        )
        .await
        .unwrap();

        let reopened = JsonFileStore::new(prefs).unwrap();
        assert!(reopened.get_bool("auto_backup_enabled", false));
        let store: Arc<dyn KeyValueStore> = Arc::new(reopened);
        assert_eq!(SnapshotStore::new(store).load(), None);
    }

    #[tokio::test]
    async fn peek_on_a_fresh_install_is_idle() {
        let dir = TempDir::new().unwrap();
        let app = open_at(&dir, &ManualClock::at(NOW_MS)).await;
        let peeked = app.peek_timer();
        assert_eq!(peeked.state.status, TimerStatus::Idle);
        assert_eq!(peeked.elapsed_ms, 0);
        assert!(peeked.statistics.is_none());
    }
}
