use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    backup::{LocalFolder, ScheduledBackup},
    db::RestoreMode,
    export::{export_file_name, render, ExportFormat},
    settings::{ScreenOnMode, Settings},
    timer::commands::{execute, render_lap, render_status, ConsoleCommand, HELP},
    utils::time_format::format_clock,
    App,
};

#[derive(Parser)]
#[command(name = "laplog")]
#[command(about = "Stopwatch with laps, session history and backups")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides LAPLOG_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive stopwatch (the default)
    Run,

    /// Print the current timer and exit
    Status,

    /// List stored sessions, newest first
    History {
        /// Include every lap
        #[arg(long)]
        laps: bool,
    },

    /// Delete stored sessions and their laps
    #[command(group(ArgGroup::new("target").required(true).args(["id", "before", "all"])))]
    Delete {
        /// One session by id
        #[arg(value_name = "ID")]
        id: Option<i64>,

        /// Every session started before this local date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        before: Option<NaiveDate>,

        /// The whole history
        #[arg(long)]
        all: bool,
    },

    /// Set the comment of a stored session (omit TEXT to clear it)
    Comment {
        #[arg(value_name = "ID")]
        id: i64,

        #[arg(value_name = "TEXT")]
        text: Option<String>,
    },

    /// List comments used on stored sessions
    Comments,

    /// Export the history as CSV or JSON
    Export {
        /// csv or json
        #[arg(long, default_value = "csv")]
        format: String,

        /// Directory to write into (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Create, list, restore or prune backups
    Backup {
        /// Backup folder (defaults to the configured one)
        #[arg(long, value_name = "DIR")]
        folder: Option<PathBuf>,

        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show or change preferences
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// Write a new backup
    Create,

    /// List backups, newest first
    List,

    /// Restore a backup by file name
    Restore {
        #[arg(value_name = "NAME")]
        name: String,

        /// Add to the existing history instead of replacing it
        #[arg(long)]
        merge: bool,
    },

    /// Delete a backup by file name
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Delete backups older than the retention period
    Prune {
        /// Retention in days (defaults to the configured one)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Run the automatic backup now, if enabled
    Auto,
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print every preference
    Show,

    /// Change one preference
    Set {
        #[arg(value_name = "KEY")]
        key: String,

        #[arg(value_name = "VALUE")]
        value: String,
    },
}

pub async fn dispatch(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Run => run_interactive(app).await,
        Commands::Status => {
            println!(
                "{}",
                render_status(&app.peek_timer(), app.settings.show_milliseconds())
            );
            Ok(())
        }
        Commands::History { laps } => print_history(app, laps).await,
        Commands::Delete { id, before, all } => delete_sessions(app, id, before, all).await,
        Commands::Comment { id, text } => {
            let text = text.filter(|t| !t.trim().is_empty());
            app.db.update_session_comment(id, text.clone()).await?;
            if let Some(text) = &text {
                app.settings.remember_comment(text)?;
            }
            println!("Updated session {id}");
            Ok(())
        }
        Commands::Comments => {
            for comment in app.db.get_distinct_comments().await? {
                println!("{comment}");
            }
            Ok(())
        }
        Commands::Export { format, output } => {
            let format: ExportFormat = format.parse()?;
            let sessions = app.db.get_sessions_with_laps().await?;
            let contents = render(format, &sessions, &Local)?;
            let dir = output.unwrap_or_else(|| PathBuf::from("."));
            let path = dir.join(export_file_name(format, &Local::now()));
            std::fs::write(&path, contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported {} sessions to {}", sessions.len(), path.display());
            Ok(())
        }
        Commands::Backup { folder, action } => run_backup(app, folder, action).await,
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => {
                print_settings(&app.settings);
                Ok(())
            }
            SettingsAction::Set { key, value } => {
                apply_setting(&app.settings, &key, &value)?;
                println!("{key} updated");
                Ok(())
            }
        },
    }
}

async fn delete_sessions(
    app: &App,
    id: Option<i64>,
    before: Option<NaiveDate>,
    all: bool,
) -> Result<()> {
    if let Some(id) = id {
        if !app.db.delete_session(id).await? {
            bail!("session {id} not found");
        }
        println!("Deleted session {id}");
    } else if let Some(date) = before {
        let cutoff = start_of_local_day(date)?;
        let deleted = app.db.delete_sessions_before(cutoff).await?;
        println!("Deleted {deleted} sessions started before {date}");
    } else if all {
        let deleted = app.db.delete_all_sessions().await?;
        println!("Deleted {deleted} sessions");
    }
    Ok(())
}

/// Local midnight at the start of `date`, as UTC.
fn start_of_local_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid date")?;
    let local = Local
        .from_local_datetime(&midnight)
        .earliest()
        .with_context(|| format!("{date} has no local midnight"))?;
    Ok(local.with_timezone(&Utc))
}

async fn run_interactive(app: &App) -> Result<()> {
    let timer = app.start_timer().await;
    let scheduler_token = CancellationToken::new();
    let scheduler = app.backups.spawn_scheduler(scheduler_token.clone());

    let mut events = timer.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            log::debug!("timer event: {}", event.name());
        }
    });

    match timer.sync_from_keepalive().await {
        Ok(outcome) if outcome.adopted() => log::warn!("Timer reconciled on startup: {outcome:?}"),
        Ok(_) => {}
        Err(err) => log::warn!("Keep-alive reconciliation skipped: {err:?}"),
    }

    println!("{HELP}\n");
    println!(
        "{}",
        render_status(&timer.get_snapshot().await, app.settings.show_milliseconds())
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match execute(&timer, command).await {
            Ok(output) => println!("{output}"),
            Err(err) => println!("Error: {err}"),
        }
    }

    timer.shutdown().await;
    scheduler_token.cancel();
    let _ = scheduler.await;
    event_logger.abort();
    Ok(())
}

async fn print_history(app: &App, with_laps: bool) -> Result<()> {
    let show_ms = app.settings.show_milliseconds_in_history();
    let sessions = app.db.get_sessions_with_laps().await?;
    if sessions.is_empty() {
        println!("No sessions yet");
        return Ok(());
    }

    for stored in &sessions {
        let session = &stored.session;
        println!(
            "#{:<4} {}  {}  {} laps  {}",
            session.id,
            session.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            format_clock(session.total_duration_ms, show_ms, true),
            stored.laps.len(),
            session.comment.as_deref().unwrap_or("")
        );
        if with_laps {
            for lap in &stored.laps {
                let delta = crate::timer::laps::difference_from_previous(&stored.laps, lap.lap_number);
                println!("      {}", render_lap(lap, delta, show_ms));
            }
        }
    }
    Ok(())
}

async fn run_backup(app: &App, folder: Option<PathBuf>, action: BackupAction) -> Result<()> {
    let folder = LocalFolder::new(
        folder
            .or_else(|| app.settings.backup_folder())
            .unwrap_or_else(|| app.config.default_backup_dir()),
    );

    match action {
        BackupAction::Create => {
            let info = app.backups.create_backup(&folder).await?;
            println!("Created {} ({} bytes)", folder.root().join(&info.name).display(), info.size);
        }
        BackupAction::List => {
            for backup in app.backups.list_backups(&folder)? {
                println!("{}  {} bytes", backup.name, backup.size);
            }
        }
        BackupAction::Restore { name, merge } => {
            let mode = if merge {
                RestoreMode::Merge
            } else {
                RestoreMode::Replace
            };
            let restored = app.backups.restore_backup(&folder, &name, mode).await?;
            println!("Restored {restored} sessions");
        }
        BackupAction::Delete { name } => {
            app.backups.delete_backup(&folder, &name)?;
            println!("Deleted {name}");
        }
        BackupAction::Prune { days } => {
            let days = days.unwrap_or_else(|| app.settings.backup_retention_days());
            let deleted = app.backups.delete_old_backups(&folder, days);
            println!("Deleted {deleted} backups older than {days} days");
        }
        BackupAction::Auto => match app.backups.run_scheduled_backup().await? {
            ScheduledBackup::Disabled => println!("Automatic backup is disabled"),
            ScheduledBackup::Created {
                backup,
                deleted_old,
            } => println!("Created {} and removed {deleted_old} old backups", backup.name),
        },
    }
    Ok(())
}

fn print_settings(settings: &Settings) {
    println!("show_milliseconds = {}", settings.show_milliseconds());
    println!("screen_on_mode = {}", settings.screen_on_mode());
    println!("lock_orientation = {}", settings.lock_orientation());
    println!(
        "show_milliseconds_in_history = {}",
        settings.show_milliseconds_in_history()
    );
    println!("invert_lap_colors = {}", settings.invert_lap_colors());
    println!(
        "app_language = {}",
        settings.app_language().unwrap_or_else(|| "system".into())
    );
    println!("current_comment = {}", settings.current_comment());
    println!(
        "backup_folder = {}",
        settings
            .backup_folder()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    );
    println!("auto_backup = {}", settings.auto_backup_enabled());
    println!("retention_days = {}", settings.backup_retention_days());
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

pub fn apply_setting(settings: &Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "show_milliseconds" => settings.set_show_milliseconds(parse_bool(value)?),
        "screen_on_mode" => settings.set_screen_on_mode(value.to_ascii_uppercase().parse::<ScreenOnMode>()?),
        "lock_orientation" => settings.set_lock_orientation(parse_bool(value)?),
        "show_milliseconds_in_history" => {
            settings.set_show_milliseconds_in_history(parse_bool(value)?)
        }
        "invert_lap_colors" => settings.set_invert_lap_colors(parse_bool(value)?),
        "app_language" => match value {
            "" | "system" => settings.set_app_language(None),
            code => settings.set_app_language(Some(code)),
        },
        "current_comment" => settings.update_current_comment(value),
        "backup_folder" => settings.set_backup_folder(std::path::Path::new(value)),
        "auto_backup" => settings.set_auto_backup_enabled(parse_bool(value)?),
        "retention_days" => {
            let days: u32 = value
                .parse()
                .with_context(|| format!("invalid retention '{value}'"))?;
            if days == 0 {
                bail!("retention must be at least one day");
            }
            settings.set_backup_retention_days(days)
        }
        other => bail!("unknown setting '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_nested_backup_commands() {
        let cli = Cli::try_parse_from(["laplog", "backup", "--folder", "/tmp/b", "restore", "x.json", "--merge"])
            .unwrap();
        match cli.command {
            Some(Commands::Backup {
                folder,
                action: BackupAction::Restore { name, merge },
            }) => {
                assert_eq!(folder, Some(PathBuf::from("/tmp/b")));
                assert_eq!(name, "x.json");
                assert!(merge);
            }
            _ => panic!("unexpected parse"),
        }

        let bare = Cli::try_parse_from(["laplog"]).unwrap();
        assert!(bare.command.is_none());
    }

    #[test]
    fn delete_takes_exactly_one_target() {
        let cli = Cli::try_parse_from(["laplog", "delete", "--before", "2026-03-03"]).unwrap();
        match cli.command {
            Some(Commands::Delete { id, before, all }) => {
                assert_eq!(id, None);
                assert_eq!(before, NaiveDate::from_ymd_opt(2026, 3, 3));
                assert!(!all);
            }
            _ => panic!("unexpected parse"),
        }

        let cli = Cli::try_parse_from(["laplog", "delete", "--all"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Delete { all: true, .. })));

        assert!(Cli::try_parse_from(["laplog", "delete"]).is_err());
        assert!(Cli::try_parse_from(["laplog", "delete", "4", "--all"]).is_err());
        assert!(Cli::try_parse_from(["laplog", "delete", "--before", "03/03/2026"]).is_err());
    }

    #[tokio::test]
    async fn delete_before_a_date_then_everything() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = App::open(crate::config::AppConfig::from_env().with_data_dir(dir.path()))
            .await
            .unwrap();

        for day in [1, 2, 5] {
            let started_at = Local
                .with_ymd_and_hms(2026, 3, day, 9, 0, 0)
                .unwrap()
                .with_timezone(&Utc);
            app.db
                .insert_session(&crate::db::NewSession {
                    started_at,
                    ended_at: started_at + chrono::Duration::minutes(5),
                    total_duration_ms: 300_000,
                    comment: None,
                    laps: Vec::new(),
                })
                .await
                .unwrap();
        }

        delete_sessions(&app, None, NaiveDate::from_ymd_opt(2026, 3, 3), false)
            .await
            .unwrap();
        assert_eq!(app.db.get_all_sessions().await.unwrap().len(), 1);

        delete_sessions(&app, None, None, true).await.unwrap();
        assert!(app.db.get_all_sessions().await.unwrap().is_empty());
    }

    #[test]
    fn settings_are_validated_before_writing() {
        let settings = Settings::in_memory();
        apply_setting(&settings, "screen_on_mode", "always").unwrap();
        assert_eq!(settings.screen_on_mode(), ScreenOnMode::Always);

        apply_setting(&settings, "show_milliseconds", "off").unwrap();
        assert!(!settings.show_milliseconds());

        apply_setting(&settings, "retention_days", "14").unwrap();
        assert_eq!(settings.backup_retention_days(), 14);

        assert!(apply_setting(&settings, "retention_days", "0").is_err());
        assert!(apply_setting(&settings, "lock_orientation", "maybe").is_err());
        assert!(apply_setting(&settings, "volume", "11").is_err());
    }
}
