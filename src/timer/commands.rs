use std::str::FromStr;

use anyhow::bail;

use crate::utils::time_format::{format_clock, format_delta};

use super::{controller::TimerSnapshot, laps::Lap, TimerController, TimerStatus};

/// A line typed into the interactive stopwatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    StartOrPause,
    Start,
    Pause,
    Lap,
    LapAndPause,
    Reset,
    ToggleMilliseconds,
    Comment(String),
    Status,
    Sync,
    Help,
    Quit,
}

pub const HELP: &str = "\
<enter>        start / pause
s, start       start or resume
p, pause       pause
l, lap         record a lap
lp             record a lap and pause
r, reset       finish the run and save it
ms             toggle hundredths
c <text>       set the comment for this run
status         show the current time
sync           reconcile with the keep-alive holder
q, quit        leave (a running timer keeps its place)";

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "" => ConsoleCommand::StartOrPause,
            "s" | "start" => ConsoleCommand::Start,
            "p" | "pause" => ConsoleCommand::Pause,
            "l" | "lap" => ConsoleCommand::Lap,
            "lp" => ConsoleCommand::LapAndPause,
            "r" | "reset" => ConsoleCommand::Reset,
            "ms" => ConsoleCommand::ToggleMilliseconds,
            "c" | "comment" => ConsoleCommand::Comment(rest.to_string()),
            "status" => ConsoleCommand::Status,
            "sync" => ConsoleCommand::Sync,
            "h" | "help" | "?" => ConsoleCommand::Help,
            "q" | "quit" | "exit" => ConsoleCommand::Quit,
            other => bail!("unknown command '{other}' (type 'help')"),
        };
        Ok(command)
    }
}

pub fn render_status(snapshot: &TimerSnapshot, show_milliseconds: bool) -> String {
    let label = match snapshot.state.status {
        TimerStatus::Idle => "idle",
        TimerStatus::Running => "running",
        TimerStatus::Paused => "paused",
    };
    let mut line = format!(
        "{}  [{label}]",
        format_clock(snapshot.elapsed_ms, show_milliseconds, true)
    );

    let laps = snapshot.state.laps.len();
    if laps > 0 {
        line.push_str(&format!("  {laps} laps"));
    }
    if let Some(stats) = &snapshot.statistics {
        line.push_str(&format!(
            "  avg {}  best {}  worst {}",
            format_clock(stats.average, show_milliseconds, true),
            format_clock(stats.fastest, show_milliseconds, true),
            format_clock(stats.slowest, show_milliseconds, true),
        ));
    }
    line
}

pub fn render_lap(lap: &Lap, delta_ms: Option<i64>, show_milliseconds: bool) -> String {
    let mut line = format!(
        "Lap {:>3}  {}  total {}",
        lap.lap_number,
        format_clock(lap.lap_duration, show_milliseconds, true),
        format_clock(lap.total_time, show_milliseconds, true),
    );
    if let Some(delta) = delta_ms {
        line.push_str(&format!("  ({})", format_delta(delta, show_milliseconds)));
    }
    line
}

/// Runs one console command against the controller and returns what to print.
pub async fn execute(controller: &TimerController, command: ConsoleCommand) -> Result<String, String> {
    let show_ms = controller.show_milliseconds();

    match command {
        ConsoleCommand::StartOrPause => {
            let snapshot = controller.start_or_pause().await;
            Ok(render_status(&snapshot, show_ms))
        }
        ConsoleCommand::Start => Ok(render_status(&controller.start().await, show_ms)),
        ConsoleCommand::Pause => Ok(render_status(&controller.pause().await, show_ms)),
        ConsoleCommand::Lap | ConsoleCommand::LapAndPause => {
            let lap = if command == ConsoleCommand::Lap {
                controller.lap().await
            } else {
                controller.lap_and_pause().await
            };
            let Some(lap) = lap else {
                return Ok("Nothing to lap yet".to_string());
            };
            let state = controller.get_state().await;
            let delta = state.laps.difference_from_previous(lap.lap_number);
            Ok(render_lap(&lap, delta, show_ms))
        }
        ConsoleCommand::Reset => match controller.reset().await {
            Some(stored) => Ok(format!(
                "Saved session {}: {} with {} laps",
                stored.session.id,
                format_clock(stored.session.total_duration_ms, show_ms, true),
                stored.laps.len()
            )),
            None => Ok("Reset".to_string()),
        },
        ConsoleCommand::ToggleMilliseconds => {
            let enabled = controller
                .toggle_show_milliseconds()
                .map_err(|e| e.to_string())?;
            Ok(format!("Hundredths {}", if enabled { "on" } else { "off" }))
        }
        ConsoleCommand::Comment(text) => {
            controller
                .update_current_comment(&text)
                .map_err(|e| e.to_string())?;
            if text.trim().is_empty() {
                Ok("Comment cleared".to_string())
            } else {
                Ok(format!("Comment set to '{text}'"))
            }
        }
        ConsoleCommand::Status => Ok(render_status(&controller.get_snapshot().await, show_ms)),
        ConsoleCommand::Sync => {
            let outcome = controller
                .sync_from_keepalive()
                .await
                .map_err(|e| e.to_string())?;
            let snapshot = controller.get_snapshot().await;
            Ok(format!("{outcome:?}: {}", render_status(&snapshot, show_ms)))
        }
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        db::Database,
        keepalive::{KeepAliveHandle, LogLiveness},
        settings::Settings,
        utils::{clock::ManualClock, Clock},
    };

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!("".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::StartOrPause);
        assert_eq!(" L ".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Lap);
        assert_eq!("lp".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::LapAndPause);
        assert_eq!(
            "c  easy run, flat ".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Comment("easy run, flat".into())
        );
        assert_eq!("quit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Quit);
        assert!("jump".parse::<ConsoleCommand>().is_err());
    }

    #[tokio::test]
    async fn console_session_prints_laps_and_saves() {
        let clock = ManualClock::at(0);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let controller = TimerController::new(
            Database::in_memory().unwrap(),
            Settings::in_memory(),
            KeepAliveHandle::spawn(shared.clone(), Box::new(LogLiveness::new())),
            shared,
            false,
        )
        .await;

        assert_eq!(
            execute(&controller, ConsoleCommand::Lap).await.unwrap(),
            "Nothing to lap yet"
        );
        let started = execute(&controller, ConsoleCommand::StartOrPause).await.unwrap();
        assert!(started.contains("[running]"));

        clock.advance(1_500);
        let first = execute(&controller, ConsoleCommand::Lap).await.unwrap();
        assert_eq!(first, "Lap   1  00:01.50  total 00:01.50");

        clock.advance(2_700);
        let second = execute(&controller, ConsoleCommand::Lap).await.unwrap();
        assert!(second.ends_with("(+1.20)"), "{second}");

        let saved = execute(&controller, ConsoleCommand::Reset).await.unwrap();
        assert!(saved.starts_with("Saved session 1: 00:04.20 with 2 laps"), "{saved}");
    }
}
