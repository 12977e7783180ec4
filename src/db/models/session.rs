//! Stored sessions: finished runs and their laps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{FinishedRun, Lap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub comment: Option<String>,
}

/// A session before storage has assigned its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub comment: Option<String>,
    pub laps: Vec<Lap>,
}

impl NewSession {
    /// Builds the record for a finished run. Blank comments are dropped.
    pub fn from_run(run: FinishedRun, comment: Option<String>) -> Self {
        Self {
            started_at: run.started_at,
            ended_at: run.ended_at,
            total_duration_ms: run.total_duration_ms,
            comment: comment.filter(|text| !text.trim().is_empty()),
            laps: run.laps,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionWithLaps {
    #[serde(flatten)]
    pub session: Session,
    pub laps: Vec<Lap>,
}
