use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{datetime_from_millis, to_i64, to_u64},
    models::{NewSession, Session, SessionWithLaps},
};

use super::laps::{insert_laps_with, laps_by_session};

fn row_to_session(row: &Row) -> Result<Session> {
    let start_time: i64 = row.get("start_time")?;
    let end_time: i64 = row.get("end_time")?;
    let total_duration: i64 = row.get("total_duration")?;

    Ok(Session {
        id: row.get("id")?,
        started_at: datetime_from_millis(start_time, "start_time")?,
        ended_at: datetime_from_millis(end_time, "end_time")?,
        total_duration_ms: to_u64(total_duration, "total_duration")?,
        comment: row.get("comment")?,
    })
}

fn insert_session_row(conn: &Connection, session: &NewSession) -> Result<i64> {
    conn.execute(
        "INSERT INTO sessions (start_time, end_time, total_duration, comment)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            session.started_at.timestamp_millis(),
            session.ended_at.timestamp_millis(),
            to_i64(session.total_duration_ms)?,
            session.comment,
        ],
    )
    .context("failed to insert session")?;

    Ok(conn.last_insert_rowid())
}

/// Inserts the session row and its laps; returns the new id.
fn insert_session_with(conn: &Connection, session: &NewSession) -> Result<i64> {
    let session_id = insert_session_row(conn, session)?;
    insert_laps_with(conn, session_id, &session.laps)?;
    Ok(session_id)
}

fn query_sessions(conn: &Connection) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT id, start_time, end_time, total_duration, comment
         FROM sessions
         ORDER BY start_time DESC, id DESC",
    )?;

    let mut rows = stmt.query([])?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

/// How an archive's sessions join the existing set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Delete every stored session first.
    Replace,
    /// Add alongside the stored sessions, without duplicate detection.
    Merge,
}

impl Database {
    /// Stores the session row only; laps go through `insert_laps`.
    pub async fn insert_session(&self, session: &NewSession) -> Result<i64> {
        let record = session.clone();
        self.execute(move |conn| insert_session_row(conn, &record))
            .await
    }

    /// Stores a finished session together with its laps in one transaction
    /// and returns it as persisted.
    pub async fn insert_session_with_laps(&self, session: NewSession) -> Result<SessionWithLaps> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let session_id = insert_session_with(&tx, &session)?;
            tx.commit()?;

            Ok(SessionWithLaps {
                session: Session {
                    id: session_id,
                    started_at: session.started_at,
                    ended_at: session.ended_at,
                    total_duration_ms: session.total_duration_ms,
                    comment: session.comment,
                },
                laps: session.laps,
            })
        })
        .await
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<Session>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_time, end_time, total_duration, comment
                 FROM sessions
                 WHERE id = ?1",
            )?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    /// All sessions, newest start first.
    pub async fn get_all_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| query_sessions(conn)).await
    }

    /// All sessions, newest first, each with its laps in lap order.
    pub async fn get_sessions_with_laps(&self) -> Result<Vec<SessionWithLaps>> {
        self.execute(|conn| {
            let sessions = query_sessions(conn)?;
            let mut laps = laps_by_session(conn)?;
            Ok(sessions
                .into_iter()
                .map(|session| SessionWithLaps {
                    laps: laps.remove(&session.id).unwrap_or_default(),
                    session,
                })
                .collect())
        })
        .await
    }

    /// Returns whether a session was removed. Its laps go with it.
    pub async fn delete_session(&self, session_id: i64) -> Result<bool> {
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    /// Deletes sessions that started before `cutoff`; returns how many.
    pub async fn delete_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "DELETE FROM sessions WHERE start_time < ?1",
                params![cutoff.timestamp_millis()],
            )?;
            Ok(rows_affected)
        })
        .await
    }

    pub async fn delete_all_sessions(&self) -> Result<usize> {
        self.execute(|conn| Ok(conn.execute("DELETE FROM sessions", [])?))
            .await
    }

    pub async fn update_session_comment(
        &self,
        session_id: i64,
        comment: Option<String>,
    ) -> Result<()> {
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions SET comment = ?1 WHERE id = ?2",
                params![comment, session_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Session {session_id} not found"));
            }

            Ok(())
        })
        .await
    }

    /// Non-empty comments in use, sorted.
    pub async fn get_distinct_comments(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT comment FROM sessions
                 WHERE comment IS NOT NULL AND comment != ''
                 ORDER BY comment ASC",
            )?;
            let comments = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(comments)
        })
        .await
    }

    /// Inserts archived sessions with fresh ids, optionally wiping the
    /// existing set first. Runs as a single transaction.
    pub async fn restore_sessions(
        &self,
        sessions: Vec<NewSession>,
        mode: RestoreMode,
    ) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            if mode == RestoreMode::Replace {
                tx.execute("DELETE FROM sessions", [])
                    .context("failed to clear sessions before restore")?;
            }

            for session in &sessions {
                insert_session_with(&tx, session)?;
            }

            tx.commit()?;
            Ok(sessions.len())
        })
        .await
    }
}
