use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{to_i64, to_u32, to_u64},
};
use crate::timer::Lap;

fn row_to_lap(row: &Row) -> Result<Lap> {
    let lap_number: i64 = row.get("lap_number")?;
    let total_time: i64 = row.get("total_time")?;
    let lap_duration: i64 = row.get("lap_duration")?;

    Ok(Lap {
        lap_number: to_u32(lap_number, "lap_number")?,
        total_time: to_u64(total_time, "total_time")?,
        lap_duration: to_u64(lap_duration, "lap_duration")?,
    })
}

pub(super) fn insert_laps_with(conn: &Connection, session_id: i64, laps: &[Lap]) -> Result<()> {
    if laps.is_empty() {
        return Ok(());
    }

    let mut stmt = conn.prepare_cached(
        "INSERT INTO laps (session_id, lap_number, total_time, lap_duration)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for lap in laps {
        stmt.execute(params![
            session_id,
            lap.lap_number,
            to_i64(lap.total_time)?,
            to_i64(lap.lap_duration)?,
        ])
        .with_context(|| format!("failed to insert lap {} of session {session_id}", lap.lap_number))?;
    }
    Ok(())
}

/// Every stored lap grouped by session, each group in lap order.
pub(super) fn laps_by_session(conn: &Connection) -> Result<HashMap<i64, Vec<Lap>>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, lap_number, total_time, lap_duration
         FROM laps
         ORDER BY session_id, lap_number ASC",
    )?;

    let mut rows = stmt.query([])?;
    let mut grouped: HashMap<i64, Vec<Lap>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let session_id: i64 = row.get("session_id")?;
        grouped.entry(session_id).or_default().push(row_to_lap(row)?);
    }
    Ok(grouped)
}

impl Database {
    pub async fn insert_laps(&self, session_id: i64, laps: &[Lap]) -> Result<()> {
        let laps = laps.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            insert_laps_with(&tx, session_id, &laps)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_laps_for_session(&self, session_id: i64) -> Result<Vec<Lap>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT lap_number, total_time, lap_duration
                 FROM laps
                 WHERE session_id = ?1
                 ORDER BY lap_number ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut laps = Vec::new();
            while let Some(row) = rows.next()? {
                laps.push(row_to_lap(row)?);
            }
            Ok(laps)
        })
        .await
    }
}
