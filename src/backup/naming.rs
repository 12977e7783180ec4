use std::fmt::Display;

use chrono::{DateTime, NaiveDateTime, TimeZone};

pub const BACKUP_PREFIX: &str = "laplog_backup_";
pub const BACKUP_EXTENSION: &str = ".json";

const STAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// `laplog_backup_yyyy-MM-dd_HHmmss.json` in the zone of `at`.
pub fn backup_file_name<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{BACKUP_PREFIX}{}{BACKUP_EXTENSION}", at.format(STAMP_FORMAT))
}

/// Unix milliseconds encoded in a backup file name, read in `tz`. `None` for
/// names that are not backups or carry an unparseable stamp.
pub fn parse_backup_timestamp<Tz: TimeZone>(name: &str, tz: &Tz) -> Option<i64> {
    let stamp = name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_EXTENSION)?;
    let naive = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|at| at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn names_carry_a_parseable_stamp() {
        let at = Utc.with_ymd_and_hms(2025, 11, 13, 14, 30, 22).unwrap();
        let name = backup_file_name(&at);
        assert_eq!(name, "laplog_backup_2025-11-13_143022.json");
        assert_eq!(parse_backup_timestamp(&name, &Utc), Some(at.timestamp_millis()));
    }

    #[test]
    fn foreign_names_are_rejected() {
        assert_eq!(parse_backup_timestamp("notes.json", &Utc), None);
        assert_eq!(parse_backup_timestamp("laplog_backup_yesterday.json", &Utc), None);
        assert_eq!(parse_backup_timestamp("laplog_backup_2025-11-13_143022.txt", &Utc), None);
        assert_eq!(parse_backup_timestamp("laplog_history_2025-11-13_143022.json", &Utc), None);
    }
}
