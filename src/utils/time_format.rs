//! Display strings for elapsed times and lap differences.

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60_000;
const MS_PER_HOUR: u64 = 3_600_000;

/// Unicode minus sign, same advance width as `+` in most fonts.
pub const MINUS_SIGN: char = '\u{2212}';

/// Formats `ms` as `HH:MM:SS[.cc]`, or `MM:SS[.cc]` when the hour count is zero.
///
/// With `include_sub_second` off and `round_if_no_sub_second` on, a remainder of
/// 500 ms or more carries into the next whole second. The hundredths field is
/// always truncated from the unrounded input.
pub fn format_clock(ms: u64, include_sub_second: bool, round_if_no_sub_second: bool) -> String {
    let remainder = ms % MS_PER_SECOND;
    let adjusted = if !include_sub_second && round_if_no_sub_second && remainder >= 500 {
        ms + MS_PER_SECOND - remainder
    } else {
        ms
    };

    let hours = adjusted / MS_PER_HOUR;
    let minutes = (adjusted % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (adjusted % MS_PER_MINUTE) / MS_PER_SECOND;
    let hundredths = remainder / 10;

    match (hours > 0, include_sub_second) {
        (true, true) => format!("{hours:02}:{minutes:02}:{seconds:02}.{hundredths:02}"),
        (true, false) => format!("{hours:02}:{minutes:02}:{seconds:02}"),
        (false, true) => format!("{minutes:02}:{seconds:02}.{hundredths:02}"),
        (false, false) => format!("{minutes:02}:{seconds:02}"),
    }
}

/// Signed seconds between two lap durations, e.g. `+1.25` or `−0.40`.
pub fn format_delta(diff_ms: i64, include_sub_second: bool) -> String {
    let sign = if diff_ms >= 0 { '+' } else { MINUS_SIGN };
    let magnitude = diff_ms.unsigned_abs();
    let seconds = magnitude / MS_PER_SECOND;
    let hundredths = (magnitude % MS_PER_SECOND) / 10;

    if include_sub_second {
        format!("{sign}{seconds}.{hundredths:02}")
    } else {
        format!("{sign}{seconds}")
    }
}

/// Whole-second duration without rounding, used by the CSV export.
pub fn format_duration(ms: u64) -> String {
    format_clock(ms, false, false)
}
