use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub lap_number: u32,
    pub total_time: u64,
    pub lap_duration: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LapStatistics {
    pub average: u64,
    /// Midpoint of the fastest and slowest lap, not the statistical median.
    pub median: u64,
    pub fastest: u64,
    pub slowest: u64,
}

/// Append-only laps of the current run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LapLedger {
    laps: Vec<Lap>,
}

impl LapLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_laps(laps: Vec<Lap>) -> Self {
        Self { laps }
    }

    pub fn as_slice(&self) -> &[Lap] {
        &self.laps
    }

    pub fn into_vec(self) -> Vec<Lap> {
        self.laps
    }

    pub fn len(&self) -> usize {
        self.laps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty()
    }

    pub fn last(&self) -> Option<&Lap> {
        self.laps.last()
    }

    /// Marks a lap at `elapsed_ms`. Nothing is recorded at zero elapsed time.
    pub fn append(&mut self, elapsed_ms: u64) -> Option<Lap> {
        if elapsed_ms == 0 {
            return None;
        }

        let previous_total = self.laps.last().map_or(0, |lap| lap.total_time);
        let lap = Lap {
            lap_number: self.laps.len() as u32 + 1,
            total_time: elapsed_ms,
            lap_duration: elapsed_ms.saturating_sub(previous_total),
        };
        self.laps.push(lap);
        Some(lap)
    }

    pub fn statistics(&self) -> Option<LapStatistics> {
        lap_statistics(&self.laps)
    }

    pub fn difference_from_previous(&self, lap_number: u32) -> Option<i64> {
        difference_from_previous(&self.laps, lap_number)
    }

    pub fn clear(&mut self) {
        self.laps.clear();
    }
}

/// Average and midpoint statistics; `None` below two laps.
pub fn lap_statistics(laps: &[Lap]) -> Option<LapStatistics> {
    if laps.len() < 2 {
        return None;
    }

    let durations = laps.iter().map(|lap| lap.lap_duration);
    let fastest = durations.clone().min()?;
    let slowest = durations.clone().max()?;
    let sum: u128 = durations.map(u128::from).sum();

    Some(LapStatistics {
        average: (sum / laps.len() as u128) as u64,
        median: (fastest + slowest) / 2,
        fastest,
        slowest,
    })
}

/// `lap_duration(n) - lap_duration(n - 1)`, looked up by lap number rather
/// than position.
pub fn difference_from_previous(laps: &[Lap], lap_number: u32) -> Option<i64> {
    let current = laps.iter().find(|lap| lap.lap_number == lap_number)?;
    let previous_number = lap_number.checked_sub(1)?;
    let previous = laps.iter().find(|lap| lap.lap_number == previous_number)?;
    Some(current.lap_duration as i64 - previous.lap_duration as i64)
}

/// Serialized form stored in the snapshot: a flat JSON array of lap records.
pub fn encode_laps(laps: &[Lap]) -> Option<String> {
    if laps.is_empty() {
        return None;
    }
    serde_json::to_string(laps).ok()
}

/// Parses a stored lap list, dropping entries that do not decode or carry a
/// non-positive lap number. An unparseable document yields no laps.
pub fn decode_laps(raw: &str) -> Vec<Lap> {
    let entries: Vec<Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("discarding unreadable lap list: {err}");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<Lap>(entry).ok())
        .filter(|lap| lap.lap_number > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(marks: &[u64]) -> LapLedger {
        let mut ledger = LapLedger::new();
        for mark in marks {
            ledger.append(*mark);
        }
        ledger
    }

    #[test]
    fn numbers_laps_and_measures_from_previous_mark() {
        let ledger = ledger(&[1_500, 4_200]);
        assert_eq!(
            ledger.as_slice(),
            &[
                Lap { lap_number: 1, total_time: 1_500, lap_duration: 1_500 },
                Lap { lap_number: 2, total_time: 4_200, lap_duration: 2_700 },
            ]
        );
    }

    #[test]
    fn zero_elapsed_is_ignored() {
        let mut ledger = ledger(&[800]);
        assert_eq!(ledger.append(0), None);
        assert_eq!(ledger.len(), 1);

        let mut empty = LapLedger::new();
        assert_eq!(empty.append(0), None);
        assert!(empty.is_empty());
    }

    #[test]
    fn durations_sum_to_last_total() {
        let ledger = ledger(&[320, 1_000, 1_001, 7_777, 12_000]);
        let sum: u64 = ledger.as_slice().iter().map(|lap| lap.lap_duration).sum();
        assert_eq!(sum, ledger.last().unwrap().total_time);
    }

    #[test]
    fn median_is_midpoint_of_extremes() {
        // durations 1000, 1000, 4000: true median 1000, midpoint 2500
        let ledger = ledger(&[1_000, 2_000, 6_000]);
        let stats = ledger.statistics().unwrap();
        assert_eq!(stats.average, 2_000);
        assert_eq!(stats.median, 2_500);
        assert_eq!(stats.fastest, 1_000);
        assert_eq!(stats.slowest, 4_000);
    }

    #[test]
    fn average_truncates() {
        let stats = ledger(&[1_000, 2_001]).statistics().unwrap();
        assert_eq!(stats.average, 1_000);
        assert!(ledger(&[1_000]).statistics().is_none());
    }

    #[test]
    fn difference_uses_lap_numbers() {
        let laps = vec![
            Lap { lap_number: 3, total_time: 9_000, lap_duration: 2_500 },
            Lap { lap_number: 1, total_time: 3_000, lap_duration: 3_000 },
        ];
        assert_eq!(difference_from_previous(&laps, 3), None);
        assert_eq!(difference_from_previous(&laps, 1), None);

        let ledger = ledger(&[3_000, 5_000, 9_000]);
        assert_eq!(ledger.difference_from_previous(2), Some(-1_000));
        assert_eq!(ledger.difference_from_previous(3), Some(2_000));
    }

    #[test]
    fn decode_skips_malformed_entries() {
        let raw = r#"[
            {"lapNumber":1,"totalTime":1500,"lapDuration":1500},
            {"lapNumber":"two","totalTime":4200,"lapDuration":2700},
            {"lapNumber":0,"totalTime":10,"lapDuration":10},
            {"lapNumber":3,"totalTime":9000,"lapDuration":4800}
        ]"#;
        let laps = decode_laps(raw);
        assert_eq!(laps.len(), 2);
        assert_eq!(laps[1].lap_number, 3);

        assert!(decode_laps("not json").is_empty());
    }

    #[test]
    fn encoded_laps_decode_losslessly() {
        let ledger = ledger(&[1, u32::MAX as u64 * 3, u32::MAX as u64 * 5]);
        let encoded = encode_laps(ledger.as_slice()).unwrap();
        assert_eq!(decode_laps(&encoded), ledger.into_vec());
        assert_eq!(encode_laps(&[]), None);
    }
}
