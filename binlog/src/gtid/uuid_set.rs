use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use uuid::Uuid;

use common::err::{CResult, Error};

use crate::gtid::Interval;

/// Intervals owned by one source UUID, kept sorted and merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UuidSet {
    source_id: String,
    intervals: Vec<Interval>,
}

impl Display for UuidSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_id)?;
        for interval in &self.intervals {
            write!(f, ":{}", interval)?;
        }
        Ok(())
    }
}

impl UuidSet {
    pub fn new(source_id: String, intervals: Vec<Interval>) -> Self {
        let mut set = UuidSet { source_id, intervals };
        set.combine();
        set
    }

    /// Parses `uuid:interval[:interval...]` with a canonical lowercase UUID.
    pub fn parse(token: &str) -> CResult<Self> {
        let (uuid_part, ranges) = token
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("GTID set entry missing colon: {}", token)))?;
        let source_id = parse_uuid(uuid_part)?;

        let mut intervals = Vec::new();
        for range in ranges.split(':') {
            intervals.push(Interval::parse(range)?);
        }
        if intervals.is_empty() {
            return Err(Error::InvalidInput(format!("GTID set entry has no intervals: {}", token)));
        }
        Ok(UuidSet::new(source_id, intervals))
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn contains(&self, gno: u64) -> bool {
        self.intervals.iter().any(|interval| interval.contains(gno))
    }

    /// Adds a single transaction number, merging into neighbours.
    pub fn add_gno(&mut self, gno: u64) -> CResult<()> {
        if gno == 0 {
            return Err(Error::InvalidInput("Gno can't be zero".to_string()));
        }
        self.intervals.push(Interval::check_and_new(gno, gno + 1)?);
        self.combine();
        Ok(())
    }

    pub fn push_interval(&mut self, interval: Interval) {
        self.intervals.push(interval);
        self.combine();
    }

    /// Sorts and merges overlapping or adjacent intervals.
    fn combine(&mut self) {
        if self.intervals.is_empty() {
            return;
        }
        self.intervals.sort_by_key(|interval| interval.start());
        let mut merged: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for interval in self.intervals.drain(..) {
            let absorbed = match merged.last() {
                Some(last) if interval.start() <= last.end() => Some((last.start(), last.end().max(interval.end()))),
                _ => None,
            };
            match absorbed {
                Some((start, end)) => {
                    merged.pop();
                    // Both sides were validated on construction.
                    merged.push(Interval::check_and_new(start, end).expect("merged interval"));
                }
                None => merged.push(interval),
            }
        }
        self.intervals = merged;
    }
}

/// Validates and lowercases a textual UUID.
pub fn parse_uuid(text: &str) -> CResult<String> {
    if text.len() != 36 {
        return Err(Error::InvalidInput(format!("invalid UUID length: {}", text)));
    }
    let parsed = Uuid::parse_str(text).map_err(|_| Error::InvalidInput(format!("invalid UUID: {}", text)))?;
    Ok(parsed.hyphenated().to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    const SID: &str = "24bc7850-2c16-11e6-a073-0242ac110001";

    #[test]
    fn parse_and_display() {
        let set = UuidSet::parse(&format!("{}:1-3:7-9", SID)).unwrap();
        assert_eq!(set.to_string(), format!("{}:1-3:7-9", SID));
        assert!(set.contains(2));
        assert!(!set.contains(5));
    }

    #[test]
    fn adjacent_intervals_merge() {
        let set = UuidSet::parse(&format!("{}:1-191:192-199", SID)).unwrap();
        assert_eq!(set.intervals().len(), 1);
        assert_eq!(set.to_string(), format!("{}:1-199", SID));
    }

    #[test]
    fn gap_intervals_stay_apart() {
        let set = UuidSet::parse(&format!("{}:1-191:193-199", SID)).unwrap();
        assert_eq!(set.intervals().len(), 2);
    }

    #[test]
    fn add_gno_joins_gap() {
        let mut set = UuidSet::parse(&format!("{}:3-4:6-7", SID)).unwrap();
        set.add_gno(5).unwrap();
        assert_eq!(set.to_string(), format!("{}:3-7", SID));
    }

    #[test]
    fn uuid_validation() {
        assert!(parse_uuid("short").is_err());
        assert!(parse_uuid("24bc7850-2c16-11e6-a073-0242ac11000Z").is_err());
        assert_eq!(parse_uuid("24BC7850-2C16-11E6-A073-0242AC110001").unwrap(), SID);
    }
}
