use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use common::err::{CResult, Error};

/// Half-open transaction-number interval `[start, end)`.
///
/// The canonical string form is inclusive: `[1, 4)` renders as `1-3` and a
/// single transaction `[5, 6)` renders as `5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    start: u64,
    end: u64,
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.end == self.start + 1 {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end - 1)
        }
    }
}

impl Interval {
    /// Validates `start > 0` and `end > start`.
    pub fn check_and_new(start: u64, end: u64) -> CResult<Self> {
        if start == 0 {
            return Err(Error::InvalidInput("GTID interval start must be positive".to_string()));
        }
        if end <= start {
            return Err(Error::InvalidInput(format!(
                "GTID interval end {} must exceed start {}",
                end, start
            )));
        }
        Ok(Interval { start, end })
    }

    /// Parses the canonical token: `N` or `lo-hi` with `hi` inclusive.
    pub fn parse(token: &str) -> CResult<Self> {
        let token = token.trim();
        match token.split_once('-') {
            None => {
                let start: u64 = token
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid GTID interval: {}", token)))?;
                Interval::check_and_new(start, start + 1)
            }
            Some((lo, hi)) => {
                let start: u64 = lo
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid GTID interval: {}", token)))?;
                let end_inclusive: u64 = hi
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid GTID interval: {}", token)))?;
                Interval::check_and_new(start, end_inclusive + 1)
            }
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn contains(&self, gno: u64) -> bool {
        gno >= self.start && gno < self.end
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_number_is_half_open() {
        let interval = Interval::parse("5").unwrap();
        assert_eq!(interval.start(), 5);
        assert_eq!(interval.end(), 6);
        assert_eq!(interval.to_string(), "5");
    }

    #[test]
    fn range_end_is_inclusive_in_text() {
        let interval = Interval::parse("1-3").unwrap();
        assert_eq!(interval.start(), 1);
        assert_eq!(interval.end(), 4);
        assert_eq!(interval.to_string(), "1-3");
    }

    #[test]
    fn validation() {
        assert!(Interval::parse("0").is_err());
        assert!(Interval::check_and_new(3, 3).is_err());
        assert!(Interval::check_and_new(3, 2).is_err());
        assert!(Interval::parse("x-y").is_err());
    }
}
