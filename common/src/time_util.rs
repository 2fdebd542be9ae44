use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use crate::err::{CResult, Error};

/// Current Unix time in seconds.
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parses a zone offset of the form "+09:00" / "-05:30".
pub fn parse_zone_offset(zone: &str) -> CResult<FixedOffset> {
    let bytes = zone.as_bytes();
    if bytes.len() != 6 || bytes[3] != b':' || (bytes[0] != b'+' && bytes[0] != b'-') {
        return Err(Error::InvalidInput(format!("invalid timezone offset: {}", zone)));
    }
    let hours: i32 = zone[1..3]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid timezone offset: {}", zone)))?;
    let minutes: i32 = zone[4..6]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid timezone offset: {}", zone)))?;
    let total = hours * 3600 + minutes * 60;
    let offset = if bytes[0] == b'+' {
        FixedOffset::east_opt(total)
    } else {
        FixedOffset::west_opt(total)
    };
    offset.ok_or_else(|| Error::InvalidInput(format!("invalid timezone offset: {}", zone)))
}

/// Converts a "YYYY-MM-DD hh:mm:ss[.ffffff]" datetime string, interpreted in
/// `zone`, to epoch seconds. Negative results (pre-1970) are rejected.
pub fn datetime_to_epoch(value: &str, zone: FixedOffset) -> CResult<u64> {
    let trimmed = value.split('.').next().unwrap_or(value);
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| Error::InvalidInput(format!("invalid datetime: {}", value)))?;
    let resolved = zone
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| Error::InvalidInput(format!("ambiguous datetime: {}", value)))?;
    let seconds = resolved.timestamp();
    if seconds < 0 {
        return Err(Error::InvalidInput(format!("datetime before epoch: {}", value)));
    }
    Ok(seconds as u64)
}

/// Converts a "YYYY-MM-DD" date string at midnight in `zone` to epoch seconds.
pub fn date_to_epoch(value: &str, zone: FixedOffset) -> CResult<u64> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::InvalidInput(format!("invalid date: {}", value)))?;
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::InvalidInput(format!("invalid date: {}", value)))?;
    let resolved = zone
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| Error::InvalidInput(format!("ambiguous date: {}", value)))?;
    let seconds = resolved.timestamp();
    if seconds < 0 {
        return Err(Error::InvalidInput(format!("date before epoch: {}", value)));
    }
    Ok(seconds as u64)
}

/// Converts "[-]hh:mm:ss[.ffffff]" to signed seconds since midnight.
pub fn time_to_seconds(value: &str) -> CResult<i32> {
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let rest = rest.split('.').next().unwrap_or(rest);
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidInput(format!("invalid time: {}", value)));
    }
    let hours: i32 = parts[0]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid time: {}", value)))?;
    let minutes: i32 = parts[1]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid time: {}", value)))?;
    let seconds: i32 = parts[2]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid time: {}", value)))?;
    if minutes >= 60 || seconds >= 60 || minutes < 0 || seconds < 0 || hours < 0 {
        return Err(Error::InvalidInput(format!("invalid time: {}", value)));
    }
    let total = hours * 3600 + minutes * 60 + seconds;
    Ok(if negative { -total } else { total })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zone_offsets() {
        assert_eq!(parse_zone_offset("+00:00").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_zone_offset("+09:00").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(parse_zone_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert!(parse_zone_offset("UTC").is_err());
        assert!(parse_zone_offset("+0900").is_err());
    }

    #[test]
    fn datetime_conversion() {
        let utc = parse_zone_offset("+00:00").unwrap();
        assert_eq!(datetime_to_epoch("1970-01-01 00:00:01", utc).unwrap(), 1);
        assert_eq!(datetime_to_epoch("2024-01-01 00:00:00", utc).unwrap(), 1704067200);

        // The same wall-clock instant in +09:00 is nine hours earlier in UTC.
        let jst = parse_zone_offset("+09:00").unwrap();
        assert_eq!(datetime_to_epoch("2024-01-01 09:00:00", jst).unwrap(), 1704067200);

        assert!(datetime_to_epoch("not a date", utc).is_err());
    }

    #[test]
    fn date_conversion() {
        let utc = parse_zone_offset("+00:00").unwrap();
        assert_eq!(date_to_epoch("2024-01-01", utc).unwrap(), 1704067200);
    }

    #[test]
    fn time_of_day() {
        assert_eq!(time_to_seconds("00:00:00").unwrap(), 0);
        assert_eq!(time_to_seconds("01:02:03").unwrap(), 3723);
        assert_eq!(time_to_seconds("-01:00:00").unwrap(), -3600);
        assert_eq!(time_to_seconds("838:59:59").unwrap(), 838 * 3600 + 59 * 60 + 59);
        assert!(time_to_seconds("25:61:00").is_err());
        assert!(time_to_seconds("noon").is_err());
    }
}
