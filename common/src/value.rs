use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Dense document identifier assigned by the document store. `0` is reserved
/// and never handed out.
pub type DocId = u32;

pub const RESERVED_DOC_ID: DocId = 0;

/// Typed value of a tracked filter column, bound to a document at apply time.
///
/// Comparison is type-preserving: comparing values of different variants is
/// always false rather than coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    /// Seconds since midnight, signed (MySQL TIME can be negative).
    Time(i32),
    /// Seconds since the Unix epoch.
    Epoch(u64),
}

impl FilterValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FilterValue::Null => "null",
            FilterValue::Bool(_) => "bool",
            FilterValue::Int(_) => "int",
            FilterValue::UInt(_) => "uint",
            FilterValue::Double(_) => "double",
            FilterValue::Str(_) => "string",
            FilterValue::Time(_) => "time",
            FilterValue::Epoch(_) => "epoch",
        }
    }
}

impl Display for FilterValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => write!(f, "NULL"),
            FilterValue::Bool(v) => write!(f, "{}", v),
            FilterValue::Int(v) => write!(f, "{}", v),
            FilterValue::UInt(v) => write!(f, "{}", v),
            FilterValue::Double(v) => write!(f, "{}", v),
            FilterValue::Str(v) => write!(f, "{}", v),
            FilterValue::Time(v) => write!(f, "{}", v),
            FilterValue::Epoch(v) => write!(f, "{}", v),
        }
    }
}

/// Column name to filter value binding carried by documents and row events.
pub type FilterMap = BTreeMap<String, FilterValue>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cross_type_compare_is_false() {
        assert_ne!(FilterValue::Int(1), FilterValue::UInt(1));
        assert_ne!(FilterValue::Str("1".to_string()), FilterValue::Int(1));
        assert_eq!(FilterValue::Int(1), FilterValue::Int(1));
    }

    #[test]
    fn display() {
        assert_eq!(FilterValue::Null.to_string(), "NULL");
        assert_eq!(FilterValue::Time(-3600).to_string(), "-3600");
    }
}
