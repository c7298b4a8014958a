//! Pluggable index comparators
//!
//! Each comparator is a pure, total, deterministic order over two raw
//! record values. The set is a closed enum so index ordering is fully
//! determined by the index definition and current record contents.
//!
//! Policy for values a numeric comparator cannot parse: they sort before
//! every parsable value, ordered byte-wise among themselves. Index creation
//! and writes therefore never fail because of record contents.

use burrow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordering function for a secondary index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    /// Byte-wise lexicographic order of the raw value
    Bytes,
    /// Signed 64-bit integer order
    Int,
    /// Unsigned 64-bit integer order
    Uint,
    /// IEEE-754 double order; NaN sorts greater than every other value
    Float,
    /// Order by a field extracted from a JSON document value
    ///
    /// `path` is a dot-separated field path; array elements are addressed
    /// by numeric segments. A missing field (or a value that is not valid
    /// JSON) sorts before all present fields.
    Json { path: String },
}

impl Comparator {
    /// Resolve a comparator from its CLI-facing name
    ///
    /// Recognized names: `string`, `int`, `uint`, `float`, `json` (the
    /// last requires a non-empty field path argument).
    pub fn parse(kind: &str, arg: Option<&str>) -> Result<Self> {
        match kind {
            "string" => Ok(Self::Bytes),
            "int" => Ok(Self::Int),
            "uint" => Ok(Self::Uint),
            "float" => Ok(Self::Float),
            "json" => match arg {
                Some(path) if !path.is_empty() => Ok(Self::Json { path: path.to_string() }),
                _ => Err(Error::InvalidComparatorArgument(
                    "json comparator requires a field path".into(),
                )),
            },
            other => Err(Error::InvalidComparatorArgument(format!(
                "unknown comparator type: {other}"
            ))),
        }
    }

    /// Compare two raw record values under this order
    #[must_use]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Bytes => a.cmp(b),
            Self::Int => compare_parsed(a, b, parse_num::<i64>(a), parse_num::<i64>(b), i64::cmp),
            Self::Uint => compare_parsed(a, b, parse_num::<u64>(a), parse_num::<u64>(b), u64::cmp),
            Self::Float => compare_parsed(
                a,
                b,
                parse_num::<f64>(a),
                parse_num::<f64>(b),
                |x, y| order_floats(*x, *y),
            ),
            Self::Json { path } => {
                compare_parsed(a, b, json_field(a, path), json_field(b, path), JsonKey::order)
            }
        }
    }
}

impl std::str::FromStr for Comparator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

/// Rank unparsable values before parsable ones; compare parsable pairs
/// with `cmp` and unparsable pairs byte-wise
fn compare_parsed<T>(
    a_raw: &[u8],
    b_raw: &[u8],
    a: Option<T>,
    b: Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (None, None) => a_raw.cmp(b_raw),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => cmp(&x, &y),
    }
}

fn parse_num<T: std::str::FromStr>(value: &[u8]) -> Option<T> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

/// Total order over f64 with NaN greater than everything else
fn order_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Extracted JSON field, ranked by type for a fixed cross-type order
#[derive(Debug)]
enum JsonKey {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Arrays and objects compare by their serialized form
    Composite(String),
}

impl JsonKey {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Number(_) => 2,
            Self::String(_) => 3,
            Self::Composite(_) => 4,
        }
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        a.rank().cmp(&b.rank()).then_with(|| match (a, b) {
            (Self::Bool(x), Self::Bool(y)) => x.cmp(y),
            (Self::Number(x), Self::Number(y)) => order_floats(*x, *y),
            (Self::String(x), Self::String(y)) => x.cmp(y),
            (Self::Composite(x), Self::Composite(y)) => x.cmp(y),
            _ => Ordering::Equal,
        })
    }
}

impl From<&serde_json::Value> for JsonKey {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s.clone()),
            other => Self::Composite(other.to_string()),
        }
    }
}

/// Extract the field addressed by a dot-separated path from a JSON value
fn json_field(value: &[u8], path: &str) -> Option<JsonKey> {
    let doc: serde_json::Value = serde_json::from_slice(value).ok()?;
    let mut cur = &doc;
    for segment in path.split('.') {
        cur = match cur {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(JsonKey::from(cur))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(Comparator::parse("string", None).unwrap(), Comparator::Bytes);
        assert_eq!(Comparator::parse("int", None).unwrap(), Comparator::Int);
        assert_eq!(Comparator::parse("uint", None).unwrap(), Comparator::Uint);
        assert_eq!(Comparator::parse("float", None).unwrap(), Comparator::Float);
        assert_eq!(
            Comparator::parse("json", Some("user.age")).unwrap(),
            Comparator::Json { path: "user.age".into() }
        );

        assert!(Comparator::parse("json", None).is_err());
        assert!(Comparator::parse("json", Some("")).is_err());
        assert!(Comparator::parse("btree", None).is_err());
    }

    #[test]
    fn test_bytes_order() {
        let c = Comparator::Bytes;
        assert_eq!(c.compare(b"apple", b"banana"), Ordering::Less);
        assert_eq!(c.compare(b"b", b"apple"), Ordering::Greater);
        assert_eq!(c.compare(b"x", b"x"), Ordering::Equal);
        // Lexicographic, not numeric
        assert_eq!(c.compare(b"10", b"2"), Ordering::Less);
    }

    #[test]
    fn test_int_order() {
        let c = Comparator::Int;
        assert_eq!(c.compare(b"2", b"10"), Ordering::Less);
        assert_eq!(c.compare(b"-5", b"3"), Ordering::Less);
        assert_eq!(c.compare(b" 7 ", b"7"), Ordering::Equal);
        // Unparsable sorts before all parsable
        assert_eq!(c.compare(b"abc", b"-9999"), Ordering::Less);
        assert_eq!(c.compare(b"", b"0"), Ordering::Less);
        // Unparsable pair falls back to byte order
        assert_eq!(c.compare(b"abc", b"abd"), Ordering::Less);
    }

    #[test]
    fn test_uint_order() {
        let c = Comparator::Uint;
        assert_eq!(c.compare(b"2", b"10"), Ordering::Less);
        // Negative numbers are unparsable as uint
        assert_eq!(c.compare(b"-1", b"0"), Ordering::Less);
    }

    #[test]
    fn test_float_order() {
        let c = Comparator::Float;
        assert_eq!(c.compare(b"1.5", b"2"), Ordering::Less);
        assert_eq!(c.compare(b"-0.5", b"0.25"), Ordering::Less);
        // NaN greater than everything, equal to itself
        assert_eq!(c.compare(b"NaN", b"1e308"), Ordering::Greater);
        assert_eq!(c.compare(b"1e308", b"NaN"), Ordering::Less);
        assert_eq!(c.compare(b"NaN", b"NaN"), Ordering::Equal);
        // Unparsable still sorts below NaN
        assert_eq!(c.compare(b"zzz", b"NaN"), Ordering::Less);
    }

    #[test]
    fn test_json_string_field() {
        let c = Comparator::Json { path: "name".into() };
        assert_eq!(
            c.compare(br#"{"name":"alice"}"#, br#"{"name":"bob"}"#),
            Ordering::Less
        );
    }

    #[test]
    fn test_json_numeric_field() {
        let c = Comparator::Json { path: "age".into() };
        // Numeric, not lexicographic
        assert_eq!(
            c.compare(br#"{"age":9}"#, br#"{"age":10}"#),
            Ordering::Less
        );
    }

    #[test]
    fn test_json_nested_path() {
        let c = Comparator::Json { path: "user.scores.0".into() };
        assert_eq!(
            c.compare(
                br#"{"user":{"scores":[3]}}"#,
                br#"{"user":{"scores":[12]}}"#
            ),
            Ordering::Less
        );
    }

    #[test]
    fn test_json_missing_sorts_first() {
        let c = Comparator::Json { path: "age".into() };
        assert_eq!(c.compare(br#"{"name":"x"}"#, br#"{"age":0}"#), Ordering::Less);
        assert_eq!(c.compare(b"not json", br#"{"age":0}"#), Ordering::Less);
    }

    #[test]
    fn test_json_type_rank() {
        let c = Comparator::Json { path: "v".into() };
        // null < bool < number < string
        assert_eq!(c.compare(br#"{"v":null}"#, br#"{"v":false}"#), Ordering::Less);
        assert_eq!(c.compare(br#"{"v":true}"#, br#"{"v":0}"#), Ordering::Less);
        assert_eq!(c.compare(br#"{"v":99}"#, br#"{"v":""}"#), Ordering::Less);
    }
}
