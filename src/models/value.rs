use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geometry::Geometry;

/// The kind of value an attribute holds.
///
/// - `Bool`, `Int`, `Double`, `Text`: scalar attributes
/// - `Timestamp`: UTC instant
/// - `Geometry`: spatial attribute, carries a CRS on its descriptor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Double,
    Text,
    Timestamp,
    Geometry,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
            Self::Geometry => "geometry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "double" => Some(Self::Double),
            "text" => Some(Self::Text),
            "timestamp" => Some(Self::Timestamp),
            "geometry" => Some(Self::Geometry),
            _ => None,
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Geometry(Geometry),
}

impl Value {
    /// The kind of a non-null value.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Double(_) => Some(ValueKind::Double),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Timestamp(_) => Some(ValueKind::Timestamp),
            Self::Geometry(_) => Some(ValueKind::Geometry),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            Self::Geometry(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value may be stored in an attribute of `kind`.
    /// Integers are accepted by double attributes.
    pub fn conforms_to(&self, kind: ValueKind) -> bool {
        match (self.kind(), kind) {
            (None, _) => true,
            (Some(ValueKind::Int), ValueKind::Double) => true,
            (Some(k), expected) => k == expected,
        }
    }

    fn kind_name(&self) -> &'static str {
        self.kind().map(|k| k.as_str()).unwrap_or("null")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Double(d) => write!(f, "{}", d),
            Self::Text(s) => write!(f, "{}", s),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Geometry(g) => write!(f, "{}", g),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Geometry> for Value {
    fn from(v: Geometry) -> Self {
        Self::Geometry(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Natural ordering used by sorting and comparison predicates.
///
/// Nulls sort after every non-null value. Integers and doubles compare
/// numerically with each other. Values of unrelated kinds order by kind name so
/// the ordering stays total.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Geometry(x), Value::Geometry(y)) => x.envelope().cmp_lower_left(&y.envelope()),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or_else(|| x.total_cmp(y)),
        (Value::Int(x), Value::Double(y)) => cmp_int_double(*x, *y),
        (Value::Double(x), Value::Int(y)) => cmp_int_double(*y, *x).reverse(),
        _ => a.kind_name().cmp(b.kind_name()),
    }
}

/// Exact comparison of an integer with a double, without rounding `i`.
fn cmp_int_double(i: i64, d: f64) -> Ordering {
    // 2^63: the first double above every i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if d.is_nan() || d >= LIMIT {
        return Ordering::Less;
    }
    if d < -LIMIT {
        return Ordering::Greater;
    }
    let whole = d.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&d).unwrap_or(Ordering::Equal),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_last() {
        assert_eq!(compare_values(&Value::Null, &Value::Int(1)), Ordering::Greater);
        assert_eq!(compare_values(&Value::Int(1), &Value::Null), Ordering::Less);
    }

    #[test]
    fn ints_and_doubles_compare_numerically() {
        assert_eq!(compare_values(&Value::Int(2), &Value::Double(2.5)), Ordering::Less);
        assert_eq!(compare_values(&Value::Double(3.0), &Value::Int(3)), Ordering::Equal);
        assert_eq!(compare_values(&Value::Int(-2), &Value::Double(-2.5)), Ordering::Greater);
        assert_eq!(compare_values(&Value::Double(-0.0), &Value::Int(0)), Ordering::Equal);
    }

    #[test]
    fn large_ints_compare_exactly_with_doubles() {
        let big = 1i64 << 53;
        let (lo, hi, d) = (Value::Int(big), Value::Int(big + 1), Value::Double(big as f64));
        assert_eq!(compare_values(&lo, &d), Ordering::Equal);
        assert_eq!(compare_values(&hi, &d), Ordering::Greater);
        assert_eq!(compare_values(&d, &hi), Ordering::Less);
        assert_eq!(compare_values(&Value::Int(i64::MAX), &Value::Double(9.3e18)), Ordering::Less);
        assert_eq!(compare_values(&Value::Int(i64::MIN), &Value::Double(-9.3e18)), Ordering::Greater);
    }

    #[test]
    fn int_conforms_to_double() {
        assert!(Value::Int(1).conforms_to(ValueKind::Double));
        assert!(!Value::Double(1.0).conforms_to(ValueKind::Int));
        assert!(Value::Null.conforms_to(ValueKind::Text));
    }
}
