//! Typed values carried in event params, event values and environment data.
//!
//! A [`Val`] is a small tagged union. It serialises untagged, so JSON and
//! MessagePack payloads carry plain values (`true`, `1.5`, `"a"`, `[1, 2]`,
//! `{"Accept": ["*/*"]}`) rather than a wrapper object.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed value.
///
/// Conversions between kinds follow fixed coercion rules: booleans become
/// `1`/`0` as numbers, strings are parsed (yielding `0`/`false` on failure),
/// and arrays render as JSON text when asked for a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Val {
    /// No value.
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    ArrayNumber(Vec<f64>),
    ArrayString(Vec<String>),
    /// Multi-valued map, used for header and query maps.
    MapArrayString(BTreeMap<String, Vec<String>>),
}

impl Val {
    /// Returns `true` for [`Val::Nil`].
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Val::Nil)
    }

    /// Returns `true` for either array kind.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Val::ArrayNumber(_) | Val::ArrayString(_))
    }

    /// Returns `true` if the value holds nothing meaningful: nil, an empty
    /// string, or an empty array or map.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Val::Nil => true,
            Val::Bool(_) | Val::Number(_) => false,
            Val::String(s) => s.is_empty(),
            Val::ArrayNumber(a) => a.is_empty(),
            Val::ArrayString(a) => a.is_empty(),
            Val::MapArrayString(m) => m.is_empty(),
        }
    }

    /// Boolean view. Numbers are `true` when non-zero, strings are parsed.
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Number(n) => *n != 0.0,
            Val::String(s) => parse_bool(s),
            _ => false,
        }
    }

    /// Numeric view. Booleans are `1`/`0`, strings are parsed or `0`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Val::Bool(true) => 1.0,
            Val::Bool(false) => 0.0,
            Val::Number(n) => *n,
            Val::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Integer view, truncating [`Val::as_f64`].
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.as_f64() as i64
    }

    /// String view. Arrays and maps are rendered as JSON.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Val::Nil => String::new(),
            Val::Bool(b) => b.to_string(),
            Val::Number(n) => format_number(*n),
            Val::String(s) => s.clone(),
            Val::ArrayNumber(_) | Val::ArrayString(_) | Val::MapArrayString(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Elements of an array as strings. Numbers are formatted; non-arrays
    /// yield an empty list.
    #[must_use]
    pub fn as_array_string(&self) -> Vec<String> {
        match self {
            Val::ArrayString(a) => a.clone(),
            Val::ArrayNumber(a) => a.iter().map(|n| format_number(*n)).collect(),
            _ => Vec::new(),
        }
    }

    /// The map held by a [`Val::MapArrayString`], if any.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Val::MapArrayString(m) => Some(m),
            _ => None,
        }
    }

    /// Mutable access to the map held by a [`Val::MapArrayString`].
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Vec<String>>> {
        match self {
            Val::MapArrayString(m) => Some(m),
            _ => None,
        }
    }

    /// The kind name used in schema problems.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Val::Nil => "nil",
            Val::Bool(_) => "boolean",
            Val::Number(_) => "number",
            Val::String(_) => "string",
            Val::ArrayNumber(_) | Val::ArrayString(_) => "array",
            Val::MapArrayString(_) => "map",
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Val::Bool(v)
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::Number(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::Number(v as f64)
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::Number(f64::from(v))
    }
}

impl From<&str> for Val {
    fn from(v: &str) -> Self {
        Val::String(v.to_string())
    }
}

impl From<String> for Val {
    fn from(v: String) -> Self {
        Val::String(v)
    }
}

impl From<Vec<f64>> for Val {
    fn from(v: Vec<f64>) -> Self {
        Val::ArrayNumber(v)
    }
}

impl From<Vec<String>> for Val {
    fn from(v: Vec<String>) -> Self {
        Val::ArrayString(v)
    }
}

impl From<Vec<&str>> for Val {
    fn from(v: Vec<&str>) -> Self {
        Val::ArrayString(v.into_iter().map(str::to_string).collect())
    }
}

impl From<BTreeMap<String, Vec<String>>> for Val {
    fn from(v: BTreeMap<String, Vec<String>>) -> Self {
        Val::MapArrayString(v)
    }
}

/// Formats a number the short way: integral values have no fractional part.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_coercion() {
        assert!(Val::from(2).as_bool());
        assert!(!Val::from(0).as_bool());
        assert!(Val::from("true").as_bool());
        assert!(!Val::from("nope").as_bool());
        assert!(!Val::from(vec![1.0]).as_bool());
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(Val::from(true).as_f64(), 1.0);
        assert_eq!(Val::from(false).as_f64(), 0.0);
        assert_eq!(Val::from("2.5").as_f64(), 2.5);
        assert_eq!(Val::from("abc").as_f64(), 0.0);
        assert_eq!(Val::from(7.9).as_i64(), 7);
    }

    #[test]
    fn test_string_rendering() {
        assert_eq!(Val::from(123).as_string(), "123");
        assert_eq!(Val::from(1.1).as_string(), "1.1");
        assert_eq!(Val::from(vec!["a", "b"]).as_string(), r#"["a","b"]"#);
        assert_eq!(Val::Nil.as_string(), "");
    }

    #[test]
    fn test_array_string_from_numbers() {
        assert_eq!(
            Val::from(vec![1.1, 2.0]).as_array_string(),
            vec!["1.1".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn test_untagged_json() {
        let v: Val = serde_json::from_str(r#"["x","y"]"#).unwrap();
        assert_eq!(v, Val::from(vec!["x", "y"]));
        let v: Val = serde_json::from_str("[1, 2.5]").unwrap();
        assert_eq!(v, Val::from(vec![1.0, 2.5]));
        let v: Val = serde_json::from_str("3").unwrap();
        assert_eq!(v, Val::Number(3.0));
        let v: Val = serde_json::from_str("null").unwrap();
        assert!(v.is_nil());
    }

    #[test]
    fn test_msgpack_map_value() {
        let mut m = BTreeMap::new();
        m.insert("Accept".to_string(), vec!["*/*".to_string()]);
        let bytes = rmp_serde::to_vec(&Val::from(m.clone())).unwrap();
        let restored: Val = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored.as_map(), Some(&m));
    }
}
