//! Runtime values seen by the expression evaluator.
//!
//! All numbers are `rust_decimal::Decimal`, never `f64`; JSON numbers are
//! converted on the way in and rendered back on the way out. `Absent` is
//! distinct from `Null`: it marks a lookup that found nothing or an
//! operation whose coercion failed.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::numeric;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Absent,
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match numeric::from_json_number(n) {
                Some(d) => Value::Number(d),
                None => Value::Absent,
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Absent renders as `null`; callers that must tell the two apart
    /// check [`is_absent`](Self::is_absent) first.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Absent | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(d) => numeric::to_json_number(*d),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Absent | Value::Null)
    }

    /// absent, null, false, 0, "" and [] are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Absent | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(d) => !d.is_zero(),
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Record(_) => true,
        }
    }

    /// What `required` treats as "nothing entered".
    pub fn is_empty_input(&self) -> bool {
        match self {
            Value::Absent | Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Numeric view: numbers as-is, numeric text parsed, booleans as 1/0.
    pub fn to_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(d) => Some(*d),
            Value::Text(s) => numeric::parse_decimal(s),
            Value::Bool(true) => Some(Decimal::ONE),
            Value::Bool(false) => Some(Decimal::ZERO),
            _ => None,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Absent | Value::Null => String::new(),
            Value::Bool(b) => format!("{}", b),
            Value::Number(d) => numeric::format_decimal(*d),
            Value::Text(s) => s.clone(),
            Value::List(items) => items.iter().map(Value::to_text).collect::<Vec<_>>().join(","),
            Value::Record(_) => self.to_json().to_string(),
        }
    }

    /// Character count for text, element count for lists.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::Text(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Absent | Value::Null => Some(0),
            _ => None,
        }
    }

    /// Look a relative path up inside a list or record value.
    pub fn lookup(&self, segments: &[String]) -> Value {
        let mut current = self;
        for seg in segments {
            current = match current {
                Value::Record(fields) => match fields.get(seg) {
                    Some(v) => v,
                    None => return Value::Absent,
                },
                Value::List(items) => match seg.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(v) => v,
                    None => return Value::Absent,
                },
                _ => return Value::Absent,
            };
        }
        current.clone()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::List(_) => "array",
            Value::Record(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Number(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_become_decimals() {
        assert_eq!(Value::from_json(&json!(0.1)), Value::Number(Decimal::new(1, 1)));
        assert_eq!(Value::from_json(&json!(42)), Value::Number(Decimal::from(42)));
    }

    #[test]
    fn absent_renders_null() {
        assert_eq!(Value::Absent.to_json(), json!(null));
        assert!(Value::Absent.is_absent());
        assert!(!Value::Null.is_absent());
    }

    #[test]
    fn truthiness() {
        for falsy in [
            Value::Absent,
            Value::Null,
            Value::Bool(false),
            Value::Number(Decimal::ZERO),
            Value::Text(String::new()),
            Value::List(vec![]),
        ] {
            assert!(!falsy.is_truthy(), "{:?}", falsy);
        }
        assert!(Value::Text("0".into()).is_truthy());
        assert!(Value::Record(BTreeMap::new()).is_truthy());
    }

    #[test]
    fn whitespace_text_is_empty_input() {
        assert!(Value::Text("   ".into()).is_empty_input());
        assert!(!Value::Bool(false).is_empty_input());
    }

    #[test]
    fn text_coerces_to_number() {
        assert_eq!(Value::Text(" 12.5 ".into()).to_number(), Some(Decimal::new(125, 1)));
        assert_eq!(Value::Text("abc".into()).to_number(), None);
    }

    #[test]
    fn lookup_inside_records_and_lists() {
        let v = Value::from_json(&json!({"rows": [{"x": 1}]}));
        let segs: Vec<String> = vec!["rows".into(), "0".into(), "x".into()];
        assert_eq!(v.lookup(&segs), Value::Number(Decimal::ONE));
        assert_eq!(v.lookup(&["nope".to_string()]), Value::Absent);
    }
}
