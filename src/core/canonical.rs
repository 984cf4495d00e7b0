//! Canonical text form of plain values, shared by input isolation and output
//! comparison.
//!
//! The form follows `JSON.stringify`: array-index keys first in ascending
//! order, remaining keys in insertion order, integral numbers without a
//! fraction and `-0` as `0`. Only plain values are representable; callables,
//! `undefined`, symbols and cyclic structures never reach this module because
//! the sandbox rejects or drops them while serializing.

use serde_json::{Map, Number, Value};

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{msg}")]
pub struct IsolationError {
    pub msg: String,
}

pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Fresh, reference-independent copy of `args` produced by a canonical
/// serialize/deserialize round trip.
pub fn isolate(args: &[Value]) -> Result<Vec<Value>, IsolationError> {
    let mut text = String::new();
    write_array(&mut text, args);
    serde_json::from_str(&text).map_err(|e| IsolationError { msg: e.to_string() })
}

/// `None` is the "no value" sentinel and has no canonical text, so it never
/// equals anything, `null` included.
pub fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    actual.map(canonical) == Some(canonical(expected))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => write_array(out, items),
        Value::Object(map) => write_object(out, map),
    }
}

fn write_array(out: &mut String, items: &[Value]) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_value(out, item);
    }
    out.push(']');
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    out.push('{');
    for (i, (key, value)) in ordered_entries(map).into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_owned()).to_string());
}

fn write_number(out: &mut String, n: &Number) {
    if let Some(i) = n.as_i64() {
        if (i as f64).abs() <= MAX_SAFE_INTEGER {
            out.push_str(&i.to_string());
            return;
        }
    }
    if let Some(u) = n.as_u64() {
        if (u as f64) <= MAX_SAFE_INTEGER {
            out.push_str(&u.to_string());
            return;
        }
    }
    let Some(f) = n.as_f64() else {
        out.push_str(&n.to_string());
        return;
    };

    if f == 0.0 {
        out.push('0');
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        out.push_str(&format!("{f:.0}"));
    } else {
        match Number::from_f64(f) {
            Some(n) => out.push_str(&n.to_string()),
            None => out.push_str("null"),
        }
    }
}

fn array_index(key: &str) -> Option<u32> {
    let index: u32 = key.parse().ok()?;
    (index != u32::MAX && index.to_string() == key).then_some(index)
}

fn ordered_entries(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let (mut indexed, named): (Vec<_>, Vec<_>) =
        map.iter().partition(|(key, _)| array_index(key).is_some());
    indexed.sort_by_key(|(key, _)| array_index(key));
    indexed.extend(named);
    indexed
}
