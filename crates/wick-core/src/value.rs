//! Coercion of command-line strings into typed argument values.
//!
//! Each string is tried, in order, as a boolean literal (`true` / `false`),
//! then as a strict JSON number. Anything else is kept verbatim, including
//! strings that merely look like JSON (`{"a": 1}`, `[1]`, `null`).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Number, Value};

/// A single coerced argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Arg {
    Bool(bool),
    Number(Number),
    Str(String),
}

/// Largest integer an `f64` represents exactly (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Coerce one string. Never fails; malformed input degrades to a string.
pub fn coerce(raw: &str) -> Arg {
    match raw {
        "true" => return Arg::Bool(true),
        "false" => return Arg::Bool(false),
        _ => {}
    }

    // serde_json tolerates surrounding whitespace; a strict number does not.
    if raw.is_empty() || raw.trim() != raw {
        return Arg::Str(raw.to_owned());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Number(n)) => Arg::Number(normalize(n)),
        _ => Arg::Str(raw.to_owned()),
    }
}

/// Integral floats (`1.0`, `1e3`) collapse to integers.
fn normalize(n: Number) -> Number {
    if !n.is_f64() {
        return n;
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT => Number::from(f as i64),
        _ => n,
    }
}

pub fn coerce_args(raw: &[String]) -> Vec<Arg> {
    raw.iter().map(|s| coerce(s)).collect()
}

pub fn coerce_kwargs<'a, I>(raw: I) -> BTreeMap<String, Arg>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    raw.into_iter()
        .map(|(k, v)| (k.clone(), coerce(v)))
        .collect()
}

impl From<Arg> for Value {
    fn from(arg: Arg) -> Self {
        match arg {
            Arg::Bool(b) => Value::Bool(b),
            Arg::Number(n) => Value::Number(n),
            Arg::Str(s) => Value::String(s),
        }
    }
}

/// Convert coerced positional arguments into wire values.
pub fn to_list(args: Vec<Arg>) -> Vec<Value> {
    args.into_iter().map(Value::from).collect()
}

/// Convert coerced keyword arguments (or options) into a wire mapping.
pub fn to_dict(kwargs: BTreeMap<String, Arg>) -> Map<String, Value> {
    kwargs.into_iter().map(|(k, v)| (k, v.into())).collect()
}

/// Coerce and convert a `key -> string` mapping in one step.
pub fn dict_from_strings<'a, I>(raw: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    to_dict(coerce_kwargs(raw))
}
