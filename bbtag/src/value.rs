//! Value coercion helpers for BBTag.
//!
//! BBTag is stringly typed on the surface — every subtag receives and
//! returns text — but variables hold JSON-compatible values
//! ([`serde_json::Value`]) and the numeric/boolean subtags coerce freely,
//! so the rules live here in one place:
//!
//! - numbers parse leniently (surrounding whitespace, `,` thousands
//!   separators) and reject NaN/infinity;
//! - booleans accept `true`/`false`/`yes`/`no`/`t`/`f`/`y`/`n` and
//!   integers (non-zero is true);
//! - stringification renders strings without quotes, integral floats
//!   without a fraction, and null/absent as the empty string.
//!
//! The flat array form `{"n": <variable name>, "v": [...]}` is how
//! arrays stored in variables serialise; both it and a plain JSON array
//! deserialise here.

use serde_json::Value;

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Lenient float parse.  Returns `None` for empty or non-numeric input
/// and for non-finite results.
pub fn parse_float(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Integer parse via float truncation (`"18.9999"` → `18`).
pub fn parse_int(s: &str) -> Option<i64> {
    parse_float(s).map(|f| f.trunc() as i64)
}

/// Boolean parse.  `None` when the text is neither a recognised word nor
/// a number.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        other => parse_float(other).map(|f| f != 0.0),
    }
}

// ── Stringification ───────────────────────────────────────────────────────────

/// Render a JSON value the way subtag output expects: bare strings,
/// integral numbers without a fraction, `""` for null.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Render an optional (possibly absent) value.
pub fn stringify_opt(value: Option<&Value>) -> String {
    value.map(stringify).unwrap_or_default()
}

/// Wrap a float in a JSON number, collapsing integral values to i64 so
/// `18.0` round-trips as `18`.
pub fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f.trunc() as i64)
    } else {
        Value::from(f)
    }
}

// ── Tag arrays ────────────────────────────────────────────────────────────────

/// Deserialise a tag array: either a plain JSON array or the flat
/// `{"n": name, "v": [...]}` form used for arrays stored in variables.
pub fn deserialize_array(s: &str) -> Option<Vec<Value>> {
    let parsed: Value = serde_json::from_str(s.trim()).ok()?;
    match parsed {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("v") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Serialise a tag array back to its JSON form.
pub fn serialize_array(items: &[Value]) -> String {
    Value::Array(items.to_vec()).to_string()
}

// ── Comparison operators ──────────────────────────────────────────────────────

/// The ordinal comparison operators accepted by `for`, `while`, and
/// `bool`.
pub const ORDINAL_OPERATORS: [&str; 6] = ["==", "!=", "<", "<=", ">", ">="];

pub fn is_comparison_operator(s: &str) -> bool {
    ORDINAL_OPERATORS.contains(&s)
}

/// Apply a comparison operator to two operands.  Numeric comparison when
/// both sides parse as numbers, lexicographic otherwise.
pub fn compare(op: &str, lhs: &str, rhs: &str) -> Option<bool> {
    let ordering = match (parse_float(lhs), parse_float(rhs)) {
        (Some(a), Some(b)) => a.partial_cmp(&b)?,
        _ => lhs.cmp(rhs),
    };
    match op {
        "==" => Some(ordering == std::cmp::Ordering::Equal),
        "!=" => Some(ordering != std::cmp::Ordering::Equal),
        "<" => Some(ordering == std::cmp::Ordering::Less),
        "<=" => Some(ordering != std::cmp::Ordering::Greater),
        ">" => Some(ordering == std::cmp::Ordering::Greater),
        ">=" => Some(ordering != std::cmp::Ordering::Less),
        _ => None,
    }
}

/// `if` and `while` accept their operator in any of the three condition
/// positions (`{while;a;<;b}`, `{while;<;a;b}`, `{while;a;b;<}`).
/// Returns `(operator, lhs, rhs)`, or `None` when no position holds one.
pub fn resolve_comparison(a: &str, b: &str, c: &str) -> Option<(String, String, String)> {
    if is_comparison_operator(b) {
        Some((b.to_owned(), a.to_owned(), c.to_owned()))
    } else if is_comparison_operator(a) {
        Some((a.to_owned(), b.to_owned(), c.to_owned()))
    } else if is_comparison_operator(c) {
        Some((c.to_owned(), a.to_owned(), b.to_owned()))
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_float_lenient() {
        assert_eq!(parse_float(" 18 "), Some(18.0));
        assert_eq!(parse_float("18.9999"), Some(18.9999));
        assert_eq!(parse_float("1,000"), Some(1000.0));
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float(""), None);
    }

    #[test]
    fn parse_int_truncates() {
        assert_eq!(parse_int("18.9999"), Some(18));
        assert_eq!(parse_int("-2.5"), Some(-2));
    }

    #[test]
    fn parse_bool_words_and_numbers() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("N"), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn stringify_forms() {
        assert_eq!(stringify(&json!("hi")), "hi");
        assert_eq!(stringify(&json!(17)), "17");
        assert_eq!(stringify(&Value::Null), "");
        assert_eq!(stringify(&json!([1, "a"])), r#"[1,"a"]"#);
    }

    #[test]
    fn number_collapses_integral_floats() {
        assert_eq!(number(18.0), json!(18));
        assert_eq!(number(18.5), json!(18.5));
    }

    #[test]
    fn deserialize_plain_and_flat_arrays() {
        assert_eq!(deserialize_array(r#"[1,2,3]"#), Some(vec![json!(1), json!(2), json!(3)]));
        assert_eq!(
            deserialize_array(r#"{"n":"arr","v":["a","b"]}"#),
            Some(vec![json!("a"), json!("b")])
        );
        assert_eq!(deserialize_array("not json"), None);
        assert_eq!(deserialize_array(r#""just a string""#), None);
    }

    #[test]
    fn operator_position_permutations() {
        assert_eq!(
            resolve_comparison("1", "<", "2"),
            Some(("<".into(), "1".into(), "2".into()))
        );
        assert_eq!(
            resolve_comparison("<", "1", "2"),
            Some(("<".into(), "1".into(), "2".into()))
        );
        assert_eq!(
            resolve_comparison("1", "2", "<"),
            Some(("<".into(), "1".into(), "2".into()))
        );
        assert_eq!(resolve_comparison("1", "2", "3"), None);
    }

    #[test]
    fn compare_numeric_before_lexicographic() {
        assert_eq!(compare("<", "9", "10"), Some(true));
        assert_eq!(compare("<", "apple", "banana"), Some(true));
        assert_eq!(compare(">=", "5", "5"), Some(true));
        assert_eq!(compare("wat", "1", "2"), None);
    }
}
