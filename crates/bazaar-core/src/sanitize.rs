//! # Input Sanitisers
//!
//! Two independent passes over untrusted request input:
//!
//! - **Operator stripping.** Keys that begin with `$` or contain `.` can
//!   change the shape of a document-store query (`{"password": {"$ne": ""}}`).
//!   They are removed wherever they appear.
//! - **Markup neutralisation.** Every string value has `<` escaped to
//!   `&lt;` and surrounding whitespace trimmed, so no tag can open.
//!
//! Both passes operate on `serde_json::Value` (request bodies) and on
//! `application/x-www-form-urlencoded` query strings, where bracketed keys
//! such as `price[$gte]` are inspected segment by segment.

use serde_json::Value;
use url::form_urlencoded;

/// Whether `key` could be interpreted as a query operator or a nested path.
pub fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Whether any segment of a bracketed query key (`a[b][c]`) is an operator key.
pub fn is_operator_query_key(key: &str) -> bool {
    key.split(['[', ']'])
        .filter(|segment| !segment.is_empty())
        .any(is_operator_key)
}

/// Recursively remove operator keys from objects. Returns the number of
/// keys removed.
pub fn strip_operator_keys(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_operator_key(key));
            let mut removed = before - map.len();
            for child in map.values_mut() {
                removed += strip_operator_keys(child);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(strip_operator_keys).sum(),
        _ => 0,
    }
}

/// Escape the opening angle bracket and trim the result.
pub fn escape_markup(input: &str) -> String {
    input.trim().replace('<', "&lt;")
}

/// Recursively neutralise markup in every string value. Object keys are
/// left as they are.
pub fn neutralize_markup(value: &mut Value) {
    match value {
        Value::String(s) => {
            let escaped = escape_markup(s);
            if escaped != *s {
                *s = escaped;
            }
        }
        Value::Object(map) => map.values_mut().for_each(neutralize_markup),
        Value::Array(items) => items.iter_mut().for_each(neutralize_markup),
        _ => {}
    }
}

/// Apply both passes to a JSON document.
pub fn sanitize_json(value: &mut Value) -> usize {
    let removed = strip_operator_keys(value);
    neutralize_markup(value);
    removed
}

/// Apply both passes to a query string.
///
/// Returns `None` when the query needs no change, so the caller can keep
/// the original encoding untouched.
pub fn sanitize_query(query: &str) -> Option<String> {
    let mut changed = false;
    let mut out = form_urlencoded::Serializer::new(String::new());

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if is_operator_query_key(&key) {
            changed = true;
            continue;
        }
        let escaped = escape_markup(&value);
        if escaped != value {
            changed = true;
        }
        out.append_pair(&key, &escaped);
    }

    changed.then(|| out.finish())
}
