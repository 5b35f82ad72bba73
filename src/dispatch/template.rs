//! `{{dot.path}}` substitution against a JSON payload.

use serde_json::Value;

/// Render `template`, replacing each `{{path}}` with the value at `path`.
///
/// - Missing paths render as an empty string
/// - Strings render raw, any other value renders as JSON text
/// - Array elements are addressed by index (`items.0.name`)
/// - An unterminated `{{` is kept literally
pub fn render_template(template: &str, payload: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let path = after_open[..end].trim();
        if let Some(value) = lookup_path(payload, path) {
            match value {
                Value::String(s) => out.push_str(s),
                Value::Null => {}
                other => out.push_str(&other.to_string()),
            }
        }

        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Walk a dot-separated path through objects and arrays
pub fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.').try_fold(payload, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
