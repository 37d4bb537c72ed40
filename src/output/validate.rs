//! Structural JSON Schema validation
//!
//! Covers the subset of JSON Schema emitted by `schemars` and written by hand
//! for tool parameters: types, enums, numeric and length bounds, object
//! properties, arrays, local `$ref`s and the `allOf`/`anyOf`/`oneOf`
//! combinators.

use serde_json::Value;

/// One structural mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Location in the instance, `$` is the root
    pub path: String,
    /// What is wrong at that location
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Join violations into one line
pub fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate `value` against `schema`, returning every violation found
pub fn validate(value: &Value, schema: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    check(value, schema, schema, "$", &mut vec![schema], &mut violations);
    violations
}

/// Resolve a local `$ref` such as `#/definitions/Answer` or `#/$defs/Answer`
pub fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    reference.strip_prefix('#').and_then(|ptr| root.pointer(ptr))
}

fn push(out: &mut Vec<Violation>, path: &str, message: impl Into<String>) {
    out.push(Violation {
        path: path.to_string(),
        message: message.into(),
    });
}

/// `refs` holds the schemas already entered through `$ref` for this value;
/// meeting one again means the schema loops without consuming input.
fn check<'a>(
    value: &Value,
    schema: &'a Value,
    root: &'a Value,
    path: &str,
    refs: &mut Vec<&'a Value>,
    out: &mut Vec<Violation>,
) {
    let schema = match schema {
        Value::Bool(true) => return,
        Value::Bool(false) => {
            push(out, path, "no value is allowed here");
            return;
        }
        Value::Object(map) => map,
        _ => return,
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        match resolve_ref(root, reference) {
            Some(target) if refs.iter().any(|seen| std::ptr::eq(*seen, target)) => {
                push(out, path, format!("schema reference {reference} loops back on itself"));
            }
            Some(target) => {
                refs.push(target);
                check(value, target, root, path, refs, out);
                refs.pop();
            }
            None => push(out, path, format!("unresolvable schema reference {reference}")),
        }
    }

    if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
        for sub in all {
            check(value, sub, root, path, refs, out);
        }
    }

    if let Some(any) = schema.get("anyOf").and_then(Value::as_array) {
        let matched = any.iter().any(|sub| {
            let mut scratch = Vec::new();
            check(value, sub, root, path, refs, &mut scratch);
            scratch.is_empty()
        });
        if !matched {
            push(out, path, "does not match any of the allowed shapes");
        }
    }

    if let Some(one) = schema.get("oneOf").and_then(Value::as_array) {
        let matches = one
            .iter()
            .filter(|sub| {
                let mut scratch = Vec::new();
                check(value, *sub, root, path, refs, &mut scratch);
                scratch.is_empty()
            })
            .count();
        if matches != 1 {
            push(
                out,
                path,
                format!("must match exactly one allowed shape, matched {matches}"),
            );
        }
    }

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(value, t)) {
            push(
                out,
                path,
                format!("expected {}, found {}", allowed.join(" or "), type_name(value)),
            );
            return;
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            let listed = options
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            push(out, path, format!("must be one of {listed}, found {value}"));
        }
    }

    if let Some(constant) = schema.get("const") {
        if constant != value {
            push(out, path, format!("must equal {constant}, found {value}"));
        }
    }

    match value {
        Value::Number(n) => check_number(n.as_f64().unwrap_or(f64::NAN), schema, path, out),
        Value::String(s) => check_string(s, schema, path, out),
        Value::Array(items) => check_array(items, schema, root, path, out),
        Value::Object(fields) => check_object(fields, schema, root, path, out),
        Value::Bool(_) | Value::Null => {}
    }
}

fn check_number(n: f64, schema: &serde_json::Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
    let bound = |key: &str| schema.get(key).and_then(Value::as_f64);

    if let Some(min) = bound("minimum") {
        if n < min {
            push(out, path, format!("{n} is less than the minimum {min}"));
        }
    }
    if let Some(max) = bound("maximum") {
        if n > max {
            push(out, path, format!("{n} is greater than the maximum {max}"));
        }
    }
    if let Some(min) = bound("exclusiveMinimum") {
        if n <= min {
            push(out, path, format!("{n} must be greater than {min}"));
        }
    }
    if let Some(max) = bound("exclusiveMaximum") {
        if n >= max {
            push(out, path, format!("{n} must be less than {max}"));
        }
    }
}

fn check_string(s: &str, schema: &serde_json::Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            push(out, path, format!("length {len} is shorter than {min}"));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            push(out, path, format!("length {len} is longer than {max}"));
        }
    }
}

fn check_array<'a>(
    items: &[Value],
    schema: &'a serde_json::Map<String, Value>,
    root: &'a Value,
    path: &str,
    out: &mut Vec<Violation>,
) {
    let len = items.len() as u64;
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if len < min {
            push(out, path, format!("has {len} items, fewer than {min}"));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if len > max {
            push(out, path, format!("has {len} items, more than {max}"));
        }
    }

    match schema.get("items") {
        Some(Value::Array(positional)) => {
            for (i, (item, sub)) in items.iter().zip(positional).enumerate() {
                check(item, sub, root, &format!("{path}[{i}]"), &mut Vec::new(), out);
            }
        }
        Some(sub) => {
            for (i, item) in items.iter().enumerate() {
                check(item, sub, root, &format!("{path}[{i}]"), &mut Vec::new(), out);
            }
        }
        None => {}
    }
}

fn check_object<'a>(
    fields: &serde_json::Map<String, Value>,
    schema: &'a serde_json::Map<String, Value>,
    root: &'a Value,
    path: &str,
    out: &mut Vec<Violation>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(key) {
                push(out, &format!("{path}.{key}"), "required field is missing");
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, field) in fields {
        let field_path = format!("{path}.{key}");
        match properties.and_then(|p| p.get(key)) {
            Some(sub) => check(field, sub, root, &field_path, &mut Vec::new(), out),
            None => match schema.get("additionalProperties") {
                Some(Value::Bool(false)) => push(out, &field_path, "unexpected field"),
                Some(sub @ Value::Object(_)) => {
                    check(field, sub, root, &field_path, &mut Vec::new(), out)
                }
                _ => {}
            },
        }
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// JSON type name of a value, for messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
