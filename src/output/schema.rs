//! Output schemas for structured final answers
//!
//! An [`OutputSchema`] does two jobs: it renders format guidance for the
//! system prompt, and it checks the model's final text against the schema
//! after token counters have been filled in.

use schemars::JsonSchema;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::metadata::{COMPLETION_TOKENS, PROMPT_TOKENS, TOTAL_TOKENS};
use crate::core::TokenUsage;
use crate::output::validate::{self, format_violations, resolve_ref, Violation};

/// Counter fields the controller fills in when a schema declares them
const RESERVED_FIELDS: [&str; 3] = [TOTAL_TOKENS, PROMPT_TOKENS, COMPLETION_TOKENS];

/// Why a final answer was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    /// The text could not be parsed as JSON at all
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    /// The JSON parsed but does not fit the schema
    #[error("response does not match `{schema}`: {}", format_violations(.violations))]
    Mismatch {
        schema: String,
        violations: Vec<Violation>,
    },
}

/// A JSON schema the final answer must satisfy
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    name: String,
    schema: Value,
}

impl OutputSchema {
    /// Derive the schema from a Rust type
    pub fn for_type<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        let schema = serde_json::to_value(&root).unwrap_or(Value::Bool(true));
        let name = schema
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| short_type_name::<T>());
        Self { name, schema }
    }

    /// Use a hand-written JSON schema
    pub fn from_json(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Whether the top-level object declares `field`
    pub fn declares_field(&self, field: &str) -> bool {
        self.properties().is_some_and(|p| p.contains_key(field))
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }

    fn is_required(&self, field: &str) -> bool {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .is_some_and(|r| r.iter().any(|v| v.as_str() == Some(field)))
    }

    /// Format guidance for the system prompt
    pub fn describe(&self) -> String {
        let mut out = String::from("## Output format\n\n");
        out.push_str(
            "When you give your final answer, respond with exactly one JSON object \
             and nothing else. Do not add prose or markdown fences around it.\n",
        );
        out.push_str(&format!("The object must match `{}`:\n", self.name));

        let Some(properties) = self.properties() else {
            out.push_str(&format!(
                "\n```json\n{}\n```\n",
                serde_json::to_string_pretty(&self.schema).unwrap_or_default()
            ));
            return out;
        };

        for (field, raw) in properties {
            let field_schema = self.resolve(raw);
            if RESERVED_FIELDS.contains(&field.as_str()) {
                out.push_str(&format!(
                    "- `{field}` (integer): filled in automatically, you may omit it\n"
                ));
                continue;
            }

            let required = if self.is_required(field) {
                "required"
            } else {
                "optional"
            };
            let mut notes = vec![type_label(field_schema, &self.schema), required.to_string()];
            notes.extend(constraints(field_schema));

            out.push_str(&format!("- `{field}` ({})", notes.join(", ")));
            if let Some(desc) = description(raw).or_else(|| description(field_schema)) {
                out.push_str(&format!(": {desc}"));
            }
            if let Some(options) = enum_values(field_schema, &self.schema) {
                out.push_str(&format!(". Must be one of: {options}"));
            }
            out.push('\n');
        }
        out
    }

    /// Parse and check a final answer
    ///
    /// Reserved counter fields declared by the schema are overwritten with
    /// `usage` before validation, so the model never has to produce them.
    pub fn validate(&self, text: &str, usage: &TokenUsage) -> Result<Value, SchemaViolation> {
        let candidate = strip_code_fence(text);
        let mut value: Value = serde_json::from_str(candidate)
            .map_err(|e| SchemaViolation::NotJson(e.to_string()))?;

        if let Value::Object(fields) = &mut value {
            for key in RESERVED_FIELDS {
                if self.declares_field(key) {
                    if let Some(n) = usage.get(key) {
                        fields.insert(key.to_string(), Value::from(n));
                    }
                }
            }
        }

        let violations = validate::validate(&value, &self.schema);
        if violations.is_empty() {
            Ok(value)
        } else {
            Err(SchemaViolation::Mismatch {
                schema: self.name.clone(),
                violations,
            })
        }
    }

    /// Follow `$ref` and single-entry `allOf` wrappers
    fn resolve<'a>(&'a self, schema: &'a Value) -> &'a Value {
        let mut current = schema;
        for _ in 0..8 {
            if let Some(target) = current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| resolve_ref(&self.schema, r))
            {
                current = target;
                continue;
            }
            match current.get("allOf").and_then(Value::as_array) {
                Some(all) if all.len() == 1 => current = &all[0],
                _ => break,
            }
        }
        current
    }
}

fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

/// Remove a surrounding ``` or ```json fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn description(schema: &Value) -> Option<&str> {
    schema.get("description").and_then(Value::as_str)
}

fn type_label(schema: &Value, root: &Value) -> String {
    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        if let Some(target) = resolve_ref(root, reference) {
            return type_label(target, root);
        }
    }

    match schema.get("type") {
        Some(Value::String(t)) if t == "array" => match schema.get("items") {
            Some(items) if items.is_object() => format!("array of {}", type_label(items, root)),
            _ => "array".to_string(),
        },
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(ts)) => {
            let names: Vec<&str> = ts.iter().filter_map(Value::as_str).collect();
            let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();
            if non_null.len() + 1 == names.len() && non_null.len() == 1 {
                format!("{} or null", non_null[0])
            } else {
                names.join(" or ")
            }
        }
        _ => {
            if let Some(variants) = schema
                .get("anyOf")
                .or_else(|| schema.get("oneOf"))
                .and_then(Value::as_array)
            {
                variants
                    .iter()
                    .map(|v| type_label(v, root))
                    .collect::<Vec<_>>()
                    .join(" or ")
            } else if schema.get("enum").is_some() {
                "string".to_string()
            } else {
                "any".to_string()
            }
        }
    }
}

fn constraints(schema: &Value) -> Vec<String> {
    let labels = [
        ("minimum", "minimum"),
        ("maximum", "maximum"),
        ("exclusiveMinimum", "greater than"),
        ("exclusiveMaximum", "less than"),
        ("minLength", "min length"),
        ("maxLength", "max length"),
        ("minItems", "min items"),
        ("maxItems", "max items"),
    ];
    labels
        .iter()
        .filter_map(|(key, label)| schema.get(*key).map(|v| format!("{label} {v}")))
        .collect()
}

fn enum_values(schema: &Value, root: &Value) -> Option<String> {
    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        return Some(
            options
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    // schemars renders documented enum variants as a oneOf of single-value enums
    let variants = schema.get("oneOf").and_then(Value::as_array)?;
    let mut values = Vec::new();
    for variant in variants {
        let variant = match variant.get("$ref").and_then(Value::as_str) {
            Some(r) => resolve_ref(root, r)?,
            None => variant,
        };
        let single = variant.get("enum").and_then(Value::as_array)?;
        values.extend(single.iter().map(ToString::to_string));
    }
    Some(values.join(", "))
}
