//! Structured record → prose
//!
//! Sections follow the schema's field order. Null and empty (`""`, `[]`,
//! `{}`) fields are skipped; list fields are emitted as a fenced block of
//! their JSON form. Field content is copied through untouched.

use crate::schema::{FieldKind, SchemaKind};
use proposalforge_common::Result;
use serde_json::Value;

const SECTION_SEPARATOR: &str = "\n\n";

/// Render a record with the section layout of `kind`
pub fn render(record: &Value, kind: SchemaKind) -> String {
    let mut out = String::new();

    for field in kind.fields() {
        let Some(value) = record.get(field.name) else {
            continue;
        };
        if is_empty(value) {
            continue;
        }

        out.push_str("## ");
        out.push_str(field.heading);
        out.push('\n');

        match (field.kind, value) {
            (FieldKind::BoundedText, Value::String(text)) => out.push_str(text),
            (FieldKind::BoundedText, Value::Number(_) | Value::Bool(_)) => {
                out.push_str(&value.to_string())
            }
            _ => push_fenced(&mut out, value),
        }
        out.push_str(SECTION_SEPARATOR);
    }

    // Drop the separator after the last section
    if out.ends_with(SECTION_SEPARATOR) {
        out.truncate(out.len() - SECTION_SEPARATOR.len());
    }
    out
}

/// Render by schema name
pub fn render_named(record: &Value, schema_name: &str) -> Result<String> {
    Ok(render(record, schema_name.parse()?))
}

fn push_fenced(out: &mut String, value: &Value) {
    let serialized = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    out.push_str("```json\n");
    out.push_str(&serialized);
    out.push_str("\n```");
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
