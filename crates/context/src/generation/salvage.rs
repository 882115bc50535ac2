//! Recovery of a complete record from a truncated structured response

use crate::schema::{missing_required, Schema};
use serde_json::Value;

/// Byte offsets just past each point where the top-level object closes.
///
/// Scanning starts at the first `{`. Braces inside JSON strings are ignored.
/// An unmatched closing brace ends the scan.
pub fn closing_points(text: &str) -> Vec<usize> {
    let Some(start) = text.find('{') else {
        return Vec::new();
    };

    let mut points = Vec::new();
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
                if depth == 0 {
                    points.push(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    points
}

/// Parse `text` as a record that satisfies the schema's required fields
pub fn parse_record(text: &str, schema: &Schema) -> Option<Value> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    if value.is_object() && missing_required(&value, schema).is_empty() {
        Some(value)
    } else {
        None
    }
}

/// Try each closing point from the last one back, parsing the prefix that
/// ends there.
pub fn salvage(text: &str, schema: &Schema) -> Option<Value> {
    let start = text.find('{')?;
    closing_points(text)
        .into_iter()
        .rev()
        .find_map(|end| parse_record(&text[start..end], schema))
}
