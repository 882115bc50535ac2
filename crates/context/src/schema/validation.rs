//! Local checks on structured records
//!
//! `missing_required` is the gate a record must pass to count as parsed.
//! `validate_deep` checks lengths and item shapes; it only reports.

use super::{FieldKind, Schema};
use serde::Serialize;
use serde_json::Value;

/// A single deep-validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Required fields that are absent or null. A non-object record is missing
/// every required field.
pub fn missing_required(record: &Value, schema: &Schema) -> Vec<&'static str> {
    let object = record.as_object();
    schema
        .required_fields()
        .filter(|name| {
            object
                .and_then(|o| o.get(*name))
                .map_or(true, Value::is_null)
        })
        .collect()
}

/// Best-effort structural validation
pub fn validate_deep(record: &Value, schema: &Schema) -> Vec<Violation> {
    let Some(object) = record.as_object() else {
        return vec![Violation::new("$", "record is not an object")];
    };

    let mut violations = Vec::new();

    for key in object.keys() {
        if !schema.fields().iter().any(|f| f.name == key) {
            violations.push(Violation::new(key.as_str(), "unexpected field"));
        }
    }

    for field in schema.fields() {
        let value = match object.get(field.name) {
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };

        match field.kind {
            FieldKind::BoundedText => match value.as_str() {
                Some(text) => {
                    let len = text.chars().count();
                    if len < schema.bounds.min_length {
                        violations.push(Violation::new(
                            field.name,
                            format!("shorter than {} characters", schema.bounds.min_length),
                        ));
                    } else if len > schema.bounds.max_length {
                        violations.push(Violation::new(
                            field.name,
                            format!("longer than {} characters", schema.bounds.max_length),
                        ));
                    }
                }
                None => violations.push(Violation::new(field.name, "expected a string")),
            },
            FieldKind::TextList => match value.as_array() {
                Some(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            violations.push(Violation::new(
                                format!("{}[{}]", field.name, idx),
                                "expected a string",
                            ));
                        }
                    }
                }
                None => violations.push(Violation::new(field.name, "expected a list")),
            },
            FieldKind::ObjectList(properties) => match value.as_array() {
                Some(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        let path = format!("{}[{}]", field.name, idx);
                        match item.as_object() {
                            Some(obj) => {
                                for prop in properties {
                                    if !obj.get(*prop).is_some_and(Value::is_string) {
                                        violations.push(Violation::new(
                                            format!("{}.{}", path, prop),
                                            "expected a string",
                                        ));
                                    }
                                }
                            }
                            None => violations.push(Violation::new(path, "expected an object")),
                        }
                    }
                }
                None => violations.push(Violation::new(field.name, "expected a list")),
            },
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::super::{SchemaBounds, SchemaKind, SCHEMA_VERSION};
    use super::*;
    use serde_json::json;

    fn schema(kind: SchemaKind) -> Schema {
        Schema {
            kind,
            version: SCHEMA_VERSION,
            bounds: SchemaBounds {
                min_length: 3,
                max_length: 40,
            },
        }
    }

    #[test]
    fn test_missing_required_reports_absent_and_null() {
        let record = json!({
            "title": "Porous catalysts",
            "need": null,
            "solution": "Dope the framework",
        });
        let missing = missing_required(&record, &schema(SchemaKind::Proposal));
        assert_eq!(missing, vec!["need", "differentiation", "benefit"]);
    }

    #[test]
    fn test_optional_fields_not_required() {
        let record = json!({
            "title": "t1t", "need": "n1n", "solution": "s1s",
            "differentiation": "d1d", "benefit": "b1b",
        });
        assert!(missing_required(&record, &schema(SchemaKind::Proposal)).is_empty());
    }

    #[test]
    fn test_non_object_misses_everything() {
        let missing = missing_required(&json!([1, 2]), &schema(SchemaKind::ProposalRevision));
        assert!(missing.contains(&"revision_explanation"));
        assert_eq!(missing.len(), 6);
    }

    #[test]
    fn test_deep_validation_reports_without_failing() {
        let record = json!({
            "title": "ok title",
            "objective": "x",
            "materials": [{"name": "ZnO", "role": "catalyst"}, "loose"],
            "equipment": ["furnace", 3],
            "procedure": "not a list",
            "expected_outcomes": "y".repeat(41),
            "extra": true,
        });
        let violations = validate_deep(&record, &schema(SchemaKind::ExperimentalDetail));
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();

        assert!(fields.contains(&"extra"));
        assert!(fields.contains(&"objective"));
        assert!(fields.contains(&"materials[0].quantity"));
        assert!(fields.contains(&"materials[1]"));
        assert!(fields.contains(&"equipment[1]"));
        assert!(fields.contains(&"procedure"));
        assert!(fields.contains(&"expected_outcomes"));
        assert!(!fields.contains(&"title"));
    }

    #[test]
    fn test_deep_validation_non_object() {
        let violations = validate_deep(&json!("text"), &schema(SchemaKind::Proposal));
        assert_eq!(violations.len(), 1);
    }
}
