//! Output schema registry
//!
//! One closed definition per output shape. Bounded string fields take their
//! length limits from live configuration every time a schema is built, so an
//! operator change applies to the next structured call without a restart.

mod validation;

pub use validation::{missing_required, validate_deep, Violation};

use proposalforge_common::{AppError, ConfigSource, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Version stamped on every built schema
pub const SCHEMA_VERSION: u32 = 2;

/// Bounds used when configuration cannot be read
pub const FALLBACK_BOUNDS: SchemaBounds = SchemaBounds {
    min_length: 5,
    max_length: 100,
};

/// Output shapes with a registered definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Proposal,
    ExperimentalDetail,
    ProposalRevision,
    ExperimentalDetailRevision,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 4] = [
        SchemaKind::Proposal,
        SchemaKind::ExperimentalDetail,
        SchemaKind::ProposalRevision,
        SchemaKind::ExperimentalDetailRevision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Proposal => "proposal",
            SchemaKind::ExperimentalDetail => "experimental_detail",
            SchemaKind::ProposalRevision => "proposal_revision",
            SchemaKind::ExperimentalDetailRevision => "experimental_detail_revision",
        }
    }

    /// Field definitions in render order
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            SchemaKind::Proposal => PROPOSAL_FIELDS,
            SchemaKind::ExperimentalDetail => EXPERIMENTAL_FIELDS,
            SchemaKind::ProposalRevision => PROPOSAL_REVISION_FIELDS,
            SchemaKind::ExperimentalDetailRevision => EXPERIMENTAL_REVISION_FIELDS,
        }
    }

    /// The revision variant of a base shape (revisions map to themselves)
    pub fn revision(&self) -> SchemaKind {
        match self {
            SchemaKind::Proposal | SchemaKind::ProposalRevision => SchemaKind::ProposalRevision,
            SchemaKind::ExperimentalDetail | SchemaKind::ExperimentalDetailRevision => {
                SchemaKind::ExperimentalDetailRevision
            }
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = AppError;

    fn from_str(name: &str) -> Result<Self> {
        SchemaKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| AppError::Validation {
                message: format!("unknown schema '{}'", name),
                field: Some("schema".to_string()),
            })
    }
}

/// Shape of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text carrying the configured length bounds
    BoundedText,
    /// List of strings
    TextList,
    /// List of objects with the given string properties
    ObjectList(&'static [&'static str]),
}

/// One field of a schema definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub heading: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn text(name: &'static str, heading: &'static str, required: bool) -> FieldSpec {
    FieldSpec { name, heading, kind: FieldKind::BoundedText, required }
}

const fn list(name: &'static str, heading: &'static str, required: bool) -> FieldSpec {
    FieldSpec { name, heading, kind: FieldKind::TextList, required }
}

const fn objects(
    name: &'static str,
    heading: &'static str,
    properties: &'static [&'static str],
    required: bool,
) -> FieldSpec {
    FieldSpec { name, heading, kind: FieldKind::ObjectList(properties), required }
}

const MATERIAL_PROPERTIES: &[&str] = &["name", "role", "quantity"];

const PROPOSAL_FIELDS: &[FieldSpec] = &[
    text("title", "Title", true),
    text("need", "Need", true),
    text("solution", "Proposed Solution", true),
    text("differentiation", "Differentiation", true),
    text("benefit", "Benefit", true),
    text("experimental_overview", "Experimental Overview", false),
    objects("materials", "Materials", MATERIAL_PROPERTIES, false),
];

const EXPERIMENTAL_FIELDS: &[FieldSpec] = &[
    text("title", "Title", true),
    text("objective", "Objective", true),
    objects("materials", "Materials", MATERIAL_PROPERTIES, true),
    list("equipment", "Equipment", true),
    list("procedure", "Procedure", true),
    list("characterization", "Characterization", false),
    text("safety_notes", "Safety Notes", false),
    text("expected_outcomes", "Expected Outcomes", true),
];

const PROPOSAL_REVISION_FIELDS: &[FieldSpec] = &[
    text("title", "Title", true),
    text("need", "Need", true),
    text("solution", "Proposed Solution", true),
    text("differentiation", "Differentiation", true),
    text("benefit", "Benefit", true),
    text("experimental_overview", "Experimental Overview", false),
    objects("materials", "Materials", MATERIAL_PROPERTIES, false),
    text("revision_explanation", "Revision Notes", true),
];

const EXPERIMENTAL_REVISION_FIELDS: &[FieldSpec] = &[
    text("title", "Title", true),
    text("objective", "Objective", true),
    objects("materials", "Materials", MATERIAL_PROPERTIES, true),
    list("equipment", "Equipment", true),
    list("procedure", "Procedure", true),
    list("characterization", "Characterization", false),
    text("safety_notes", "Safety Notes", false),
    text("expected_outcomes", "Expected Outcomes", true),
    text("revision_explanation", "Revision Notes", true),
];

/// Length bounds for bounded text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaBounds {
    pub min_length: usize,
    pub max_length: usize,
}

/// A built schema: definition plus the bound snapshot it was built with
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub kind: SchemaKind,
    pub version: u32,
    pub bounds: SchemaBounds,
}

impl Schema {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.kind.fields()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields().iter().filter(|f| f.required).map(|f| f.name)
    }

    /// JSON Schema for strict structured output.
    ///
    /// Strict mode needs every property listed as required, so optional
    /// fields are expressed as nullable instead.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields() {
            properties.insert(field.name.to_string(), self.field_schema(field));
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": self.fields().iter().map(|f| f.name).collect::<Vec<_>>(),
            "additionalProperties": false,
        })
    }

    fn field_schema(&self, field: &FieldSpec) -> Value {
        let base = match field.kind {
            FieldKind::BoundedText => json!({
                "type": "string",
                "minLength": self.bounds.min_length,
                "maxLength": self.bounds.max_length,
            }),
            FieldKind::TextList => json!({
                "type": "array",
                "items": { "type": "string" },
            }),
            FieldKind::ObjectList(props) => {
                let item_properties: Map<String, Value> = props
                    .iter()
                    .map(|p| (p.to_string(), json!({ "type": "string" })))
                    .collect();
                json!({
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": item_properties,
                        "required": props,
                        "additionalProperties": false,
                    },
                })
            }
        };

        if field.required {
            base
        } else {
            json!({ "anyOf": [base, { "type": "null" }] })
        }
    }
}

/// Builds schemas against the live configuration
pub struct SchemaRegistry {
    config: Arc<dyn ConfigSource>,
}

impl SchemaRegistry {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }

    /// Current bounds, or the fallback when configuration is unavailable
    pub fn bounds(&self) -> SchemaBounds {
        match self.config.snapshot() {
            Ok(config) => SchemaBounds {
                min_length: config.schema.min_length,
                max_length: config.schema.max_length,
            },
            Err(e) => {
                warn!(error = %e, "Schema bounds unavailable, using fallback");
                FALLBACK_BOUNDS
            }
        }
    }

    /// Build a schema by name
    pub fn build(&self, name: &str) -> Result<Schema> {
        Ok(self.build_kind(name.parse()?))
    }

    /// Build a schema for a known kind
    pub fn build_kind(&self, kind: SchemaKind) -> Schema {
        Schema {
            kind,
            version: SCHEMA_VERSION,
            bounds: self.bounds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proposalforge_common::config::{AppConfig, StaticConfigSource};

    struct BrokenConfig;

    impl ConfigSource for BrokenConfig {
        fn snapshot(&self) -> Result<proposalforge_common::AppConfig> {
            Err(AppError::configuration("config store offline"))
        }
    }

    #[test]
    fn test_bounds_follow_live_config() {
        let source = Arc::new(StaticConfigSource::new(AppConfig::default()));
        let registry = SchemaRegistry::new(source.clone());

        let before = registry.build("proposal").unwrap();
        source
            .update(|c| {
                c.schema.min_length = 20;
                c.schema.max_length = 800;
            })
            .unwrap();
        let after = registry.build("proposal").unwrap();

        assert_eq!(before.bounds, SchemaBounds { min_length: 5, max_length: 100 });
        assert_eq!(after.bounds, SchemaBounds { min_length: 20, max_length: 800 });
        assert_eq!(after.to_json_schema()["properties"]["need"]["maxLength"], 800);
    }

    #[test]
    fn test_fallback_bounds_when_config_unavailable() {
        let registry = SchemaRegistry::new(Arc::new(BrokenConfig));
        let schema = registry.build_kind(SchemaKind::ExperimentalDetail);
        assert_eq!(schema.bounds, FALLBACK_BOUNDS);
    }

    #[test]
    fn test_unknown_schema_name() {
        let registry = SchemaRegistry::new(Arc::new(BrokenConfig));
        let err = registry.build("poem").unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_schemas_are_closed_and_list_every_property() {
        let registry = SchemaRegistry::new(Arc::new(StaticConfigSource::default()));
        for kind in SchemaKind::ALL {
            let schema = registry.build_kind(kind).to_json_schema();
            assert_eq!(schema["additionalProperties"], false);
            let required = schema["required"].as_array().unwrap();
            let properties = schema["properties"].as_object().unwrap();
            assert_eq!(required.len(), properties.len());
        }
    }

    #[test]
    fn test_optional_fields_are_nullable() {
        let registry = SchemaRegistry::new(Arc::new(StaticConfigSource::default()));
        let schema = registry.build_kind(SchemaKind::Proposal).to_json_schema();
        assert!(schema["properties"]["materials"]["anyOf"].is_array());
        assert_eq!(schema["properties"]["title"]["type"], "string");
    }

    #[test]
    fn test_revision_variants_add_explanation() {
        for kind in [SchemaKind::Proposal, SchemaKind::ExperimentalDetail] {
            let base: Vec<_> = kind.fields().iter().map(|f| f.name).collect();
            let revised: Vec<_> = kind.revision().fields().iter().map(|f| f.name).collect();
            assert_eq!(&revised[..base.len()], &base[..]);
            assert_eq!(revised.last(), Some(&"revision_explanation"));
        }
    }
}
