//! Declarative schema mapping
//!
//! A schema document looks like:
//!
//! ```json
//! {
//!   "hashKey": "id",
//!   "rangeKey": "created",
//!   "mapping": {
//!     "id": "customer_id:S",
//!     "created": "signup_date",
//!     "age": "age:N",
//!     "tags": "tags:SS",
//!     "scores": "scores:L:N",
//!     "address": {
//!       "city": "city",
//!       "geo": { "type": "M", "fields": { "lat": "lat:N", "lon": "lon:N" } }
//!     }
//!   }
//! }
//! ```
//!
//! Leaves are `"<source column>[:<type>]"`; everything after the first `:` is
//! the type token. Objects are embedded documents built from the same record.
//! The mapping is parsed once into an owned tree, so it is finite and acyclic
//! by construction; nesting depth is capped at [`MAX_SCHEMA_DEPTH`].

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Deepest nesting of embedded documents accepted in a mapping.
pub const MAX_SCHEMA_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in schema: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("'mapping' must be an object")]
    MappingNotAnObject,

    #[error("Invalid mapping for '{path}': expected \"column[:type]\" or an object")]
    InvalidLeaf { path: String },

    #[error("Empty source column for '{path}'")]
    EmptySourceField { path: String },

    #[error("Mapping for '{path}' is nested deeper than {max} levels")]
    TooDeep { path: String, max: usize },
}

/// Declared type of a mapped field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Binary,
    Null,
    List(Box<TypeTag>),
    Map,
    StringSet,
    NumberSet,
}

impl TypeTag {
    /// Parse a type token such as `N`, `BOOL`, `L:N` or `Number`.
    ///
    /// An empty token means `String`. Unknown tokens also fall back to
    /// `String`; the second element reports whether the token was recognized.
    pub fn parse(token: &str) -> (TypeTag, bool) {
        let token = token.trim();
        if token.is_empty() {
            return (TypeTag::String, true);
        }

        let (head, sub) = match token.split_once(':') {
            Some((head, sub)) => (head, Some(sub)),
            None => (token, None),
        };

        let tag = match head.to_ascii_uppercase().as_str() {
            "S" | "STRING" => TypeTag::String,
            "N" | "NUMBER" => TypeTag::Number,
            "BOOL" | "BOOLEAN" => TypeTag::Boolean,
            "B" | "BINARY" => TypeTag::Binary,
            "NULL" => TypeTag::Null,
            "M" | "MAP" => TypeTag::Map,
            "SS" | "STRINGSET" => TypeTag::StringSet,
            "NS" | "NUMBERSET" => TypeTag::NumberSet,
            "L" | "LIST" => {
                let (inner, known) = sub.map(TypeTag::parse).unwrap_or((TypeTag::String, true));
                return (TypeTag::List(Box::new(inner)), known);
            },
            _ => return (TypeTag::String, false),
        };

        // Only lists take a subtype
        (tag, sub.is_none())
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeTag::String => f.write_str("S"),
            TypeTag::Number => f.write_str("N"),
            TypeTag::Boolean => f.write_str("BOOL"),
            TypeTag::Binary => f.write_str("B"),
            TypeTag::Null => f.write_str("NULL"),
            TypeTag::List(inner) => write!(f, "L:{inner}"),
            TypeTag::Map => f.write_str("M"),
            TypeTag::StringSet => f.write_str("SS"),
            TypeTag::NumberSet => f.write_str("NS"),
        }
    }
}

/// How one output field is produced
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMapping {
    /// Copy a source column, coerced to `ty`
    Leaf { source: String, ty: TypeTag },
    /// Build an embedded document from the same record
    Nested(SchemaMapping),
}

/// Ordered output field name -> mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMapping {
    fields: Vec<(String, FieldMapping)>,
}

impl SchemaMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a simple `source[:type]` leaf, parsed the same way as schema files.
    pub fn leaf(mut self, output: impl Into<String>, spec: &str) -> Self {
        let (source, ty) = parse_leaf(spec);
        self.fields.push((output.into(), FieldMapping::Leaf { source, ty }));
        self
    }

    pub fn nested(mut self, output: impl Into<String>, mapping: SchemaMapping) -> Self {
        self.fields.push((output.into(), FieldMapping::Nested(mapping)));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldMapping)> {
        self.fields.iter().map(|(name, mapping)| (name.as_str(), mapping))
    }

    pub fn contains(&self, output: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == output)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Depth of the deepest embedded document (a flat mapping has depth 1).
    pub fn depth(&self) -> usize {
        1 + self
            .fields
            .iter()
            .filter_map(|(_, m)| match m {
                FieldMapping::Nested(inner) => Some(inner.depth()),
                FieldMapping::Leaf { .. } => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Parse a mapping object from a schema document.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        Self::parse_object(value, "", 1)
    }

    fn parse_object(value: &Value, path: &str, depth: usize) -> Result<Self, SchemaError> {
        if depth > MAX_SCHEMA_DEPTH {
            return Err(SchemaError::TooDeep {
                path: path.to_string(),
                max: MAX_SCHEMA_DEPTH,
            });
        }

        let object = value.as_object().ok_or_else(|| {
            if path.is_empty() {
                SchemaError::MappingNotAnObject
            } else {
                SchemaError::InvalidLeaf {
                    path: path.to_string(),
                }
            }
        })?;

        let mut mapping = SchemaMapping::new();
        for (name, spec) in object {
            let field_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };

            let field = match spec {
                Value::String(spec) => {
                    let (source, ty) = parse_leaf(spec);
                    if source.is_empty() {
                        return Err(SchemaError::EmptySourceField { path: field_path });
                    }
                    FieldMapping::Leaf { source, ty }
                },
                Value::Object(obj) => {
                    // {"type": "M", "fields": {...}} is an explicitly tagged map
                    let inner = match (obj.get("type"), obj.get("fields")) {
                        (Some(Value::String(t)), Some(fields))
                            if t.eq_ignore_ascii_case("M") || t.eq_ignore_ascii_case("map") =>
                        {
                            fields
                        },
                        _ => spec,
                    };
                    FieldMapping::Nested(Self::parse_object(inner, &field_path, depth + 1)?)
                },
                _ => return Err(SchemaError::InvalidLeaf { path: field_path }),
            };
            mapping.fields.push((name.clone(), field));
        }

        Ok(mapping)
    }
}

fn parse_leaf(spec: &str) -> (String, TypeTag) {
    let (source, token) = spec.split_once(':').unwrap_or((spec, ""));
    let (ty, known) = TypeTag::parse(token);
    if !known {
        warn!(column = %source, token = %token, "Unknown type token, treating as string");
    }
    (source.to_string(), ty)
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default, rename = "hashKey", alias = "hash_key")]
    hash_key: Option<String>,
    #[serde(default, rename = "rangeKey", alias = "range_key")]
    range_key: Option<String>,
    #[serde(default)]
    mapping: Option<Value>,
}

/// Parsed schema configuration document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaConfig {
    pub hash_key: Option<String>,
    pub range_key: Option<String>,
    /// `None` selects the legacy default layout
    pub mapping: Option<SchemaMapping>,
}

impl SchemaConfig {
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_str(text)?;
        let mapping = match raw.mapping {
            None | Some(Value::Null) => None,
            // An empty mapping behaves like none at all
            Some(Value::Object(object)) if object.is_empty() => None,
            Some(value) => Some(SchemaMapping::from_json(&value)?),
        };

        Ok(Self {
            hash_key: raw.hash_key.filter(|k| !k.is_empty()),
            range_key: raw.range_key.filter(|k| !k.is_empty()),
            mapping,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let schema = Self::from_json_str(&text)?;
        info!(path = %path.display(), "Loaded schema");
        Ok(schema)
    }
}

/// Output fields that identify a document in the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpec {
    pub hash_key: Option<String>,
    pub range_key: Option<String>,
}

impl KeySpec {
    /// Explicit overrides win over the schema's declared keys.
    pub fn resolve(
        schema: &SchemaConfig,
        hash_override: Option<&str>,
        range_override: Option<&str>,
    ) -> Self {
        Self {
            hash_key: hash_override
                .map(str::to_string)
                .or_else(|| schema.hash_key.clone()),
            range_key: range_override
                .map(str::to_string)
                .or_else(|| schema.range_key.clone()),
        }
    }

    /// Warn about keys the mapping does not produce at top level.
    pub fn check_against(&self, mapping: &SchemaMapping) {
        for (kind, key) in [("Hash", &self.hash_key), ("Range", &self.range_key)] {
            if let Some(key) = key {
                if !mapping.contains(key) {
                    warn!(key = %key, "{kind} key is not directly defined in schema mapping");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_tag_tokens() {
        assert_eq!(TypeTag::parse(""), (TypeTag::String, true));
        assert_eq!(TypeTag::parse("N"), (TypeTag::Number, true));
        assert_eq!(TypeTag::parse("bool"), (TypeTag::Boolean, true));
        assert_eq!(TypeTag::parse("NumberSet"), (TypeTag::NumberSet, true));
        assert_eq!(
            TypeTag::parse("L"),
            (TypeTag::List(Box::new(TypeTag::String)), true)
        );
        assert_eq!(
            TypeTag::parse("L:N"),
            (TypeTag::List(Box::new(TypeTag::Number)), true)
        );
        assert_eq!(TypeTag::parse("BS"), (TypeTag::String, false));
        assert_eq!(TypeTag::parse("N:S").1, false);
    }

    #[test]
    fn test_type_tag_display_matches_tokens() {
        let list = TypeTag::List(Box::new(TypeTag::Number));
        assert_eq!(list.to_string(), "L:N");
        assert_eq!(TypeTag::parse(&list.to_string()).0, list);
    }

    #[test]
    fn test_parse_schema_document() {
        let schema = SchemaConfig::from_json_str(
            &json!({
                "hashKey": "id",
                "mapping": {
                    "id": "id:S",
                    "age": "age:N",
                    "scores": "scores:L:N",
                    "name": "full name",
                    "address": {
                        "city": "city",
                        "geo": {"type": "M", "fields": {"lat": "lat:N"}}
                    }
                }
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(schema.hash_key.as_deref(), Some("id"));
        assert_eq!(schema.range_key, None);

        let mapping = schema.mapping.unwrap();
        assert_eq!(mapping.len(), 5);
        assert_eq!(mapping.depth(), 3);

        let fields: Vec<_> = mapping.fields().collect();
        let scores = fields.iter().find(|(n, _)| *n == "scores").unwrap().1;
        assert_eq!(
            scores,
            &FieldMapping::Leaf {
                source: "scores".into(),
                ty: TypeTag::List(Box::new(TypeTag::Number)),
            }
        );
        let name = fields.iter().find(|(n, _)| *n == "name").unwrap().1;
        assert_eq!(
            name,
            &FieldMapping::Leaf {
                source: "full name".into(),
                ty: TypeTag::String,
            }
        );
    }

    #[test]
    fn test_snake_case_key_aliases() {
        let schema =
            SchemaConfig::from_json_str(r#"{"hash_key": "pk", "range_key": "sk", "mapping": {}}"#)
                .unwrap();
        assert_eq!(schema.hash_key.as_deref(), Some("pk"));
        assert_eq!(schema.range_key.as_deref(), Some("sk"));
    }

    #[test]
    fn test_missing_mapping_selects_legacy_layout() {
        let schema = SchemaConfig::from_json_str(r#"{"hashKey": "id"}"#).unwrap();
        assert!(schema.mapping.is_none());
    }

    #[test]
    fn test_empty_mapping_selects_legacy_layout() {
        let schema = SchemaConfig::from_json_str(r#"{"hashKey": "pk", "mapping": {}}"#).unwrap();
        assert!(schema.mapping.is_none());
        assert_eq!(schema.hash_key.as_deref(), Some("pk"));
    }

    #[test]
    fn test_rejects_malformed_mappings() {
        assert!(matches!(
            SchemaConfig::from_json_str(r#"{"mapping": ["id"]}"#),
            Err(SchemaError::MappingNotAnObject)
        ));
        assert!(matches!(
            SchemaConfig::from_json_str(r#"{"mapping": {"id": 5}}"#),
            Err(SchemaError::InvalidLeaf { .. })
        ));
        assert!(matches!(
            SchemaConfig::from_json_str(r#"{"mapping": {"id": ":N"}}"#),
            Err(SchemaError::EmptySourceField { .. })
        ));
        assert!(matches!(
            SchemaConfig::from_json_str("{not json"),
            Err(SchemaError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_rejects_excessive_nesting() {
        let mut value = json!("leaf");
        for _ in 0..=MAX_SCHEMA_DEPTH {
            value = json!({ "inner": value });
        }
        let err = SchemaMapping::from_json(&value).unwrap_err();
        assert!(matches!(err, SchemaError::TooDeep { .. }));
    }

    #[test]
    fn test_key_overrides_take_precedence() {
        let schema = SchemaConfig {
            hash_key: Some("id".into()),
            range_key: Some("ts".into()),
            mapping: None,
        };
        let keys = KeySpec::resolve(&schema, Some("pk"), None);
        assert_eq!(keys.hash_key.as_deref(), Some("pk"));
        assert_eq!(keys.range_key.as_deref(), Some("ts"));
    }

    #[test]
    fn test_builder_matches_parsed_mapping() {
        let built = SchemaMapping::new()
            .leaf("id", "id:S")
            .nested("meta", SchemaMapping::new().leaf("n", "count:N"));
        let parsed =
            SchemaMapping::from_json(&json!({"id": "id:S", "meta": {"n": "count:N"}})).unwrap();
        assert_eq!(built, parsed);
    }
}
