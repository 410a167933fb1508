//! Record to document transformation
//!
//! Source columns are looked up tolerantly, in order:
//!
//! 1. exact header match
//! 2. the name with a leading byte-order mark removed
//! 3. the name with a byte-order mark prepended
//! 4. the first header equal after trimming and lowercasing both sides
//!
//! Spreadsheet exports often carry a BOM on the first header, which is what
//! steps 2 and 3 absorb.

use thiserror::Error;
use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::warn;

use crate::coerce::{coerce_with, CoercionError, CoercionMode};
use crate::document::{AttributeValue, Document};
use crate::schema::{FieldMapping, KeySpec, SchemaMapping};
use crate::source::Record;

const BOM: char = '\u{feff}';

/// Output key names used when no mapping is configured
pub const LEGACY_HASH_KEY: &str = "myHashKey";
pub const LEGACY_RANGE_KEY: &str = "myRangeKey";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("Missing key field '{0}'")]
    MissingKey(String),

    #[error("Key field '{0}' is null")]
    NullKey(String),

    #[error("Could not find source column '{0}'")]
    UnresolvedField(String),

    #[error("Field '{field}': {source}")]
    Coercion {
        field: String,
        #[source]
        source: CoercionError,
    },
}

/// Find the value for `source` in `record` using the tolerant lookup rules.
pub fn resolve_field<'r>(record: &'r Record, source: &str) -> Option<&'r str> {
    if let Some(value) = record.get(source) {
        return Some(value);
    }

    if let Some(stripped) = source.strip_prefix(BOM) {
        if let Some(value) = record.get(stripped) {
            return Some(value);
        }
    } else if let Some(value) = record.get(&format!("{BOM}{source}")) {
        return Some(value);
    }

    let wanted = source.trim().to_lowercase();
    record
        .iter()
        .find(|(name, _)| name.trim().to_lowercase() == wanted)
        .map(|(_, value)| value)
}

/// Lenient transform of one record; never fails.
///
/// Unresolvable columns and failed coercions are omitted. Calling it twice
/// on the same inputs yields equal documents.
pub fn transform(record: &Record, mapping: &SchemaMapping) -> Document {
    build_lenient(record, mapping, &mut |column: &str| {
        warn!(column = %column, "Could not find source column");
    })
}

fn build_lenient(
    record: &Record,
    mapping: &SchemaMapping,
    on_unresolved: &mut dyn FnMut(&str),
) -> Document {
    let mut doc = Document::new();
    for (output, field) in mapping.fields() {
        match field {
            FieldMapping::Nested(inner) => {
                let nested = build_lenient(record, inner, on_unresolved);
                doc.insert(output.to_string(), AttributeValue::M(nested));
            },
            FieldMapping::Leaf { source, ty } => {
                let Some(raw) = resolve_field(record, source) else {
                    on_unresolved(source);
                    continue;
                };
                if let Some(value) = crate::coerce::coerce(raw, ty) {
                    doc.insert(output.to_string(), value);
                }
            },
        }
    }
    doc
}

/// Fixed layout used when no mapping is configured.
///
/// Kept so the pipeline runs without a schema; the column names are
/// `column_a`..`column_d`.
pub fn legacy_transform(record: &Record, keys: &KeySpec) -> Document {
    let text = |column: &str| AttributeValue::S(record.get(column).unwrap_or_default().to_string());

    let hash = record
        .get("column_a")
        .or_else(|| record.iter().next().map(|(_, v)| v))
        .unwrap_or_default();

    let mut attributes = Document::new();
    attributes.insert("attributeA".to_string(), text("column_c"));
    attributes.insert("attributeB".to_string(), text("column_d"));

    let mut doc = Document::new();
    doc.insert(
        keys.hash_key.clone().unwrap_or_else(|| LEGACY_HASH_KEY.to_string()),
        AttributeValue::S(hash.to_string()),
    );
    doc.insert(
        keys.range_key.clone().unwrap_or_else(|| LEGACY_RANGE_KEY.to_string()),
        text("column_b"),
    );
    doc.insert("myAttributes".to_string(), AttributeValue::M(attributes));
    doc
}

/// Schema-driven transformer with key validation
///
/// A source column missing from the input is warned about once per
/// transformer, not once per record.
#[derive(Debug)]
pub struct Transformer {
    mapping: Option<SchemaMapping>,
    keys: KeySpec,
    mode: CoercionMode,
    unresolved: Mutex<BTreeSet<String>>,
}

impl Transformer {
    /// `mapping = None` selects the legacy layout.
    pub fn new(mapping: Option<SchemaMapping>, keys: KeySpec) -> Self {
        Self {
            mapping,
            keys,
            mode: CoercionMode::default(),
            unresolved: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_mode(mut self, mode: CoercionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_legacy(&self) -> bool {
        self.mapping.is_none()
    }

    /// Key fields every document must carry.
    pub fn required_keys(&self) -> Vec<String> {
        let (hash, range) = if self.is_legacy() {
            (
                Some(self.keys.hash_key.clone().unwrap_or_else(|| LEGACY_HASH_KEY.to_string())),
                Some(self.keys.range_key.clone().unwrap_or_else(|| LEGACY_RANGE_KEY.to_string())),
            )
        } else {
            (self.keys.hash_key.clone(), self.keys.range_key.clone())
        };
        hash.into_iter().chain(range).collect()
    }

    /// Build the document without key validation.
    pub fn build(&self, record: &Record) -> Result<Document, TransformError> {
        match (&self.mapping, self.mode) {
            (None, _) => Ok(legacy_transform(record, &self.keys)),
            (Some(mapping), CoercionMode::Lenient) => {
                let mut note = |column: &str| self.note_unresolved(column);
                Ok(build_lenient(record, mapping, &mut note))
            },
            (Some(mapping), CoercionMode::Strict) => build_strict(record, mapping),
        }
    }

    /// Source columns that could not be found in at least one record.
    pub fn unresolved_columns(&self) -> Vec<String> {
        self.unresolved
            .lock()
            .map(|seen| seen.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn note_unresolved(&self, column: &str) {
        let Ok(mut seen) = self.unresolved.lock() else {
            return;
        };
        if seen.insert(column.to_string()) {
            warn!(column = %column, "Could not find source column, omitting it from documents");
        }
    }

    /// Build the document and check that every key field is present,
    /// non-null and non-empty.
    pub fn transform(&self, record: &Record) -> Result<Document, TransformError> {
        let doc = self.build(record)?;
        for key in self.required_keys() {
            match doc.get(&key) {
                None => return Err(TransformError::MissingKey(key)),
                Some(AttributeValue::Null(_)) => return Err(TransformError::NullKey(key)),
                Some(AttributeValue::S(s)) if s.is_empty() => {
                    return Err(TransformError::MissingKey(key))
                },
                Some(_) => {},
            }
        }
        Ok(doc)
    }
}

fn build_strict(record: &Record, mapping: &SchemaMapping) -> Result<Document, TransformError> {
    let mut doc = Document::new();
    for (output, field) in mapping.fields() {
        match field {
            FieldMapping::Nested(inner) => {
                doc.insert(output.to_string(), AttributeValue::M(build_strict(record, inner)?));
            },
            FieldMapping::Leaf { source, ty } => {
                let raw = resolve_field(record, source)
                    .ok_or_else(|| TransformError::UnresolvedField(source.clone()))?;
                let value = coerce_with(raw, ty, CoercionMode::Strict).map_err(|source| {
                    TransformError::Coercion {
                        field: output.to_string(),
                        source,
                    }
                })?;
                if let Some(value) = value {
                    doc.insert(output.to_string(), value);
                }
            },
        }
    }
    Ok(doc)
}
