//! Typed documents produced by the transformer
//!
//! Values follow the target store's type system: strings, exact decimals,
//! binary, booleans, an explicit null marker, lists, nested maps and
//! string/number sets. Numbers are kept as [`Decimal`] end to end so a value
//! like `19.99` is never routed through binary floating point.
//!
//! Documents serialize in the store's typed JSON form, e.g.
//! `{"id": {"S": "a1"}, "age": {"N": "30"}}`, which keeps numbers lossless
//! and set types distinct from lists.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// One transformed record, keyed by output field name
pub type Document = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    S(String),
    N(Decimal),
    B(Vec<u8>),
    Bool(bool),
    /// Explicit null marker; always `true` when produced by coercion
    Null(bool),
    L(Vec<AttributeValue>),
    M(Document),
    Ss(BTreeSet<String>),
    Ns(BTreeSet<Decimal>),
}

impl AttributeValue {
    /// Short type descriptor used in the typed JSON form.
    pub fn type_descriptor(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<&Decimal> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Document> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a parsed JSON value into the store's type system.
    ///
    /// JSON numbers become exact decimals; numbers outside the decimal range
    /// are kept as their literal text.
    pub fn from_json(value: serde_json::Value) -> AttributeValue {
        use serde_json::Value;

        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => {
                let text = n.to_string();
                match parse_number(&text) {
                    Some(d) => AttributeValue::N(d),
                    None => AttributeValue::S(text),
                }
            },
            Value::String(s) => AttributeValue::S(s),
            Value::Array(items) => {
                AttributeValue::L(items.into_iter().map(AttributeValue::from_json).collect())
            },
            Value::Object(fields) => AttributeValue::M(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, AttributeValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Parse decimal text exactly, accepting plain and scientific notation.
pub fn parse_number(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        let key = self.type_descriptor();
        match self {
            AttributeValue::S(s) => map.serialize_entry(key, s)?,
            AttributeValue::N(n) => map.serialize_entry(key, &n.to_string())?,
            AttributeValue::B(bytes) => map.serialize_entry(key, &STANDARD.encode(bytes))?,
            AttributeValue::Bool(b) | AttributeValue::Null(b) => map.serialize_entry(key, b)?,
            AttributeValue::L(items) => map.serialize_entry(key, items)?,
            AttributeValue::M(fields) => map.serialize_entry(key, fields)?,
            AttributeValue::Ss(set) => map.serialize_entry(key, set)?,
            AttributeValue::Ns(set) => map.serialize_entry(key, &NumberList(set))?,
        }
        map.end()
    }
}

struct NumberList<'a>(&'a BTreeSet<Decimal>);

impl Serialize for NumberList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for n in self.0 {
            seq.serialize_element(&n.to_string())?;
        }
        seq.end()
    }
}
