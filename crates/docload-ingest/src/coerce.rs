//! Field coercion
//!
//! Converts one raw text cell plus its declared [`TypeTag`] into a typed
//! [`AttributeValue`]. `None` means the field is omitted from the document.
//!
//! Lenient mode (the default) never fails: unparseable values are omitted
//! with a warning and unrecognized booleans read as `false`. Strict mode
//! reports the same problems as a [`CoercionError`] so the caller can reject
//! the record.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tracing::warn;

use crate::document::{parse_number, AttributeValue};
use crate::schema::TypeTag;

const TRUE_WORDS: [&str; 4] = ["true", "yes", "1", "y"];
const FALSE_WORDS: [&str; 4] = ["false", "no", "0", "n"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoercionMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoercionError {
    #[error("'{0}' is not a number")]
    InvalidNumber(String),

    #[error("'{0}' is not a boolean")]
    InvalidBoolean(String),

    #[error("'{value}' is not valid base64: {reason}")]
    InvalidBinary { value: String, reason: String },

    #[error("'{value}' is not a structured literal: {reason}")]
    InvalidMap { value: String, reason: String },
}

/// Lenient coercion; failures are logged and the field is omitted.
pub fn coerce(raw: &str, ty: &TypeTag) -> Option<AttributeValue> {
    match coerce_with(raw, ty, CoercionMode::Lenient) {
        Ok(value) => value,
        Err(e) => {
            warn!(value = %raw, ty = %ty, error = %e, "Type conversion failed, omitting field");
            None
        },
    }
}

/// Coerce `raw` to `ty`, reporting failures as errors.
///
/// In lenient mode only hard parse failures (numbers, binary, maps) are
/// errors; booleans always succeed.
pub fn coerce_with(
    raw: &str,
    ty: &TypeTag,
    mode: CoercionMode,
) -> Result<Option<AttributeValue>, CoercionError> {
    if raw.is_empty() {
        return Ok(match ty {
            TypeTag::Null => Some(AttributeValue::Null(true)),
            _ => None,
        });
    }

    let value = match ty {
        // A non-empty cell under NULL keeps its text
        TypeTag::String | TypeTag::Null => AttributeValue::S(raw.to_string()),
        TypeTag::Number => AttributeValue::N(number(raw)?),
        TypeTag::Boolean => AttributeValue::Bool(boolean(raw, mode)?),
        TypeTag::Binary => AttributeValue::B(STANDARD.decode(raw.trim()).map_err(|e| {
            CoercionError::InvalidBinary {
                value: raw.to_string(),
                reason: e.to_string(),
            }
        })?),
        TypeTag::List(inner) => {
            let mut items = Vec::new();
            for piece in pieces(raw) {
                match coerce_with(piece, inner, mode) {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => {},
                    Err(e) if mode == CoercionMode::Strict => return Err(e),
                    Err(e) => {
                        warn!(value = %piece, ty = %inner, error = %e, "Dropping list element")
                    },
                }
            }
            AttributeValue::L(items)
        },
        TypeTag::Map => {
            let parsed: serde_json::Value =
                serde_json::from_str(raw).map_err(|e| CoercionError::InvalidMap {
                    value: raw.to_string(),
                    reason: e.to_string(),
                })?;
            AttributeValue::from_json(parsed)
        },
        TypeTag::StringSet => {
            let set: BTreeSet<String> = pieces(raw).map(str::to_string).collect();
            if set.is_empty() {
                return Ok(None);
            }
            AttributeValue::Ss(set)
        },
        TypeTag::NumberSet => {
            // One bad member drops the whole set
            let set = pieces(raw).map(number).collect::<Result<BTreeSet<_>, _>>()?;
            if set.is_empty() {
                return Ok(None);
            }
            AttributeValue::Ns(set)
        },
    };

    Ok(Some(value))
}

fn pieces(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|p| !p.is_empty())
}

fn number(raw: &str) -> Result<rust_decimal::Decimal, CoercionError> {
    parse_number(raw).ok_or_else(|| CoercionError::InvalidNumber(raw.to_string()))
}

fn boolean(raw: &str, mode: CoercionMode) -> Result<bool, CoercionError> {
    let lower = raw.to_lowercase();
    if TRUE_WORDS.contains(&lower.as_str()) {
        return Ok(true);
    }
    match mode {
        CoercionMode::Lenient => Ok(false),
        CoercionMode::Strict if FALSE_WORDS.contains(&lower.as_str()) => Ok(false),
        CoercionMode::Strict => Err(CoercionError::InvalidBoolean(raw.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(coerce("", &TypeTag::Number), None);
        assert_eq!(coerce("", &TypeTag::String), None);
        assert_eq!(coerce("", &TypeTag::Null), Some(AttributeValue::Null(true)));
    }

    #[test]
    fn test_number_is_exact() {
        let value = coerce("19.99", &TypeTag::Number).unwrap();
        assert_eq!(value, AttributeValue::N(dec("19.99")));
        assert_eq!(value.as_decimal().unwrap().to_string(), "19.99");
    }

    #[test]
    fn test_unparseable_number_is_omitted_not_zero() {
        assert_eq!(coerce("x", &TypeTag::Number), None);
        assert_eq!(
            coerce_with("x", &TypeTag::Number, CoercionMode::Strict),
            Err(CoercionError::InvalidNumber("x".into()))
        );
    }

    #[test]
    fn test_boolean_leniency() {
        for word in ["true", "YES", "1", "Y"] {
            assert_eq!(coerce(word, &TypeTag::Boolean), Some(AttributeValue::Bool(true)));
        }
        for word in ["false", "nope", "2", " true"] {
            assert_eq!(coerce(word, &TypeTag::Boolean), Some(AttributeValue::Bool(false)));
        }
    }

    #[test]
    fn test_boolean_strict() {
        let strict = |s| coerce_with(s, &TypeTag::Boolean, CoercionMode::Strict);
        assert_eq!(strict("No"), Ok(Some(AttributeValue::Bool(false))));
        assert_eq!(strict("y"), Ok(Some(AttributeValue::Bool(true))));
        assert!(matches!(strict("maybe"), Err(CoercionError::InvalidBoolean(_))));
    }

    #[test]
    fn test_binary() {
        assert_eq!(
            coerce("aGVsbG8=", &TypeTag::Binary),
            Some(AttributeValue::B(b"hello".to_vec()))
        );
        assert_eq!(coerce("not base64!", &TypeTag::Binary), None);
    }

    #[test]
    fn test_list_with_subtype() {
        let ty = TypeTag::List(Box::new(TypeTag::Number));
        assert_eq!(
            coerce("1, 2,,x, 3.5", &ty),
            Some(AttributeValue::L(vec![
                AttributeValue::N(dec("1")),
                AttributeValue::N(dec("2")),
                AttributeValue::N(dec("3.5")),
            ]))
        );
        assert!(coerce_with("1,x", &ty, CoercionMode::Strict).is_err());
    }

    #[test]
    fn test_list_defaults_to_strings() {
        let ty = TypeTag::List(Box::new(TypeTag::String));
        assert_eq!(
            coerce(" a ,b", &ty),
            Some(AttributeValue::L(vec![
                AttributeValue::S("a".into()),
                AttributeValue::S("b".into()),
            ]))
        );
    }

    #[test]
    fn test_map_literal() {
        let value = coerce(r#"{"k": 1.5, "tags": ["a"]}"#, &TypeTag::Map).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["k"], AttributeValue::N(dec("1.5")));
        assert_eq!(map["tags"], AttributeValue::L(vec![AttributeValue::S("a".into())]));
        assert_eq!(coerce("{broken", &TypeTag::Map), None);
    }

    #[test]
    fn test_sets_dedupe() {
        let ss = coerce("b, a, b", &TypeTag::StringSet).unwrap();
        assert_eq!(
            ss,
            AttributeValue::Ss(["a".to_string(), "b".to_string()].into_iter().collect())
        );

        let ns = coerce("1, 1.0, 2", &TypeTag::NumberSet).unwrap();
        match ns {
            AttributeValue::Ns(set) => assert_eq!(set.len(), 2),
            other => panic!("expected number set, got {other:?}"),
        }

        assert_eq!(coerce(" , ", &TypeTag::StringSet), None);
        assert_eq!(coerce("1, two", &TypeTag::NumberSet), None);
    }

    #[test]
    fn test_null_with_text_keeps_text() {
        assert_eq!(coerce("n/a", &TypeTag::Null), Some(AttributeValue::S("n/a".into())));
    }
}
