//! Document representation.
//!
//! A document is a JSON object. Entities are converted to and from documents
//! with serde; the identity is always stored under [`ID_FIELD`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;

/// A stored document: an ordered map of root-level field names to values.
pub type Document = Map<String, Value>;

/// Field name every document stores its identity under.
pub const ID_FIELD: &str = "_id";

/// Serialize a value into a document.
///
/// Fails if the value does not serialize to a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, Error> {
    match serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(Error::NotADocument(kind_of(&other))),
    }
}

/// Deserialize a document into a typed value.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, Error> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| Error::Deserialization(e.to_string()))
}

/// Get the identity of a document, if it has a string identity.
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

/// Resolve a dot-separated path against a document.
///
/// `"address.city"` walks into nested objects. Missing segments yield `None`.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = document.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Keep only the named root-level fields of a document.
///
/// The identity field is always kept.
pub fn project(document: &Document, fields: &[String]) -> Document {
    document
        .iter()
        .filter(|(name, _)| name.as_str() == ID_FIELD || fields.iter().any(|f| f == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Human-readable name of a JSON value kind, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(rename = "_id")]
        id: String,
        name: String,
    }

    #[test]
    fn test_to_document_requires_object() {
        let err = to_document(&42).unwrap_err();
        assert!(matches!(err, Error::NotADocument("number")));
    }

    #[test]
    fn test_document_roundtrip_keeps_identity() {
        let sample = Sample {
            id: "abc".into(),
            name: "rose".into(),
        };
        let doc = to_document(&sample).unwrap();
        assert_eq!(document_id(&doc), Some("abc"));
        let back: Sample = from_document(doc).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_get_path_nested() {
        let doc = json!({"a": {"b": [10, {"c": "deep"}]}});
        let doc = doc.as_object().unwrap();
        assert_eq!(get_path(doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(doc, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(get_path(doc, "a.x"), None);
    }

    #[test]
    fn test_project_keeps_id() {
        let doc = json!({"_id": "1", "name": "n", "color": "red"});
        let projected = project(doc.as_object().unwrap(), &["color".to_string()]);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("_id"));
        assert!(!projected.contains_key("name"));
    }
}
