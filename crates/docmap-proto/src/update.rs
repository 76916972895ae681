//! Partial-update operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::Error;

/// A single field-level update operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    /// Set a root-level field to a client-supplied value.
    Set { field: String, value: Value },
    /// Set a root-level field to the server's current timestamp.
    CurrentDate { field: String },
    /// Remove a root-level field.
    Unset { field: String },
}

impl UpdateOp {
    /// Create a set operator.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        UpdateOp::Set {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a current-date operator.
    pub fn current_date(field: impl Into<String>) -> Self {
        UpdateOp::CurrentDate {
            field: field.into(),
        }
    }

    /// Create an unset operator.
    pub fn unset(field: impl Into<String>) -> Self {
        UpdateOp::Unset {
            field: field.into(),
        }
    }

    /// The field this operator writes.
    pub fn field(&self) -> &str {
        match self {
            UpdateOp::Set { field, .. }
            | UpdateOp::CurrentDate { field }
            | UpdateOp::Unset { field } => field,
        }
    }
}

/// A combined update: operators applied in order to one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Operators in application order.
    pub ops: Vec<UpdateOp>,
}

impl Update {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine a list of operators into one update.
    pub fn combine(ops: Vec<UpdateOp>) -> Self {
        Self { ops }
    }

    /// Add an operator.
    pub fn with(mut self, op: UpdateOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Check if the update has no operators.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Names of the fields written by this update, in order.
    pub fn fields(&self) -> Vec<&str> {
        self.ops.iter().map(UpdateOp::field).collect()
    }

    /// Apply the update to a document.
    ///
    /// `now` is the server clock used for [`UpdateOp::CurrentDate`]. Returns
    /// whether the document changed.
    pub fn apply(&self, document: &mut Document, now: DateTime<Utc>) -> Result<bool, Error> {
        let mut changed = false;
        for op in &self.ops {
            match op {
                UpdateOp::Set { field, value } => {
                    if document.get(field) != Some(value) {
                        document.insert(field.clone(), value.clone());
                        changed = true;
                    }
                }
                UpdateOp::CurrentDate { field } => {
                    let stamp = serde_json::to_value(now)
                        .map_err(|e| Error::Serialization(e.to_string()))?;
                    document.insert(field.clone(), stamp);
                    changed = true;
                }
                UpdateOp::Unset { field } => {
                    changed |= document.remove(field).is_some();
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_set_and_unset() {
        let mut doc = json!({"_id": "1", "a": 1, "b": 2}).as_object().cloned().unwrap();
        let update = Update::new()
            .with(UpdateOp::set("a", 10))
            .with(UpdateOp::unset("b"));
        assert!(update.apply(&mut doc, Utc::now()).unwrap());
        assert_eq!(doc.get("a"), Some(&json!(10)));
        assert!(!doc.contains_key("b"));
    }

    #[test]
    fn test_apply_same_value_is_not_a_change() {
        let mut doc = json!({"a": 1}).as_object().cloned().unwrap();
        let update = Update::combine(vec![UpdateOp::set("a", 1)]);
        assert!(!update.apply(&mut doc, Utc::now()).unwrap());
    }

    #[test]
    fn test_current_date_uses_server_clock() {
        let now = Utc::now();
        let mut doc = Document::new();
        Update::combine(vec![UpdateOp::current_date("ModifiedOn")])
            .apply(&mut doc, now)
            .unwrap();
        let stored: DateTime<Utc> =
            serde_json::from_value(doc.get("ModifiedOn").cloned().unwrap()).unwrap();
        assert_eq!(stored, now);
    }

    #[test]
    fn test_fields() {
        let update = Update::combine(vec![UpdateOp::set("a", 1), UpdateOp::current_date("m")]);
        assert_eq!(update.fields(), vec!["a", "m"]);
        assert_eq!(update.len(), 2);
    }
}
