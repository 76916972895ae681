//! Filter expressions and their evaluation.
//!
//! Filters are the only query language the persistence core issues: identity
//! lookups, relationship cleanup and data-filter composition all build a
//! [`Filter`] tree which a driver translates or evaluates with
//! [`Filter::matches`].

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{get_path, Document};

/// A filter over documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Lte { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Gte { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Field presence check.
    Exists { field: String, exists: bool },
    /// All conditions must be true.
    And(Vec<Filter>),
    /// At least one condition must be true.
    Or(Vec<Filter>),
    /// Negation.
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a set-membership filter.
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a set-exclusion filter.
    pub fn not_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a presence filter.
    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Filter::Exists {
            field: field.into(),
            exists,
        }
    }

    /// Combine two filters with AND.
    ///
    /// `All` is the identity element and nested ANDs are flattened.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Combine two filters with OR.
    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, _) | (_, Filter::All) => Filter::All,
            (Filter::Or(mut left), Filter::Or(right)) => {
                left.extend(right);
                Filter::Or(left)
            }
            (Filter::Or(mut left), f) => {
                left.push(f);
                Filter::Or(left)
            }
            (a, b) => Filter::Or(vec![a, b]),
        }
    }

    /// Negate a filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// Evaluate this filter against a document.
    ///
    /// Array-valued fields match an equality or membership test when any
    /// element matches.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => {
                field_matches(document, field, |v| values_equal(v, value))
            }
            Filter::Ne { field, value } => {
                !field_matches(document, field, |v| values_equal(v, value))
            }
            Filter::Lt { field, value } => field_matches(document, field, |v| {
                compare_values(v, value).is_some_and(Ordering::is_lt)
            }),
            Filter::Lte { field, value } => field_matches(document, field, |v| {
                compare_values(v, value).is_some_and(Ordering::is_le)
            }),
            Filter::Gt { field, value } => field_matches(document, field, |v| {
                compare_values(v, value).is_some_and(Ordering::is_gt)
            }),
            Filter::Gte { field, value } => field_matches(document, field, |v| {
                compare_values(v, value).is_some_and(Ordering::is_ge)
            }),
            Filter::In { field, values } => field_matches(document, field, |v| {
                values.iter().any(|candidate| values_equal(v, candidate))
            }),
            Filter::NotIn { field, values } => !field_matches(document, field, |v| {
                values.iter().any(|candidate| values_equal(v, candidate))
            }),
            Filter::Exists { field, exists } => get_path(document, field).is_some() == *exists,
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
            Filter::Not(inner) => !inner.matches(document),
        }
    }

    /// Collect every field name referenced by this filter.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        match self {
            Filter::All => {}
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Gte { field, .. }
            | Filter::In { field, .. }
            | Filter::NotIn { field, .. }
            | Filter::Exists { field, .. } => {
                fields.insert(field.clone());
            }
            Filter::And(filters) | Filter::Or(filters) => {
                for f in filters {
                    f.collect_fields(fields);
                }
            }
            Filter::Not(inner) => inner.collect_fields(fields),
        }
    }

    /// If this filter pins a field to exactly one value, return that value.
    ///
    /// Drivers use this to seed the identity of an upserted document.
    pub fn equality_value(&self, field: &str) -> Option<&Value> {
        match self {
            Filter::Eq { field: f, value } if f == field => Some(value),
            Filter::And(filters) => filters.iter().find_map(|f| f.equality_value(field)),
            _ => None,
        }
    }
}

fn field_matches(document: &Document, field: &str, predicate: impl Fn(&Value) -> bool) -> bool {
    match get_path(document, field) {
        Some(array @ Value::Array(items)) => items.iter().any(&predicate) || predicate(array),
        Some(value) => predicate(value),
        None => predicate(&Value::Null),
    }
}

/// Compare two values for equality, treating all numbers as f64.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two values of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_and_in() {
        let d = doc(json!({"_id": "a", "ParentID": "p1", "ChildID": "c1"}));
        assert!(Filter::eq("ParentID", "p1").matches(&d));
        assert!(!Filter::eq("ParentID", "p2").matches(&d));
        assert!(Filter::is_in("ChildID", ["c0", "c1"]).matches(&d));
        assert!(!Filter::is_in("ChildID", Vec::<String>::new()).matches(&d));
    }

    #[test]
    fn test_relationship_cleanup_shape() {
        let ids = vec!["x".to_string(), "y".to_string()];
        let f = Filter::is_in("ParentID", ids.clone()).or(Filter::is_in("ChildID", ids));
        assert!(f.matches(&doc(json!({"ParentID": "x", "ChildID": "q"}))));
        assert!(f.matches(&doc(json!({"ParentID": "q", "ChildID": "y"}))));
        assert!(!f.matches(&doc(json!({"ParentID": "q", "ChildID": "r"}))));
    }

    #[test]
    fn test_numeric_comparisons_mix_int_and_float() {
        let d = doc(json!({"n": 5}));
        assert!(Filter::gt("n", 4.5).matches(&d));
        assert!(Filter::lte("n", 5).matches(&d));
        assert!(Filter::eq("n", 5.0).matches(&d));
        assert!(!Filter::lt("n", "str").matches(&d));
    }

    #[test]
    fn test_missing_field_behaves_as_null() {
        let d = doc(json!({"a": 1}));
        assert!(Filter::eq("b", Value::Null).matches(&d));
        assert!(Filter::ne("b", 1).matches(&d));
        assert!(Filter::exists("b", false).matches(&d));
        assert!(Filter::not_in("b", [1, 2]).matches(&d));
    }

    #[test]
    fn test_array_field_matches_any_element() {
        let d = doc(json!({"tags": ["red", "blue"]}));
        assert!(Filter::eq("tags", "blue").matches(&d));
        assert!(!Filter::eq("tags", "green").matches(&d));
    }

    #[test]
    fn test_and_flattens_and_drops_all() {
        let f = Filter::All.and(Filter::eq("a", 1));
        assert_eq!(f, Filter::eq("a", 1));

        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        match f {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_not() {
        let d = doc(json!({"a": 1}));
        assert!(Filter::eq("a", 2).not().matches(&d));
    }

    #[test]
    fn test_fields_and_equality_value() {
        let f = Filter::eq("_id", "abc").and(Filter::gt("n", 1));
        let fields: Vec<_> = f.fields().into_iter().collect();
        assert_eq!(fields, vec!["_id".to_string(), "n".to_string()]);
        assert_eq!(f.equality_value("_id"), Some(&json!("abc")));
        assert_eq!(f.equality_value("n"), None);
    }
}
