//! Aggregation stages.
//!
//! A pipeline is an ordered list of [`Stage`]s. [`run`] evaluates one over an
//! in-memory document set; remote drivers translate stages instead.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{get_path, project, Document};
use crate::error::Error;
use crate::filter::{compare_values, Filter};
use crate::options::{SortDirection, SortSpec};

/// One stage of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    /// Keep documents matching a filter.
    Match(Filter),
    /// Order documents.
    Sort(Vec<SortSpec>),
    /// Drop the first N documents.
    Skip(usize),
    /// Keep at most N documents.
    Limit(usize),
    /// Keep only the named root-level fields (identity is always kept).
    Project(Vec<String>),
    /// Replace the stream with a single `{ <field>: count }` document.
    Count(String),
}

/// Run a pipeline over a document set.
pub fn run(documents: Vec<Document>, stages: &[Stage]) -> Result<Vec<Document>, Error> {
    let mut current = documents;
    for stage in stages {
        current = match stage {
            Stage::Match(filter) => current.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Sort(specs) => {
                sort_documents(&mut current, specs);
                current
            }
            Stage::Skip(n) => current.into_iter().skip(*n).collect(),
            Stage::Limit(n) => current.into_iter().take(*n).collect(),
            Stage::Project(fields) => current.iter().map(|d| project(d, fields)).collect(),
            Stage::Count(field) => {
                if field.is_empty() || field.contains('.') || field.starts_with('$') {
                    return Err(Error::InvalidOperation(format!(
                        "invalid count field name: {:?}",
                        field
                    )));
                }
                let mut out = Document::new();
                out.insert(field.clone(), Value::from(current.len() as u64));
                vec![out]
            }
        };
    }
    Ok(current)
}

/// Sort documents in place. Missing fields order before present ones.
pub fn sort_documents(documents: &mut [Document], specs: &[SortSpec]) {
    if specs.is_empty() {
        return;
    }
    documents.sort_by(|a, b| {
        for spec in specs {
            let ordering = match (get_path(a, &spec.field), get_path(b, &spec.field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            };
            let ordering = match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
