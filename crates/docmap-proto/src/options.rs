//! Find, session and transaction options.

use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order (default).
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// Ordering on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort by.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Options for a find operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Root-level fields to return (identity is always returned).
    pub projection: Option<Vec<String>>,
    /// Sort order.
    pub sort: Vec<SortSpec>,
    /// Documents to skip.
    pub skip: Option<usize>,
    /// Maximum documents to return.
    pub limit: Option<usize>,
    /// Documents per cursor batch.
    pub batch_size: Option<usize>,
}

impl FindOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection.
    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Add a sort specification.
    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }

    /// Set the skip count.
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the cursor batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }
}

/// A collection-name pattern for listing collections.
///
/// A name matches when it contains every listed fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePattern {
    /// Fragments that must all occur in the name.
    pub contains: Vec<String>,
}

impl NamePattern {
    /// Create a pattern from fragments.
    pub fn containing<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            contains: fragments.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether a collection name matches.
    pub fn matches(&self, name: &str) -> bool {
        self.contains.iter().all(|fragment| name.contains(fragment.as_str()))
    }
}

/// Read concern for transactional reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadConcern {
    /// Return the node's most recent data.
    #[default]
    Local,
    /// Return data acknowledged by a majority.
    Majority,
    /// Return data from a consistent snapshot.
    Snapshot,
}

/// Options for starting a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Whether reads in the session are causally consistent.
    pub causal_consistency: bool,
}

/// Options for starting a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Read concern for reads inside the transaction. `None` uses the
    /// caller's configured default.
    pub read_concern: Option<ReadConcern>,
    /// Database to run the transaction against. `None` uses the default.
    pub database: Option<String>,
    /// Session options for the underlying session.
    pub session: SessionOptions,
}

impl TransactionOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read concern.
    pub fn with_read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    /// Set the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the session options.
    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern() {
        let pattern = NamePattern::containing(["~", "Flower"]);
        assert!(pattern.matches("[Flower~Customer(Customers)]"));
        assert!(!pattern.matches("Flower"));
        assert!(!pattern.matches("[Tree~Customer(Owners)]"));
    }

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .with_projection(["_id"])
            .with_sort(SortSpec::desc("n"))
            .with_batch_size(0)
            .with_limit(5);
        assert_eq!(options.projection, Some(vec!["_id".to_string()]));
        assert_eq!(options.batch_size, Some(1));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.sort[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_transaction_options_builder() {
        let options = TransactionOptions::new().with_database("shop");
        assert_eq!(options.read_concern, None);
        assert_eq!(options.database.as_deref(), Some("shop"));

        let options = options.with_read_concern(ReadConcern::Snapshot);
        assert_eq!(options.read_concern, Some(ReadConcern::Snapshot));
    }
}
