//! Persistence core configuration.

use docmap_proto::ReadConcern;

/// Database used by entity types that have not been bound elsewhere.
pub const DEFAULT_DATABASE: &str = "default";

/// Identities deleted per cascading round (100k).
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 100_000;

/// Configuration for a [`Db`](crate::Db).
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database name for entity types without an explicit binding.
    pub default_database: String,

    /// Page size for cascading deletes, both for cursor batches and for
    /// partitioning explicit identity sets.
    pub delete_batch_size: usize,

    /// Read concern applied when a transaction begins without one.
    pub read_concern: ReadConcern,
}

impl DbConfig {
    /// Create a configuration using the given default database.
    pub fn new(default_database: impl Into<String>) -> Self {
        Self {
            default_database: default_database.into(),
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            read_concern: ReadConcern::Local,
        }
    }

    /// Set the cascading delete page size. Zero is treated as one.
    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size.max(1);
        self
    }

    /// Set the read concern used for new transactions.
    pub fn with_read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = read_concern;
        self
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.default_database, DEFAULT_DATABASE);
        assert_eq!(config.delete_batch_size, DEFAULT_DELETE_BATCH_SIZE);
        assert_eq!(config.read_concern, ReadConcern::Local);
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("shop")
            .with_delete_batch_size(0)
            .with_read_concern(ReadConcern::Majority);

        assert_eq!(config.default_database, "shop");
        assert_eq!(config.delete_batch_size, 1);
        assert_eq!(config.read_concern, ReadConcern::Majority);
    }
}
