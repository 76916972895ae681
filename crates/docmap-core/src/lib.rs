//! docmap core - entity persistence over a document database.
//!
//! This crate maps typed entities onto collections of a document database
//! reached through the [`driver`] boundary. It provides:
//!
//! - Identity assignment and save interception ([`lifecycle`], [`hooks`])
//! - Full, partial and field-preserving saves ([`save`])
//! - Cascading deletes across join collections and binary chunks ([`delete`])
//! - Many-to-many join collections ([`relationship`])
//! - Filtered reads ([`read`])
//! - Transactions with post-commit callbacks ([`transaction`])
//! - An in-memory reference driver ([`store`])
//!
//! [`Db`] is the entry point.

pub mod cancel;
pub mod chunks;
pub mod config;
pub mod db;
pub mod delete;
pub mod driver;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod lifecycle;
pub mod read;
pub mod relationship;
pub mod save;
pub mod store;
pub mod transaction;

pub use cancel::Cancellation;
pub use config::DbConfig;
pub use db::{Db, EntityExt};
pub use driver::{Client, Collection, Cursor, Database, Session, SessionHandle};
pub use entity::{Entity, ObjectId, Preservation, SessionSlot};
pub use error::{Error, Result, StoreError};
pub use hooks::{DataFilter, HookRegistry, HookTarget, PredicateFilter, SaveInterceptor};
pub use relationship::{JoinRecord, Relationship};
pub use save::SavePlan;
pub use store::{MemoryClient, MemorySession};
pub use transaction::{Transaction, TransactionState};

/// Protocol types shared with drivers.
pub use docmap_proto as proto;
