//! In-memory document storage backend for labstore.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development
//! and tests, where it stands in for a MongoDB deployment.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Store query syntax** - Filters, sorts and projections use the same documents MongoDB accepts
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$setOnInsert` and replacements
//! - **Aggregation subset** - `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$addFields`,
//!   `$unwind`, `$group`, `$count`
//! - **Index constraints** - Unique and sparse indexes are enforced on every write
//!
//! # Quick Start
//!
//! ```ignore
//! use labstore_core::{index::IndexProvisioner, manager::ConnectionManager, options::InsertOptions};
//! use labstore_memory::InMemoryStore;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manager = ConnectionManager::new(IndexProvisioner::labs());
//!     manager.setup("labs", InMemoryStore::builder()).await?;
//!
//!     let users = manager.collection("users")?;
//!     users.insert(&json!({ "_id": "u1", "user": "ana" }), InsertOptions::default()).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as labstore_memory;

mod evaluator;
mod pipeline;
mod update;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
