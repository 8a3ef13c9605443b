//! Main labstore crate: a document-store access layer for the labs backend.
//!
//! This crate is the primary entry point. It re-exports the core types from the sub-crates
//! and gives access to the storage backends. Application code deals in JSON values
//! ([`serde_json::Value`]); the layer converts them to and from the store's native BSON
//! representation, provisions collections and indexes at startup, and logs a readable
//! summary of every operation through `tracing`.
//!
//! # Features
//!
//! - **Typed coercion** - Date, UUID and ObjectId strings become native values on the way in
//!   and canonical strings on the way out
//! - **Uniform collection facade** - `find`, `insert`, `update`, `delete` and `aggregate`
//!   on every collection
//! - **Startup provisioning** - Collections and indexes are created once, idempotently
//! - **Multiple backends** - In-memory storage, and MongoDB behind the `mongodb` feature
//!
//! # Quick Start
//!
//! ```ignore
//! use labstore::{prelude::*, memory::InMemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let config = DatabaseConfig::load(None)?;
//!     let mut manager = ConnectionManager::new(IndexProvisioner::labs()).with_config(&config);
//!     manager.setup(&config.name, InMemoryStore::builder()).await?;
//!
//!     let users = manager.collection("users")?;
//!     users
//!         .insert(&json!({ "user": "ana@labs.io", "createdAt": "2024-01-15T08:30:00.000Z" }), InsertOptions::default())
//!         .await?;
//!
//!     let found = users.find(&json!({ "user": "ana@labs.io" }), FindOptions::default()).await?;
//!     println!("{found:?}");
//!
//!     manager.close().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use labstore_core::{backend, coerce, collection, config, error, event, index, manager, options, summary};

// Re-export the value types of both sides of the boundary
pub use bson;
pub use serde_json;

/// In-memory storage backend implementations.
pub mod memory {
    pub use labstore_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use labstore_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
