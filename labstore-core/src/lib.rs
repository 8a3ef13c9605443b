//! Document marshalling and collection facade layer for the labs reporting backend.
//!
//! Application code works with JSON-shaped documents only. This crate sits between those
//! documents and a schemaless document store and provides:
//!
//! - **Type coercion** ([`coerce`]) - Recursive, lossless conversion between wire values and store-native values
//! - **Outcome summaries** ([`summary`]) - Readable one-line descriptions of store results for logs
//! - **Index provisioning** ([`index`]) - Static per-collection index definitions
//! - **Collection facade** ([`collection`]) - The five-operation interface application code uses
//! - **Connection management** ([`manager`]) - Connection lifecycle and startup provisioning
//! - **Backend abstraction** ([`backend`]) - Traits for implementing document store backends
//! - **Options** ([`options`]) - Per-operation options with documented defaults
//! - **Lifecycle events** ([`event`]) - Notifications from the store connection
//! - **Configuration** ([`config`]) - Connection settings from TOML and the environment
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use labstore_core::{index::IndexProvisioner, manager::ConnectionManager, options::FindOptions};
//! use serde_json::json;
//!
//! let mut manager = ConnectionManager::new(IndexProvisioner::labs());
//! manager.setup("labs", backend_builder).await?;
//!
//! let users = manager.collection("users")?;
//! let active = users
//!     .find(&json!({ "isDeleted": { "$ne": true } }), FindOptions::default())
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as labstore_core;

pub mod backend;
pub mod coerce;
pub mod collection;
pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod manager;
pub mod options;
pub mod summary;
