//! MongoDB backend implementation for labstore.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! update expressions and pipelines are already in store syntax when they reach this layer,
//! so they are handed to the driver unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! labstore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data lives in a self-hosted MongoDB deployment or Atlas
//! - **Eager connection check** - `connect` pings the server so setup fails fast
//! - **Lifecycle events** - Topology and pool events are forwarded as `StoreEvent`s
//! - **Idempotent provisioning** - Existing collections and identical indexes are accepted
//!
//! # Example
//!
//! ```ignore
//! use labstore::{config::DatabaseConfig, index::IndexProvisioner, manager::ConnectionManager};
//! use labstore::mongodb::MongoDbStoreBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::load(None)?;
//!     let mut manager = ConnectionManager::new(IndexProvisioner::labs()).with_config(&config);
//!
//!     manager.setup(&config.name, MongoDbStoreBuilder::from_config(&config)).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as labstore_mongodb;

mod events;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
