//! Convenient re-exports of commonly used types from labstore.
//!
//! ```ignore
//! use labstore::prelude::*;
//! ```
//!
//! This provides access to:
//! - The connection manager and collection facade
//! - Index definitions and configuration
//! - Per-operation options and results
//! - Error types

pub use labstore_core::{
    backend::{StoreBackend, StoreBackendBuilder, DocumentCursor},
    collection::{CollectionFacade, DeleteAcknowledgement, InsertOutcome, WriteAcknowledgement},
    config::DatabaseConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    event::{StoreEvent, StoreEventListener},
    index::{CollectionDefinition, IndexProvisioner, IndexSpec},
    manager::{ConnectionManager, ConnectionState},
    options::{AggregateOptions, DeleteOptions, FindOptions, InsertOptions, UpdateOptions},
};
