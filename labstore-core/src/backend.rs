//! Storage backend abstraction for the collection facade.
//!
//! This module defines the primitives a document store must offer so that
//! [`CollectionFacade`](crate::collection::CollectionFacade) and
//! [`ConnectionManager`](crate::manager::ConnectionManager) can run on top of it. Everything
//! that crosses this boundary is already in native form ([`bson::Document`]); coercion from
//! and to wire values happens one layer up.
//!
//! # Traits
//!
//! - [`StoreBackend`]: the per-database primitives (collections, indexes, CRUD, aggregation)
//! - [`StoreBackendBuilder`]: connects to a database and yields a backend
//!
//! # Error Handling
//!
//! Store failures are reported as [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend)
//! and travel unchanged up to the caller of the facade. No layer above retries them.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{
    error::DocumentStoreResult,
    event::StoreEventListener,
    index::IndexSpec,
    options::{AggregateOptions, DeleteOptions, FindOptions, InsertOptions, UpdateOptions},
};

/// A lazy, finite stream of native documents. To restart it, issue the query again.
pub type DocumentCursor = BoxStream<'static, DocumentStoreResult<Document>>;

/// Acknowledgement of an `update`, in native form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Number of documents the filter matched.
    pub matched: u64,
    /// Number of documents actually changed.
    pub modified: u64,
    /// Identifier of the document inserted by an upsert, if any.
    pub upserted_id: Option<Bson>,
}

/// Result of an atomic insert-if-absent-else-update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertResult {
    /// The document after (or before, if requested) the write. `None` if nothing matched and
    /// nothing was inserted, or if a fresh insert was asked to return the old document.
    pub document: Option<Document>,
    /// Number of documents affected (0 or 1).
    pub affected: u64,
    /// `true` if an existing document was updated.
    pub updated_existing: bool,
    /// Identifier of the inserted document when the write created one.
    pub upserted_id: Option<Bson>,
}

/// Acknowledgement of a `delete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted: u64,
}

/// Returns `true` if `document` is an update-operator expression (`{ $set: … }`) rather than
/// a whole replacement document.
pub fn is_update_expression(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

/// Abstract interface for document storage backends.
///
/// Implementations must be thread-safe; one backend instance is shared by every facade of
/// a connection and operations may run concurrently.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Name of the database this backend is connected to.
    fn database_name(&self) -> &str;

    /// Creates a collection. Creating a collection that already exists succeeds.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the database.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Creates an index.
    ///
    /// Re-creating an index with an identical definition is a no-op. A different definition
    /// under an existing name, or the same keys under a different name, is an error.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()>;

    /// Runs a query and returns a lazy cursor over the matches.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocumentStoreResult<DocumentCursor>;

    /// Atomically updates the first document matching `filter`, or inserts one if none
    /// matches and `options.upsert()` is set.
    ///
    /// `document` is either a replacement document or an update-operator expression
    /// (see [`is_update_expression`]).
    async fn find_one_and_upsert(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        options: &InsertOptions,
    ) -> DocumentStoreResult<UpsertResult>;

    /// Applies an update expression (or a replacement, when `multi` is off) to matching documents.
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Removes matching documents.
    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<DeleteResult>;

    /// Executes an aggregation pipeline and returns a lazy cursor over its output.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> DocumentStoreResult<DocumentCursor>;

    /// Closes the connection and releases its resources.
    ///
    /// The default implementation is a no-op.
    async fn close(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Factory trait for connecting a backend to a named database.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend + 'static;

    /// Connects to `database`. Lifecycle notifications go to `listener`.
    async fn connect(
        self,
        database: &str,
        listener: StoreEventListener,
    ) -> DocumentStoreResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn operator_documents_are_update_expressions() {
        assert!(is_update_expression(&doc! { "$set": { "name": "a" } }));
        assert!(!is_update_expression(&doc! { "name": "a" }));
        assert!(!is_update_expression(&doc! {}));
    }
}
