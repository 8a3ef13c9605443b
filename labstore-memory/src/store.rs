//! In-memory storage implementation for the collection facade.
//!
//! This module provides a simple but complete backend that keeps documents as BSON in
//! HashMaps behind an async-aware read-write lock. Secondary indexes are not used for
//! lookups, but unique and sparse constraints are enforced exactly like a real store
//! would, so provisioning and constraint violations behave the same in tests.

use std::{collections::HashMap, fmt, sync::Arc};
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;

use labstore_core::{
    backend::{
        DeleteResult, DocumentCursor, StoreBackend, StoreBackendBuilder, UpdateResult, UpsertResult,
        is_update_expression,
    },
    collection::PRIMARY_KEY,
    error::{DocumentStoreError, DocumentStoreResult},
    event::{StoreEvent, StoreEventListener, silent_listener},
    index::IndexSpec,
    options::{AggregateOptions, DeleteOptions, FindOptions, InsertOptions, UpdateOptions},
};

use crate::{
    evaluator::{Comparable, lookup, matches},
    pipeline,
    update::{apply_update, ensure_primary_key, seed_from_filter},
};

#[derive(Debug, Default, Clone)]
struct CollectionData {
    /// Documents in insertion order.
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

type StoreMap = HashMap<String, CollectionData>;


/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// shared across async tasks. Clones share the same underlying data, which lets a test
/// reconnect to a store that an earlier connection already provisioned.
///
/// # Performance
///
/// Queries scan all documents in a collection. For the data sizes a test or a local
/// development run produces this is fine; use the MongoDB backend for anything else.
///
/// # Example
///
/// ```ignore
/// use labstore_memory::InMemoryStore;
/// use labstore_core::{backend::StoreBackend, options::FindOptions};
/// use bson::doc;
///
/// let store = InMemoryStore::new("labs");
/// store.create_collection("users").await?;
/// let cursor = store.find("users", doc! { "user": "ana" }, &FindOptions::default()).await?;
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    database: String,
    /// The main storage map: collection_name -> documents and index definitions
    store: Arc<RwLock<StoreMap>>,
    listener: StoreEventListener,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory database called `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            store: Arc::new(RwLock::new(StoreMap::new())),
            listener: silent_listener(),
        }
    }

    /// Creates a builder that connects a fresh store.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Index definitions currently registered on `collection`.
    pub async fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|data| data.indexes.clone())
            .unwrap_or_default()
    }

    /// Number of documents stored in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.store
            .read()
            .await
            .get(collection)
            .map(|data| data.documents.len())
            .unwrap_or(0)
    }

    fn cursor(documents: Vec<Document>) -> DocumentCursor {
        stream::iter(documents.into_iter().map(Ok)).boxed()
    }

    fn duplicate_key(&self, collection: &str, index: &IndexSpec, key: &[Bson]) -> DocumentStoreError {
        let key = index
            .fields
            .iter()
            .zip(key)
            .map(|((field, _), value)| format!("{field}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");

        DocumentStoreError::Backend(format!(
            "E11000 duplicate key error collection: {}.{collection} index: {} dup key: {{ {key} }}",
            self.database, index.name,
        ))
    }

    /// Verifies that `candidate` does not violate the primary key or a unique index of `data`.
    ///
    /// `replacing` is the position of the document being rewritten, which is skipped.
    fn check_unique(
        &self,
        collection: &str,
        data: &CollectionData,
        candidate: &Document,
        replacing: Option<usize>,
    ) -> DocumentStoreResult<()> {
        let primary = IndexSpec::builder("_id_").ascending(PRIMARY_KEY).unique(true).build();

        for index in std::iter::once(&primary).chain(data.indexes.iter().filter(|index| index.unique)) {
            let Some(key) = index_key(index, candidate) else { continue };

            let clash = data
                .documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != replacing)
                .filter_map(|(_, existing)| index_key(index, existing))
                .any(|existing| same_key(&existing, &key));

            if clash {
                return Err(self.duplicate_key(collection, index, &key));
            }
        }

        Ok(())
    }
}

/// Values a document contributes to an index, or `None` if a sparse index skips it.
fn index_key(index: &IndexSpec, document: &Document) -> Option<Vec<Bson>> {
    let values = index
        .fields
        .iter()
        .map(|(field, _)| lookup(document, field).cloned())
        .collect::<Vec<_>>();

    if index.sparse && values.iter().all(Option::is_none) {
        return None;
    }

    Some(
        values
            .into_iter()
            .map(|value| value.unwrap_or(Bson::Null))
            .collect()
    )
}

fn same_key(left: &[Bson], right: &[Bson]) -> bool {
    left.iter()
        .zip(right)
        .all(|(a, b)| Comparable::from(a) == Comparable::from(b))
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        for existing in &data.indexes {
            match (existing.name == index.name, existing.same_definition(index)) {
                (true, true) => return Ok(()),
                (true, false) => {
                    return Err(DocumentStoreError::IndexConflict(collection.to_string(), index.name.clone()));
                }
                (false, _) if existing.fields == index.fields => {
                    return Err(DocumentStoreError::IndexConflict(collection.to_string(), index.name.clone()));
                }
                _ => {}
            }
        }

        if index.unique {
            let keys = data
                .documents
                .iter()
                .filter_map(|document| index_key(index, document))
                .collect::<Vec<_>>();

            for (position, key) in keys.iter().enumerate() {
                if keys[..position].iter().any(|earlier| same_key(earlier, key)) {
                    return Err(self.duplicate_key(collection, index, key));
                }
            }
        }

        tracing::debug!(target: "labstore::store", collection, index = %index.name, "index created");
        data.indexes.push(index.clone());

        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(Self::cursor(Vec::new()));
        };

        let mut found = Vec::new();
        for document in &data.documents {
            if matches(document, &filter)? {
                found.push(document.clone());
            }
        }
        drop(store);

        if let Some(sort) = options.native_sort() {
            pipeline::sort_documents(&mut found, &sort)?;
        }

        // A negative limit means "at most |n|", zero means no limit.
        let limit = match options.limit {
            Some(0) | None => usize::MAX,
            Some(n) => n.unsigned_abs() as usize,
        };

        let mut results = found
            .into_iter()
            .skip(options.skip.unwrap_or(0) as usize)
            .take(limit)
            .collect::<Vec<_>>();

        if let Some(projection) = options.native_projection() {
            results = results
                .iter()
                .map(|document| pipeline::project(document, &projection))
                .collect::<DocumentStoreResult<_>>()?;
        }

        Ok(Self::cursor(results))
    }

    async fn find_one_and_upsert(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        options: &InsertOptions,
    ) -> DocumentStoreResult<UpsertResult> {
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        let mut position = None;
        for (index, existing) in data.documents.iter().enumerate() {
            if matches(existing, &filter)? {
                position = Some(index);
                break;
            }
        }

        if let Some(position) = position {
            let before = data.documents[position].clone();
            let mut after = before.clone();
            apply_update(&mut after, &document, false)?;
            self.check_unique(collection, data, &after, Some(position))?;
            data.documents[position] = after.clone();

            return Ok(UpsertResult {
                document: Some(if options.return_new_document() { after } else { before }),
                affected: 1,
                updated_existing: true,
                upserted_id: None,
            });
        }

        if !options.upsert() {
            return Ok(UpsertResult::default());
        }

        let mut inserted = seed_from_filter(&filter)?;
        apply_update(&mut inserted, &document, true)?;
        let id = ensure_primary_key(&mut inserted);
        self.check_unique(collection, data, &inserted, None)?;
        data.documents.push(inserted.clone());

        Ok(UpsertResult {
            document: options.return_new_document().then_some(inserted),
            affected: 1,
            updated_existing: false,
            upserted_id: Some(id),
        })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        if options.multi() && !is_update_expression(&update) {
            return Err(DocumentStoreError::Backend(
                "multi update is not supported for replacement-style update".to_string(),
            ));
        }

        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        let mut targets = Vec::new();
        for (index, existing) in data.documents.iter().enumerate() {
            if matches(existing, &filter)? {
                targets.push(index);
                if !options.multi() {
                    break;
                }
            }
        }

        if targets.is_empty() {
            if !options.upsert() {
                return Ok(UpdateResult::default());
            }

            let mut inserted = seed_from_filter(&filter)?;
            apply_update(&mut inserted, &update, true)?;
            let id = ensure_primary_key(&mut inserted);
            self.check_unique(collection, data, &inserted, None)?;
            data.documents.push(inserted);

            return Ok(UpdateResult {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        // Stage every rewrite first so a constraint violation leaves the collection untouched.
        let mut staged = data.clone();
        let mut modified = 0;
        for &position in &targets {
            let mut next = staged.documents[position].clone();
            apply_update(&mut next, &update, false)?;
            if next != staged.documents[position] {
                self.check_unique(collection, &staged, &next, Some(position))?;
                staged.documents[position] = next;
                modified += 1;
            }
        }
        *data = staged;

        Ok(UpdateResult {
            matched: targets.len() as u64,
            modified,
            upserted_id: None,
        })
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };

        // Every filter evaluation must succeed before anything is removed.
        let mut doomed = Vec::new();
        for (position, document) in data.documents.iter().enumerate() {
            if matches(document, &filter)? {
                doomed.push(position);
                if options.single() {
                    break;
                }
            }
        }

        let mut position = 0;
        data.documents.retain(|_| {
            let keep = doomed.binary_search(&position).is_err();
            position += 1;
            keep
        });

        Ok(DeleteResult { deleted: doomed.len() as u64 })
    }

    async fn aggregate(
        &self,
        collection: &str,
        stages: Vec<Document>,
        _options: &AggregateOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        let documents = self.store
            .read()
            .await
            .get(collection)
            .map(|data| data.documents.clone())
            .unwrap_or_default();

        Ok(Self::cursor(pipeline::run(documents, &stages)?))
    }

    async fn close(&self) -> DocumentStoreResult<()> {
        (self.listener)(StoreEvent::Closed { database: self.database.clone() });
        Ok(())
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
///
/// By default every connection gets a fresh, empty store. [`InMemoryStoreBuilder::shared`]
/// connects to the data of an existing store instead.
///
/// # Example
///
/// ```ignore
/// use labstore_core::{index::IndexProvisioner, manager::ConnectionManager};
/// use labstore_memory::InMemoryStore;
///
/// let mut manager = ConnectionManager::new(IndexProvisioner::labs());
/// manager.setup("labs", InMemoryStore::builder()).await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    existing: Option<InMemoryStore>,
}

impl InMemoryStoreBuilder {
    /// Connects to the data held by `store` rather than to a new store.
    pub fn shared(store: &InMemoryStore) -> Self {
        Self { existing: Some(store.clone()) }
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn connect(self, database: &str, listener: StoreEventListener) -> DocumentStoreResult<Self::Backend> {
        if database.is_empty() {
            return Err(DocumentStoreError::Configuration("database name must not be empty".to_string()));
        }

        let store = match self.existing {
            Some(existing) => existing.store,
            None => Arc::new(RwLock::new(StoreMap::new())),
        };

        tracing::debug!(target: "labstore::store", database, "in-memory store connected");

        Ok(InMemoryStore {
            database: database.to_string(),
            store,
            listener,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;
    use labstore_core::coerce::to_wire_document;
    use std::sync::Mutex;

    async fn collect(cursor: DocumentCursor) -> Vec<Document> {
        cursor.try_collect().await.unwrap()
    }

    fn unique_user() -> IndexSpec {
        IndexSpec::builder("user_1").ascending("user").unique(true).build()
    }

    #[tokio::test]
    async fn find_filters_sorts_and_pages() {
        let store = InMemoryStore::new("labs");
        for (id, age) in [(1, 40), (2, 20), (3, 30)] {
            store
                .find_one_and_upsert("users", doc! { "_id": id }, doc! { "age": age }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        let options = FindOptions::default()
            .with_sort(to_wire_document(&doc! { "age": 1 }))
            .with_skip(1)
            .with_limit(1)
            .with_projection(to_wire_document(&doc! { "_id": 1 }));
        let found = collect(store.find("users", doc! { "age": { "$gte": 20 } }, &options).await.unwrap()).await;

        assert_eq!(found, vec![doc! { "_id": 3 }]);
    }

    #[tokio::test]
    async fn find_on_a_missing_collection_is_empty() {
        let store = InMemoryStore::new("labs");

        assert!(collect(store.find("nothing", doc! {}, &FindOptions::default()).await.unwrap()).await.is_empty());
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_the_same_key() {
        let store = InMemoryStore::new("labs");
        let options = InsertOptions::defaults();

        let first = store
            .find_one_and_upsert("users", doc! { "_id": "u1" }, doc! { "_id": "u1", "name": "a" }, &options)
            .await
            .unwrap();
        let second = store
            .find_one_and_upsert("users", doc! { "_id": "u1" }, doc! { "_id": "u1", "name": "b" }, &options)
            .await
            .unwrap();

        assert!(!first.updated_existing);
        assert_eq!(first.upserted_id, Some(Bson::String("u1".into())));
        assert!(second.updated_existing);
        assert_eq!(second.document, Some(doc! { "_id": "u1", "name": "b" }));
        assert_eq!(store.count("users").await, 1);
    }

    #[tokio::test]
    async fn upsert_without_upsert_flag_does_nothing() {
        let store = InMemoryStore::new("labs");
        let options = InsertOptions { upsert: Some(false), return_new_document: None };

        let result = store
            .find_one_and_upsert("users", doc! { "_id": 1 }, doc! { "name": "a" }, &options)
            .await
            .unwrap();

        assert_eq!(result, UpsertResult::default());
        assert_eq!(store.count("users").await, 0);
    }

    #[tokio::test]
    async fn update_single_multi_and_upsert() {
        let store = InMemoryStore::new("labs");
        for id in 1..=3 {
            store
                .find_one_and_upsert("samples", doc! { "_id": id }, doc! { "farm": "north" }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        let single = store
            .update("samples", doc! { "farm": "north" }, doc! { "$set": { "checked": true } }, &UpdateOptions::defaults())
            .await
            .unwrap();
        let multi = store
            .update(
                "samples",
                doc! { "farm": "north" },
                doc! { "$set": { "checked": true } },
                &UpdateOptions { upsert: Some(false), multi: Some(true) },
            )
            .await
            .unwrap();
        let upserted = store
            .update("samples", doc! { "farm": "south" }, doc! { "$set": { "checked": false } }, &UpdateOptions::defaults())
            .await
            .unwrap();

        assert_eq!((single.matched, single.modified), (1, 1));
        assert_eq!((multi.matched, multi.modified), (3, 2));
        assert!(matches!(upserted.upserted_id, Some(Bson::ObjectId(_))));
        assert_eq!(store.count("samples").await, 4);
    }

    #[tokio::test]
    async fn replacement_updates_cannot_be_multi() {
        let store = InMemoryStore::new("labs");
        let options = UpdateOptions { upsert: None, multi: Some(true) };

        assert!(store.update("samples", doc! {}, doc! { "farm": "x" }, &options).await.is_err());
    }

    #[tokio::test]
    async fn delete_honours_single() {
        let store = InMemoryStore::new("labs");
        for id in 1..=3 {
            store
                .find_one_and_upsert("tokens", doc! { "_id": id }, doc! { "user": "ana" }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        let one = store.delete("tokens", doc! { "user": "ana" }, &DeleteOptions { single: Some(true) }).await.unwrap();
        let rest = store.delete("tokens", doc! { "user": "ana" }, &DeleteOptions::default()).await.unwrap();

        assert_eq!((one.deleted, rest.deleted), (1, 2));
        assert_eq!(store.count("tokens").await, 0);
    }

    #[tokio::test]
    async fn failed_delete_leaves_the_collection_intact() {
        let store = InMemoryStore::new("labs");
        for id in 1..=3 {
            store
                .find_one_and_upsert("audits", doc! { "_id": id }, doc! { "name": "event" }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        let result = store
            .delete("audits", doc! { "name": { "$regex": "ev" } }, &DeleteOptions::default())
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Backend(_))));
        assert_eq!(store.count("audits").await, 3);
    }

    #[tokio::test]
    async fn upserts_cannot_duplicate_a_primary_key() {
        let store = InMemoryStore::new("labs");
        store
            .find_one_and_upsert("tokens", doc! { "_id": "t-1" }, doc! { "jti": "a" }, &InsertOptions::defaults())
            .await
            .unwrap();

        let error = store
            .update(
                "tokens",
                doc! { "_id": "t-1", "jti": "zzz" },
                doc! { "$set": { "sub": "x" } },
                &UpdateOptions::defaults(),
            )
            .await
            .unwrap_err();

        assert!(error.to_string().contains("E11000"));
        assert!(error.to_string().contains("_id_"));
        assert_eq!(store.count("tokens").await, 1);
    }

    #[tokio::test]
    async fn index_creation_is_idempotent_and_detects_conflicts() {
        let store = InMemoryStore::new("labs");

        store.create_index("users", &unique_user()).await.unwrap();
        store.create_index("users", &unique_user()).await.unwrap();

        let renamed = IndexSpec::builder("by_user").ascending("user").unique(true).build();
        let redefined = IndexSpec::builder("user_1").ascending("user").build();

        assert!(matches!(
            store.create_index("users", &renamed).await,
            Err(DocumentStoreError::IndexConflict(_, _))
        ));
        assert!(matches!(
            store.create_index("users", &redefined).await,
            Err(DocumentStoreError::IndexConflict(_, _))
        ));
        assert_eq!(store.indexes("users").await.len(), 1);
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = InMemoryStore::new("labs");
        store.create_index("users", &unique_user()).await.unwrap();

        store
            .find_one_and_upsert("users", doc! { "_id": 1 }, doc! { "user": "ana" }, &InsertOptions::defaults())
            .await
            .unwrap();
        let error = store
            .find_one_and_upsert("users", doc! { "_id": 2 }, doc! { "user": "ana" }, &InsertOptions::defaults())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("E11000"));
        assert_eq!(store.count("users").await, 1);
    }

    #[tokio::test]
    async fn sparse_unique_indexes_skip_missing_fields() {
        let store = InMemoryStore::new("labs");
        let sparse = IndexSpec::builder("user_1").ascending("user").unique(true).sparse(true).build();
        store.create_index("users", &sparse).await.unwrap();

        for id in 1..=2 {
            store
                .find_one_and_upsert("users", doc! { "_id": id }, doc! { "name": "anon" }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        assert_eq!(store.count("users").await, 2);
    }

    #[tokio::test]
    async fn unique_index_over_existing_duplicates_fails() {
        let store = InMemoryStore::new("labs");
        for id in 1..=2 {
            store
                .find_one_and_upsert("users", doc! { "_id": id }, doc! { "user": "ana" }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        assert!(store.create_index("users", &unique_user()).await.is_err());
    }

    #[tokio::test]
    async fn aggregate_runs_the_pipeline() {
        let store = InMemoryStore::new("labs");
        for (id, farm) in [(1, "north"), (2, "north"), (3, "south")] {
            store
                .find_one_and_upsert("samples", doc! { "_id": id }, doc! { "farm": farm }, &InsertOptions::defaults())
                .await
                .unwrap();
        }

        let cursor = store
            .aggregate(
                "samples",
                vec![doc! { "$match": { "farm": "north" } }, doc! { "$count": "n" }],
                &AggregateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(collect(cursor).await, vec![doc! { "n": 2 }]);
    }

    #[tokio::test]
    async fn shared_builder_sees_existing_data_and_close_notifies() {
        let events = Arc::new(Mutex::new(Vec::<StoreEvent>::new()));
        let sink = events.clone();
        let listener: StoreEventListener = Arc::new(move |event: StoreEvent| sink.lock().unwrap().push(event));

        let original = InMemoryStore::new("labs");
        original.create_collection("audits").await.unwrap();

        let reconnected = InMemoryStoreBuilder::shared(&original)
            .connect("labs", listener)
            .await
            .unwrap();
        reconnected.close().await.unwrap();

        assert_eq!(reconnected.list_collections().await.unwrap(), vec!["audits".to_string()]);
        assert_eq!(*events.lock().unwrap(), vec![StoreEvent::Closed { database: "labs".into() }]);
    }

    #[tokio::test]
    async fn connect_requires_a_database_name() {
        let result = InMemoryStore::builder().connect("", silent_listener()).await;

        assert!(matches!(result, Err(DocumentStoreError::Configuration(_))));
    }
}
