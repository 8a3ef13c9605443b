use std::time::Duration;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, FindOptions as MongoFindOptions, IndexOptions},
};
use labstore_core::{
    backend::{
        DeleteResult, DocumentCursor, StoreBackend, StoreBackendBuilder, UpdateResult, UpsertResult,
        is_update_expression,
    },
    config::DatabaseConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    event::StoreEventListener,
    index::IndexSpec,
    options::{AggregateOptions, DeleteOptions, FindOptions, InsertOptions, UpdateOptions},
};

use crate::events::{cmap_handler, sdam_handler};

/// Server error code for "collection already exists".
const NAMESPACE_EXISTS: i32 = 48;
/// Server error codes for an index that clashes by name or by keys.
const INDEX_CONFLICTS: [i32; 2] = [85, 86];

fn backend_error(error: MongoError) -> DocumentStoreError {
    DocumentStoreError::Backend(error.to_string())
}

fn command_code(error: &MongoError) -> Option<i32> {
    match &*error.kind {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn count(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        Some(Bson::Double(n)) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}


#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(uri: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(uri)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        match self.client.database(&self.database).create_collection(name).await {
            Ok(()) => Ok(()),
            Err(e) if command_code(&e) == Some(NAMESPACE_EXISTS) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        names.sort();

        Ok(names)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        let model = IndexModel::builder()
            .keys(index.keys())
            .options(
                IndexOptions::builder()
                .name(index.name.clone())
                .unique(index.unique)
                .sparse(index.sparse)
                .background(index.background)
                .build()
            )
            .build();

        match self.get_collection(collection).create_index(model).await {
            Ok(_) => Ok(()),
            Err(e) if command_code(&e).is_some_and(|code| INDEX_CONFLICTS.contains(&code)) => {
                Err(DocumentStoreError::IndexConflict(collection.to_string(), index.name.clone()))
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        let mut find_options = MongoFindOptions::default();
        find_options.projection = options.native_projection();
        find_options.sort = options.native_sort();
        find_options.skip = options.skip;
        find_options.limit = options.limit;

        Ok(
            self.get_collection(collection)
                .find(filter)
                .with_options(find_options)
                .await
                .map_err(backend_error)?
                .map_err(backend_error)
                .boxed()
        )
    }

    async fn find_one_and_upsert(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        options: &InsertOptions,
    ) -> DocumentStoreResult<UpsertResult> {
        // Issued as a raw command so that replacements and operator updates share one path
        // and the lastErrorObject comes back with the document.
        let reply = self.client
            .database(&self.database)
            .run_command(doc! {
                "findAndModify": collection,
                "query": filter,
                "update": document,
                "upsert": options.upsert(),
                "new": options.return_new_document(),
            })
            .await
            .map_err(backend_error)?;

        let last_error = reply.get_document("lastErrorObject").ok();
        let upserted_id = last_error.and_then(|status| status.get("upserted")).cloned();

        Ok(UpsertResult {
            document: reply.get_document("value").ok().cloned(),
            affected: count(last_error.and_then(|status| status.get("n"))),
            updated_existing: last_error
                .and_then(|status| status.get_bool("updatedExisting").ok())
                .unwrap_or(false),
            upserted_id,
        })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateResult> {
        let target = self.get_collection(collection);

        let result = match (is_update_expression(&update), options.multi()) {
            (true, true) => target.update_many(filter, update).upsert(options.upsert()).await,
            (true, false) => target.update_one(filter, update).upsert(options.upsert()).await,
            (false, false) => target.replace_one(filter, update).upsert(options.upsert()).await,
            (false, true) => {
                return Err(DocumentStoreError::Backend(
                    "multi update is not supported for replacement-style update".to_string(),
                ));
            }
        }
        .map_err(backend_error)?;

        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<DeleteResult> {
        let target = self.get_collection(collection);

        let result = if options.single() {
            target.delete_one(filter).await
        } else {
            target.delete_many(filter).await
        }
        .map_err(backend_error)?;

        Ok(DeleteResult { deleted: result.deleted_count })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        let target = self.get_collection(collection);
        let mut action = target.aggregate(pipeline);

        if let Some(allow_disk_use) = options.allow_disk_use {
            action = action.allow_disk_use(allow_disk_use);
        }
        if let Some(batch_size) = options.batch_size {
            action = action.batch_size(batch_size);
        }

        Ok(
            action
                .await
                .map_err(backend_error)?
                .map_err(backend_error)
                .boxed()
        )
    }

    async fn close(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// Connects a [`MongoDbStore`] from a connection string.
pub struct MongoDbStoreBuilder {
    uri: String,
    connect_timeout: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            connect_timeout: None,
            server_selection_timeout: None,
            app_name: None,
        }
    }

    /// Takes the URI, timeouts and application name from a [`DatabaseConfig`].
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            connect_timeout: Some(Duration::from_millis(config.connect_timeout_ms)),
            server_selection_timeout: Some(Duration::from_millis(config.server_selection_timeout_ms)),
            app_name: config.app_name.clone(),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn connect(self, database: &str, listener: StoreEventListener) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if self.connect_timeout.is_some() {
            options.connect_timeout = self.connect_timeout;
        }
        if self.server_selection_timeout.is_some() {
            options.server_selection_timeout = self.server_selection_timeout;
        }
        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        options.sdam_event_handler = Some(sdam_handler(database.to_string(), listener.clone()));
        options.cmap_event_handler = Some(cmap_handler(database.to_string(), listener));

        let client = Client::with_options(options)
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        // The driver connects lazily; ping so an unreachable server fails setup.
        client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        tracing::info!(target: "labstore::store", database, "connected to MongoDB");

        Ok(MongoDbStore::new(client, database.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accept_every_numeric_width() {
        assert_eq!(count(Some(&Bson::Int32(1))), 1);
        assert_eq!(count(Some(&Bson::Int64(3))), 3);
        assert_eq!(count(Some(&Bson::Double(2.0))), 2);
        assert_eq!(count(Some(&Bson::Int32(-1))), 0);
        assert_eq!(count(None), 0);
    }

    #[test]
    fn builder_takes_settings_from_config() {
        let config = DatabaseConfig {
            app_name: Some("labs-web".into()),
            ..DatabaseConfig::default()
        };

        let builder = MongoDbStoreBuilder::from_config(&config);

        assert_eq!(builder.uri, config.uri);
        assert_eq!(builder.connect_timeout, Some(Duration::from_millis(10_000)));
        assert_eq!(builder.app_name.as_deref(), Some("labs-web"));
    }
}
