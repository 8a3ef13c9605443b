//! Connection lifecycle and collection provisioning.
//!
//! A [`ConnectionManager`] is constructed once by the process entry point and passed by
//! reference to whatever needs persistence. Its lifecycle is an explicit state machine:
//!
//! ```text
//! Uninitialized --setup--> Connecting --provisioned--> Ready --close--> Closed
//!                               |
//!                               +--connection or provisioning error--> Failed
//! ```
//!
//! Provisioning is strictly sequential: each collection is created and its indexes are
//! applied, in [`IndexProvisioner`] order, before the next one starts. The first failure
//! aborts setup; there is no partially ready state.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{error, info, warn};

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::CollectionFacade,
    config::DatabaseConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    event::{StoreEventListener, logging_listener},
    index::IndexProvisioner,
};

/// Lifecycle state of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Closed,
    Failed,
}

/// Owns the store connection and publishes one [`CollectionFacade`] per provisioned collection.
pub struct ConnectionManager {
    provisioner: IndexProvisioner,
    listener: StoreEventListener,
    trace_results: bool,
    state: ConnectionState,
    backend: Option<Arc<dyn StoreBackend>>,
    collections: HashMap<String, CollectionFacade>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("backend", &self.backend)
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates an uninitialized manager for the collections in `provisioner`.
    ///
    /// Lifecycle notifications are logged by default.
    pub fn new(provisioner: IndexProvisioner) -> Self {
        Self {
            provisioner,
            listener: logging_listener(),
            trace_results: false,
            state: ConnectionState::Uninitialized,
            backend: None,
            collections: HashMap::new(),
        }
    }

    /// Applies the logging-related settings of `config`.
    pub fn with_config(mut self, config: &DatabaseConfig) -> Self {
        self.trace_results = config.trace;
        self
    }

    /// Replaces the listener that receives store lifecycle notifications.
    pub fn with_event_listener(mut self, listener: StoreEventListener) -> Self {
        self.listener = listener;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Connects to `database` and provisions every known collection.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::Configuration`] if `database` is empty or setup already ran.
    /// - Any connection or provisioning error, after which the manager is [`ConnectionState::Failed`].
    pub async fn setup<B>(&mut self, database: &str, builder: B) -> DocumentStoreResult<()>
    where
        B: StoreBackendBuilder + Send,
    {
        info!(target: "labstore::manager", "Initializing database module");

        if database.trim().is_empty() {
            return Err(DocumentStoreError::Configuration(format!(
                "Unknown database name ({database:?})"
            )));
        }
        if self.state != ConnectionState::Uninitialized {
            return Err(DocumentStoreError::Configuration(format!(
                "Cannot set up a connection that is {:?}",
                self.state
            )));
        }

        self.state = ConnectionState::Connecting;
        info!(target: "labstore::manager", database, "Connecting to database");

        let backend: Arc<dyn StoreBackend> = match builder.connect(database, self.listener.clone()).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                error!(target: "labstore::manager", database, error = %e, "Error connecting to database");
                self.state = ConnectionState::Failed;
                return Err(e);
            }
        };

        info!(target: "labstore::manager", database, "Connected; setting up database collections");

        match self.provision(&backend).await {
            Ok(collections) => {
                info!(
                    target: "labstore::manager",
                    count = collections.len(),
                    "All {} collections were initialized",
                    collections.len()
                );
                self.collections = collections;
                self.backend = Some(backend);
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                error!(target: "labstore::manager", error = %e, "Provisioning failed; setup aborted");
                if let Err(close_error) = backend.close().await {
                    warn!(target: "labstore::manager", error = %close_error, "Error closing connection after failed setup");
                }
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        backend: &Arc<dyn StoreBackend>,
    ) -> DocumentStoreResult<HashMap<String, CollectionFacade>> {
        let mut collections = HashMap::with_capacity(self.provisioner.collections().len());

        for definition in self.provisioner.collections() {
            let name = definition.name.as_str();
            info!(target: "labstore::manager", collection = name, "Requesting setup of collection");

            backend.create_collection(name).await.inspect_err(|e| {
                error!(target: "labstore::manager", collection = name, error = %e, "Collection error");
            })?;

            if definition.indexes.is_empty() {
                info!(target: "labstore::manager", collection = name, "Collection has no indexes defined");
            }
            for index in &definition.indexes {
                backend.create_index(name, index).await?;
                info!(target: "labstore::manager", collection = name, index = %index.name, "Index created");
            }

            collections.insert(
                definition.name.clone(),
                CollectionFacade::new(name, backend.clone())
                    .with_redacted_payloads(definition.redact_payloads)
                    .with_traced_results(self.trace_results),
            );
            info!(target: "labstore::manager", collection = name, "Collection is ok");
        }

        Ok(collections)
    }

    /// Returns the facade of a provisioned collection.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::CollectionNotFound`] if the manager is not ready or `name` was
    /// never provisioned.
    pub fn collection(&self, name: &str) -> DocumentStoreResult<CollectionFacade> {
        if self.state != ConnectionState::Ready {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(name.to_string()))
    }

    /// Names of the published collections.
    pub fn collection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Closes the connection. Facades handed out earlier fail from now on.
    pub async fn close(&mut self) -> DocumentStoreResult<()> {
        if self.state != ConnectionState::Ready {
            return Err(DocumentStoreError::Configuration(format!(
                "Cannot close a connection that is {:?}",
                self.state
            )));
        }

        self.collections.clear();
        self.state = ConnectionState::Closed;

        match self.backend.take() {
            Some(backend) => backend.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{DeleteResult, DocumentCursor, UpdateResult, UpsertResult},
        event::silent_listener,
        index::{CollectionDefinition, IndexSpec},
        options::{AggregateOptions, DeleteOptions, FindOptions, InsertOptions, UpdateOptions},
    };
    use async_trait::async_trait;
    use bson::Document;
    use std::sync::Mutex;

    /// Records provisioning calls; fails on the index named in `fail_index`.
    #[derive(Debug, Default)]
    struct RecordingBackend {
        calls: Arc<Mutex<Vec<String>>>,
        fail_index: Option<String>,
    }

    #[async_trait]
    impl StoreBackend for RecordingBackend {
        fn database_name(&self) -> &str {
            "labs_test"
        }

        async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
            self.calls.lock().unwrap().push(format!("collection:{name}"));
            Ok(())
        }

        async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
            Ok(vec![])
        }

        async fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
            if self.fail_index.as_deref() == Some(index.name.as_str()) {
                return Err(DocumentStoreError::IndexConflict(collection.into(), index.name.clone()));
            }
            self.calls.lock().unwrap().push(format!("index:{}", index.name));
            Ok(())
        }

        async fn find(&self, _: &str, _: Document, _: &FindOptions) -> DocumentStoreResult<DocumentCursor> {
            Err(DocumentStoreError::Backend("not used".into()))
        }

        async fn find_one_and_upsert(
            &self,
            _: &str,
            _: Document,
            _: Document,
            _: &InsertOptions,
        ) -> DocumentStoreResult<UpsertResult> {
            Err(DocumentStoreError::Backend("not used".into()))
        }

        async fn update(&self, _: &str, _: Document, _: Document, _: &UpdateOptions) -> DocumentStoreResult<UpdateResult> {
            Err(DocumentStoreError::Backend("not used".into()))
        }

        async fn delete(&self, _: &str, _: Document, _: &DeleteOptions) -> DocumentStoreResult<DeleteResult> {
            Err(DocumentStoreError::Backend("not used".into()))
        }

        async fn aggregate(&self, _: &str, _: Vec<Document>, _: &AggregateOptions) -> DocumentStoreResult<DocumentCursor> {
            Err(DocumentStoreError::Backend("not used".into()))
        }
    }

    struct RecordingBuilder {
        backend: RecordingBackend,
        refuse: bool,
    }

    #[async_trait]
    impl StoreBackendBuilder for RecordingBuilder {
        type Backend = RecordingBackend;

        async fn connect(self, _: &str, _: StoreEventListener) -> DocumentStoreResult<RecordingBackend> {
            if self.refuse {
                return Err(DocumentStoreError::Initialization("connection refused".into()));
            }
            Ok(self.backend)
        }
    }

    fn builder(fail_index: Option<&str>) -> (RecordingBuilder, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = RecordingBackend { calls: calls.clone(), fail_index: fail_index.map(String::from) };

        (RecordingBuilder { backend, refuse: false }, calls)
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(IndexProvisioner::labs()).with_event_listener(silent_listener())
    }

    #[tokio::test]
    async fn provisions_sequentially_in_table_order() {
        let (builder, calls) = builder(None);
        let mut manager = manager();

        manager.setup("labs_test", builder).await.unwrap();

        assert!(manager.is_ready());
        assert_eq!(
            *calls.lock().unwrap(),
            [
                "collection:audits",
                "index:idx_audits_id_name_code_data.collection",
                "collection:tokens",
                "index:idx_tokens_id_jti_ttyp_aud_sub",
                "collection:users",
                "index:idx_users_email",
            ]
        );
        assert_eq!(manager.collection_names(), ["audits", "tokens", "users"]);
        assert_eq!(manager.collection("users").unwrap().name(), "users");
    }

    #[tokio::test]
    async fn provisioning_failure_leaves_no_ready_state() {
        let (builder, calls) = builder(Some("idx_tokens_id_jti_ttyp_aud_sub"));
        let mut manager = manager();

        let err = manager.setup("labs_test", builder).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::IndexConflict(_, _)));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(!calls.lock().unwrap().contains(&"collection:users".to_string()));
        assert!(manager.collection("audits").unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn connection_error_fails_setup() {
        let (mut builder, _) = builder(None);
        builder.refuse = true;
        let mut manager = manager();

        let err = manager.setup("labs_test", builder).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::Initialization(_)));
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn empty_database_name_is_a_configuration_error() {
        let (builder, _) = builder(None);
        let mut manager = manager();

        let err = manager.setup("  ", builder).await.unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(manager.state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn collection_access_requires_ready_and_a_known_name() {
        let mut manager = manager();
        assert!(matches!(
            manager.collection("users"),
            Err(DocumentStoreError::CollectionNotFound(_))
        ));

        let (builder, _) = builder(None);
        manager.setup("labs_test", builder).await.unwrap();

        assert!(matches!(
            manager.collection("reports"),
            Err(DocumentStoreError::CollectionNotFound(name)) if name == "reports"
        ));
    }

    #[tokio::test]
    async fn setup_runs_once_and_close_ends_the_lifecycle() {
        let mut manager = manager();
        let (first, _) = builder(None);
        let (second, _) = builder(None);

        manager.setup("labs_test", first).await.unwrap();
        assert!(manager.setup("labs_test", second).await.unwrap_err().is_configuration());

        manager.close().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.collection("users").is_err());
        assert!(manager.close().await.is_err());
    }

    #[tokio::test]
    async fn collections_without_indexes_are_still_published() {
        let provisioner = IndexProvisioner::new().with_collection(CollectionDefinition::new("reports"));
        let mut manager = ConnectionManager::new(provisioner).with_event_listener(silent_listener());
        let (builder, calls) = builder(None);

        manager.setup("labs_test", builder).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), ["collection:reports"]);
        assert!(manager.collection("reports").is_ok());
    }
}
