//! The collection facade: the only persistence object application code touches.
//!
//! A [`CollectionFacade`] wraps one named collection of a shared backend and exposes
//! exactly five operations: `find` (plus its lazy `find_cursor` form), `insert`, `update`,
//! `delete` and `aggregate`. Inputs and outputs are wire values ([`serde_json::Value`]);
//! every document crossing the boundary goes through [`coerce`](crate::coerce), and every
//! outcome is summarized into a log record.
//!
//! # Example
//!
//! ```ignore
//! use labstore_core::options::{FindOptions, UpdateOptions};
//! use serde_json::json;
//!
//! let users = manager.collection("users")?;
//! let found = users.find(&json!({ "user": "ana" }), FindOptions::default()).await?;
//! users
//!     .update(
//!         &json!({ "user": "ana" }),
//!         &json!({ "$set": { "lastLoginAt": "2024-05-01T10:00:00.000Z" } }),
//!         UpdateOptions { upsert: Some(false), ..Default::default() },
//!     )
//!     .await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document};
use futures::TryStreamExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    backend::{DocumentCursor, StoreBackend, is_update_expression},
    coerce::{to_native, to_native_document, to_wire, to_wire_document},
    error::{DocumentStoreError, DocumentStoreResult},
    options::{AggregateOptions, DeleteOptions, FindOptions, InsertOptions, UpdateOptions},
    summary::{preview, summarize},
};

/// Name of the primary identifier field of every document.
pub const PRIMARY_KEY: &str = "_id";

/// Longest rendering of an input that goes into a log line.
const LOG_PREVIEW_CHARS: usize = 512;

/// Acknowledgement of an `update`, in wire form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteAcknowledgement {
    /// Documents the filter matched.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// Identifiers of documents created by an upsert.
    pub upserted: Vec<Value>,
}

impl WriteAcknowledgement {
    /// Renders the acknowledgement as `{ ok, n, nModified, upserted? }`.
    pub fn to_wire(&self) -> Value {
        let mut ack = json!({ "ok": 1, "n": self.matched, "nModified": self.modified });

        if !self.upserted.is_empty() {
            ack["upserted"] = Value::Array(
                self.upserted
                    .iter()
                    .map(|id| json!({ PRIMARY_KEY: id }))
                    .collect(),
            );
        }

        ack
    }
}

/// Result of an `insert`: the document after the write plus upsert metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    /// The stored document, or `None` if nothing was written.
    pub document: Option<Map<String, Value>>,
    /// `true` if a document with the same id existed and was updated.
    pub updated_existing: bool,
    /// Identifier of the newly created document, if the write inserted one.
    pub upserted: Option<Value>,
}

impl InsertOutcome {
    /// Renders the outcome in find-and-modify reply form.
    pub fn to_wire(&self) -> Value {
        let affected = u64::from(self.updated_existing || self.upserted.is_some());
        let mut last_error = json!({ "n": affected, "updatedExisting": self.updated_existing });

        if let Some(id) = &self.upserted {
            last_error["upserted"] = id.clone();
        }

        json!({
            "ok": 1,
            "n": u64::from(self.updated_existing),
            "nModified": u64::from(self.updated_existing),
            "value": self.document.clone().map(Value::Object).unwrap_or(Value::Null),
            "lastErrorObject": last_error,
        })
    }
}

/// Acknowledgement of a `delete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteAcknowledgement {
    pub deleted: u64,
}

impl DeleteAcknowledgement {
    pub fn to_wire(&self) -> Value {
        json!({ "ok": 1, "n": self.deleted })
    }
}

/// Uniform five-operation interface over one collection.
///
/// Facades are cheap to clone; all clones share the same backend connection.
#[derive(Debug, Clone)]
pub struct CollectionFacade {
    name: String,
    backend: Arc<dyn StoreBackend>,
    redact_payloads: bool,
    trace_results: bool,
}

impl CollectionFacade {
    /// Creates a facade over `name` on `backend`.
    pub fn new(name: impl Into<String>, backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
            redact_payloads: false,
            trace_results: false,
        }
    }

    /// Log payload sizes instead of payload text.
    pub fn with_redacted_payloads(mut self, redact: bool) -> Self {
        self.redact_payloads = redact;
        self
    }

    /// Log the first returned document of every read at debug level.
    pub fn with_traced_results(mut self, trace: bool) -> Self {
        self.trace_results = trace;
        self
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Materializes every document matching `query`, coerced back to wire form.
    ///
    /// `options.limit` caps the number of results. A `null` query matches everything.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDocument`] if `query` is not a mapping; store errors unchanged.
    pub async fn find(&self, query: &Value, options: FindOptions) -> DocumentStoreResult<Vec<Value>> {
        let documents: Vec<Document> = self
            .find_cursor(query, options)
            .await?
            .try_collect()
            .await?;

        let results: Vec<Value> = documents
            .iter()
            .map(|doc| Value::Object(to_wire_document(doc)))
            .collect();

        self.log_outcome("find", summarize((&results).into()));
        self.trace_first(&results);

        Ok(results)
    }

    /// Runs `query` and returns the lazy cursor instead of materializing it.
    ///
    /// Items are native documents; the caller drives pagination and coercion.
    pub async fn find_cursor(&self, query: &Value, options: FindOptions) -> DocumentStoreResult<DocumentCursor> {
        info!(
            target: "labstore::collection",
            collection = %self.name,
            query = %self.describe(query),
            "Searching"
        );

        let filter = self.filter(query)?;
        let options = FindOptions::default().merge(options);

        self.backend.find(&self.name, filter, &options).await
    }

    /// Inserts `document`, or updates the stored document with the same `_id`.
    ///
    /// The key is the document's `_id`, or a fresh UUID when it has none. A plain document
    /// replaces the stored one; an update-operator expression is applied to it.
    pub async fn insert(&self, document: &Value, options: InsertOptions) -> DocumentStoreResult<InsertOutcome> {
        info!(
            target: "labstore::collection",
            collection = %self.name,
            document = %self.describe(document),
            "Inserting"
        );

        let wire = document
            .as_object()
            .ok_or_else(|| DocumentStoreError::InvalidDocument("Expected a document to insert".into()))?;
        let id = match wire.get(PRIMARY_KEY) {
            Some(id) if !id.is_null() => to_native(id),
            _ => to_native(&Value::String(Uuid::new_v4().to_string())),
        };

        let mut payload = to_native_document(wire);
        if !is_update_expression(&payload) {
            payload.insert(PRIMARY_KEY, id.clone());
        }

        let options = InsertOptions::defaults().merge(options);
        let result = self
            .backend
            .find_one_and_upsert(&self.name, bson::doc! { PRIMARY_KEY: id }, payload, &options)
            .await?;

        let outcome = InsertOutcome {
            document: result.document.as_ref().map(to_wire_document),
            updated_existing: result.updated_existing,
            upserted: result.upserted_id.as_ref().map(to_wire),
        };

        self.log_outcome("insert", summarize((&outcome.to_wire()).into()));

        Ok(outcome)
    }

    /// Applies `update` to the documents matching `find`.
    ///
    /// `update` is an operator expression (`{ "$set": … }`) or a whole replacement document.
    pub async fn update(
        &self,
        find: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> DocumentStoreResult<WriteAcknowledgement> {
        info!(
            target: "labstore::collection",
            collection = %self.name,
            query = %self.describe(find),
            update = %self.describe(update),
            "Updating"
        );

        let filter = self.filter(find)?;
        let update = match to_native(update) {
            Bson::Document(doc) => doc,
            _ => return Err(DocumentStoreError::InvalidDocument("Expected an update document".into())),
        };

        let options = UpdateOptions::defaults().merge(options);
        let result = self
            .backend
            .update(&self.name, filter, update, &options)
            .await?;

        let ack = WriteAcknowledgement {
            matched: result.matched,
            modified: result.modified,
            upserted: result.upserted_id.iter().map(to_wire).collect(),
        };

        self.log_outcome("update", summarize((&ack.to_wire()).into()));

        Ok(ack)
    }

    /// Removes the documents matching `find`.
    pub async fn delete(&self, find: &Value, options: DeleteOptions) -> DocumentStoreResult<DeleteAcknowledgement> {
        info!(
            target: "labstore::collection",
            collection = %self.name,
            query = %self.describe(find),
            "Deleting"
        );

        let filter = self.filter(find)?;
        let options = DeleteOptions::default().merge(options);
        let result = self
            .backend
            .delete(&self.name, filter, &options)
            .await?;

        let ack = DeleteAcknowledgement { deleted: result.deleted };
        self.log_outcome("delete", summarize((&ack.to_wire()).into()));

        Ok(ack)
    }

    /// Runs an aggregation pipeline and materializes its output.
    ///
    /// `pipeline` is an array of stage documents; a single document is a one-stage pipeline.
    /// Its content is opaque to this layer.
    pub async fn aggregate(&self, pipeline: &Value, options: AggregateOptions) -> DocumentStoreResult<Vec<Value>> {
        info!(
            target: "labstore::collection",
            collection = %self.name,
            bytes = pipeline.to_string().len(),
            "Aggregating"
        );

        let stages = match to_native(pipeline) {
            Bson::Array(stages) => stages
                .into_iter()
                .map(|stage| match stage {
                    Bson::Document(doc) => Ok(doc),
                    _ => Err(DocumentStoreError::InvalidDocument("Pipeline stages must be documents".into())),
                })
                .collect::<DocumentStoreResult<Vec<_>>>()?,
            Bson::Document(stage) => vec![stage],
            _ => return Err(DocumentStoreError::InvalidDocument("Expected an aggregation pipeline".into())),
        };

        let options = AggregateOptions::default().merge(options);
        let documents: Vec<Document> = self
            .backend
            .aggregate(&self.name, stages, &options)
            .await?
            .try_collect()
            .await?;

        let results: Vec<Value> = documents
            .iter()
            .map(|doc| Value::Object(to_wire_document(doc)))
            .collect();

        self.log_outcome("aggregate", summarize((&results).into()));
        self.trace_first(&results);

        Ok(results)
    }

    fn filter(&self, query: &Value) -> DocumentStoreResult<Document> {
        match to_native(query) {
            Bson::Document(doc) => Ok(doc),
            Bson::Null => Ok(Document::new()),
            _ => Err(DocumentStoreError::InvalidDocument("Expected a query document".into())),
        }
    }

    fn describe(&self, value: &Value) -> String {
        if self.redact_payloads {
            redacted(value)
        } else {
            preview(value, LOG_PREVIEW_CHARS)
        }
    }

    fn log_outcome(&self, operation: &'static str, summary: String) {
        info!(
            target: "labstore::collection",
            collection = %self.name,
            operation,
            "Database (\"{}\") {summary}",
            self.name
        );
    }

    fn trace_first(&self, results: &[Value]) {
        if self.trace_results && !self.redact_payloads {
            if let Some(first) = results.first() {
                debug!(
                    target: "labstore::collection",
                    collection = %self.name,
                    first = %preview(first, LOG_PREVIEW_CHARS),
                    "First returned document"
                );
            }
        }
    }
}

/// Log form of a payload whose body must not be logged: only `name`, `code` and its size.
fn redacted(value: &Value) -> String {
    let bytes = value.to_string().len();

    match (value.get("name"), value.get("code")) {
        (None, None) => format!("<{bytes} bytes>"),
        (name, code) => format!(
            "name={} code={} <{bytes} bytes>",
            name.unwrap_or(&Value::Null),
            code.unwrap_or(&Value::Null)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_payloads_keep_name_and_code() {
        let audit = json!({ "name": "login", "code": 200, "data": { "password": "x" } });
        let size = audit.to_string().len();

        assert_eq!(redacted(&audit), format!("name=\"login\" code=200 <{size} bytes>"));
        assert_eq!(redacted(&json!([1, 2])), "<5 bytes>");
    }

    #[test]
    fn update_acknowledgement_wire_form() {
        let ack = WriteAcknowledgement { matched: 0, modified: 0, upserted: vec![json!("abc")] };

        assert_eq!(ack.to_wire(), json!({ "ok": 1, "n": 0, "nModified": 0, "upserted": [{ "_id": "abc" }] }));
        assert_eq!(summarize((&ack.to_wire()).into()), "inserted 1 item (abc)");
    }

    #[test]
    fn insert_outcome_summaries() {
        let inserted = InsertOutcome { document: None, updated_existing: false, upserted: Some(json!("k")) };
        let updated = InsertOutcome { document: None, updated_existing: true, upserted: None };

        assert_eq!(summarize((&inserted.to_wire()).into()), "inserted 1 item (k)");
        assert_eq!(summarize((&updated.to_wire()).into()), "found 1 item and updated 1 item");
    }
}
