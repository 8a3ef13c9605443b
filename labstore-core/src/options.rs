//! Per-operation options.
//!
//! Every facade operation takes an options value whose fields are all optional. The facade
//! merges the caller's options over the operation's documented defaults with
//! [`merge`](InsertOptions::merge): any field the caller sets wins.

use bson::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::to_native_document;

/// Options for `find` and `find_cursor`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    /// Fields to include or exclude, e.g. `{ "password": 0 }`.
    pub projection: Option<Map<String, Value>>,
    /// Sort specification, e.g. `{ "createdAt": -1 }`.
    pub sort: Option<Map<String, Value>>,
    pub skip: Option<u64>,
    /// Cap on the number of materialized results.
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn merge(self, overrides: FindOptions) -> Self {
        Self {
            projection: overrides.projection.or(self.projection),
            sort: overrides.sort.or(self.sort),
            skip: overrides.skip.or(self.skip),
            limit: overrides.limit.or(self.limit),
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_sort(mut self, sort: Map<String, Value>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_projection(mut self, projection: Map<String, Value>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// The projection in native form, as backends consume it.
    pub fn native_projection(&self) -> Option<Document> {
        self.projection.as_ref().map(to_native_document)
    }

    /// The sort specification in native form.
    pub fn native_sort(&self) -> Option<Document> {
        self.sort.as_ref().map(to_native_document)
    }
}

/// Options for `insert`. Defaults: `upsert: true, return_new_document: true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOptions {
    pub upsert: Option<bool>,
    /// Return the document as it is after the write rather than before.
    pub return_new_document: Option<bool>,
}

impl InsertOptions {
    pub fn defaults() -> Self {
        Self {
            upsert: Some(true),
            return_new_document: Some(true),
        }
    }

    pub fn merge(self, overrides: InsertOptions) -> Self {
        Self {
            upsert: overrides.upsert.or(self.upsert),
            return_new_document: overrides.return_new_document.or(self.return_new_document),
        }
    }

    pub fn upsert(&self) -> bool {
        self.upsert.unwrap_or(true)
    }

    pub fn return_new_document(&self) -> bool {
        self.return_new_document.unwrap_or(true)
    }
}

/// Options for `update`. Defaults: `upsert: true, multi: false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub upsert: Option<bool>,
    /// Apply the update to every match instead of the first one.
    pub multi: Option<bool>,
}

impl UpdateOptions {
    pub fn defaults() -> Self {
        Self {
            upsert: Some(true),
            multi: Some(false),
        }
    }

    pub fn merge(self, overrides: UpdateOptions) -> Self {
        Self {
            upsert: overrides.upsert.or(self.upsert),
            multi: overrides.multi.or(self.multi),
        }
    }

    pub fn upsert(&self) -> bool {
        self.upsert.unwrap_or(true)
    }

    pub fn multi(&self) -> bool {
        self.multi.unwrap_or(false)
    }
}

/// Options for `delete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// Remove only the first match (`justOne`).
    #[serde(alias = "justOne")]
    pub single: Option<bool>,
}

impl DeleteOptions {
    pub fn merge(self, overrides: DeleteOptions) -> Self {
        Self {
            single: overrides.single.or(self.single),
        }
    }

    pub fn single(&self) -> bool {
        self.single.unwrap_or(false)
    }
}

/// Options for `aggregate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
}

impl AggregateOptions {
    pub fn merge(self, overrides: AggregateOptions) -> Self {
        Self {
            allow_disk_use: overrides.allow_disk_use.or(self.allow_disk_use),
            batch_size: overrides.batch_size.or(self.batch_size),
        }
    }
}
