//! Static per-collection index definitions.
//!
//! The [`IndexProvisioner`] is plain data: an ordered table of collections, each with the
//! indexes it needs. The connection manager walks the table once at startup. Per-collection
//! behaviour differences (indexes, payload redaction in logs) live here rather than in
//! specialised collection types.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// Sort direction of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl IndexDirection {
    fn as_bson(self) -> Bson {
        match self {
            IndexDirection::Ascending => Bson::Int32(1),
            IndexDirection::Descending => Bson::Int32(-1),
        }
    }
}

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed fields, in key order. Dotted paths address nested fields.
    pub fields: Vec<(String, IndexDirection)>,
    /// Index name; also the identity used for idempotent creation.
    pub name: String,
    pub unique: bool,
    /// Skip documents that have none of the indexed fields.
    pub sparse: bool,
    pub background: bool,
}

impl IndexSpec {
    /// Starts an index definition with the given name and no fields.
    pub fn builder(name: impl Into<String>) -> IndexSpecBuilder {
        IndexSpecBuilder::new(name)
    }

    /// Key document in store syntax, e.g. `{ user: 1 }`.
    pub fn keys(&self) -> Document {
        self.fields
            .iter()
            .map(|(field, direction)| (field.clone(), direction.as_bson()))
            .collect()
    }

    /// Two specs describe the same index when keys and options agree.
    pub fn same_definition(&self, other: &IndexSpec) -> bool {
        self.fields == other.fields && self.unique == other.unique && self.sparse == other.sparse
    }
}

/// Fluent builder for [`IndexSpec`].
pub struct IndexSpecBuilder {
    spec: IndexSpec,
}

impl IndexSpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: IndexSpec {
                fields: Vec::new(),
                name: name.into(),
                unique: false,
                sparse: false,
                background: false,
            },
        }
    }

    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.spec.fields.push((field.into(), IndexDirection::Ascending));
        self
    }

    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.spec.fields.push((field.into(), IndexDirection::Descending));
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.spec.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.spec.sparse = sparse;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.spec.background = background;
        self
    }

    pub fn build(self) -> IndexSpec {
        self.spec
    }
}

/// One provisioned collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDefinition {
    pub name: String,
    pub indexes: Vec<IndexSpec>,
    /// Log payload sizes instead of payload text for this collection.
    pub redact_payloads: bool,
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            redact_payloads: false,
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn redacted(mut self) -> Self {
        self.redact_payloads = true;
        self
    }
}

/// Ordered table of known collections and their indexes.
#[derive(Debug, Clone, Default)]
pub struct IndexProvisioner {
    collections: Vec<CollectionDefinition>,
}

impl IndexProvisioner {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The collections of the labs application: `audits`, `tokens` and `users`.
    pub fn labs() -> Self {
        Self::new()
            .with_collection(
                CollectionDefinition::new("audits")
                    .with_index(
                        IndexSpec::builder("idx_audits_id_name_code_data.collection")
                            .ascending("_id")
                            .ascending("name")
                            .ascending("code")
                            .ascending("data.collection")
                            .background(true)
                            .build(),
                    )
                    .redacted(),
            )
            .with_collection(
                CollectionDefinition::new("tokens").with_index(
                    IndexSpec::builder("idx_tokens_id_jti_ttyp_aud_sub")
                        .ascending("_id")
                        .ascending("jti")
                        .ascending("ttyp")
                        .ascending("aud")
                        .ascending("sub")
                        .unique(true)
                        .sparse(true)
                        .background(true)
                        .build(),
                ),
            )
            .with_collection(
                CollectionDefinition::new("users").with_index(
                    IndexSpec::builder("idx_users_email")
                        .ascending("user")
                        .unique(true)
                        .sparse(true)
                        .background(true)
                        .build(),
                ),
            )
    }

    /// Appends a collection; a later definition with the same name replaces the earlier one in place.
    pub fn with_collection(mut self, definition: CollectionDefinition) -> Self {
        match self.collections.iter_mut().find(|c| c.name == definition.name) {
            Some(existing) => *existing = definition,
            None => self.collections.push(definition),
        }
        self
    }

    /// Collections in provisioning order.
    pub fn collections(&self) -> &[CollectionDefinition] {
        &self.collections
    }

    pub fn definition(&self, name: &str) -> Option<&CollectionDefinition> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Indexes of a collection; empty for collections without secondary indexes or unknown names.
    pub fn indexes_for(&self, name: &str) -> &[IndexSpec] {
        self.definition(name)
            .map(|c| c.indexes.as_slice())
            .unwrap_or(&[])
    }
}
