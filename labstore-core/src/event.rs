//! Asynchronous lifecycle notifications from the store connection.
//!
//! Backends report these through a [`StoreEventListener`] installed at connect time.
//! They are informational only: nothing in this crate changes state because of them.

use std::{fmt, sync::Arc};

/// A lifecycle notification from the store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The connection to the database was closed.
    Closed { database: String },
    /// An operation or connection checkout timed out.
    TimedOut { database: String, member: Option<String> },
    /// A server joined the deployment topology.
    MemberJoined { member: String, kind: Option<String> },
    /// A server left the deployment topology.
    MemberLeft { member: String, kind: Option<String> },
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEvent::Closed { database } => write!(f, "database \"{database}\" connection was closed"),
            StoreEvent::TimedOut { database, member: Some(member) } => {
                write!(f, "database \"{database}\" connection to {member} timed out")
            }
            StoreEvent::TimedOut { database, member: None } => {
                write!(f, "database \"{database}\" connection timed out")
            }
            StoreEvent::MemberJoined { member, kind } => {
                write!(f, "server \"{member}\" ({}) joined", kind.as_deref().unwrap_or("unknown"))
            }
            StoreEvent::MemberLeft { member, kind } => {
                write!(f, "server \"{member}\" ({}) left", kind.as_deref().unwrap_or("unknown"))
            }
        }
    }
}

/// Callback receiving lifecycle notifications. Must not block.
pub type StoreEventListener = Arc<dyn Fn(StoreEvent) + Send + Sync>;

/// A listener that records events as `tracing` log lines.
pub fn logging_listener() -> StoreEventListener {
    Arc::new(|event: StoreEvent| match &event {
        StoreEvent::Closed { .. } | StoreEvent::MemberLeft { .. } => {
            tracing::warn!(target: "labstore::store", event = ?event, "{event}")
        }
        StoreEvent::TimedOut { .. } => tracing::error!(target: "labstore::store", event = ?event, "{event}"),
        StoreEvent::MemberJoined { .. } => tracing::info!(target: "labstore::store", event = ?event, "{event}"),
    })
}

/// A listener that drops every event.
pub fn silent_listener() -> StoreEventListener {
    Arc::new(|_| {})
}
