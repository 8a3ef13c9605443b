//! Translation of driver monitoring events into [`StoreEvent`]s.

use mongodb::{
    ServerType,
    event::{
        EventHandler,
        cmap::{CmapEvent, ConnectionCheckoutFailedReason},
        sdam::SdamEvent,
    },
};

use labstore_core::event::{StoreEvent, StoreEventListener};


/// Maps a topology event, or `None` if it is not one the listener cares about.
pub(crate) fn from_sdam(database: &str, event: &SdamEvent) -> Option<StoreEvent> {
    match event {
        SdamEvent::ServerDescriptionChanged(changed) => membership_change(
            changed.address.to_string(),
            changed.previous_description.server_type(),
            changed.new_description.server_type(),
        ),
        SdamEvent::ServerClosed(closed) => Some(StoreEvent::MemberLeft {
            member: closed.address.to_string(),
            kind: None,
        }),
        SdamEvent::TopologyClosed(_) => Some(StoreEvent::Closed {
            database: database.to_string(),
        }),
        _ => None,
    }
}

/// Maps a connection pool event. Only checkout timeouts are reported.
pub(crate) fn from_cmap(database: &str, event: &CmapEvent) -> Option<StoreEvent> {
    match event {
        CmapEvent::ConnectionCheckoutFailed(failed) => {
            checkout_failure(database, failed.address.to_string(), failed.reason.clone())
        }
        _ => None,
    }
}

/// A server joins when it becomes reachable and leaves when it turns unknown again.
fn membership_change(member: String, previous: ServerType, new: ServerType) -> Option<StoreEvent> {
    match (previous, new) {
        (ServerType::Unknown, ServerType::Unknown) => None,
        (ServerType::Unknown, kind) => Some(StoreEvent::MemberJoined {
            member,
            kind: Some(format!("{kind:?}")),
        }),
        (kind, ServerType::Unknown) => Some(StoreEvent::MemberLeft {
            member,
            kind: Some(format!("{kind:?}")),
        }),
        _ => None,
    }
}

fn checkout_failure(database: &str, member: String, reason: ConnectionCheckoutFailedReason) -> Option<StoreEvent> {
    match reason {
        ConnectionCheckoutFailedReason::Timeout => Some(StoreEvent::TimedOut {
            database: database.to_string(),
            member: Some(member),
        }),
        _ => None,
    }
}

pub(crate) fn sdam_handler(database: String, listener: StoreEventListener) -> EventHandler<SdamEvent> {
    EventHandler::callback(move |event: SdamEvent| {
        if let Some(event) = from_sdam(&database, &event) {
            listener(event);
        }
    })
}

pub(crate) fn cmap_handler(database: String, listener: StoreEventListener) -> EventHandler<CmapEvent> {
    EventHandler::callback(move |event: CmapEvent| {
        if let Some(event) = from_cmap(&database, &event) {
            listener(event);
        }
    })
}
