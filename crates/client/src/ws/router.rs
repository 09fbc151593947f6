//! Dispatch of inbound envelopes to the notification store.

use academia_shared::{EnvelopeError, ServerEvent};
use chrono::Utc;
use futures_channel::mpsc::UnboundedReceiver;
use futures_util::StreamExt;

use super::InboundMessage;
use crate::stores::NotificationsHandle;

/// What a single dispatch did, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Added,
    Duplicate,
    CountUpdated,
    Ignored,
}

/// Turns envelopes into store mutations.
#[derive(Clone)]
pub struct MessageRouter {
    store: NotificationsHandle,
}

impl MessageRouter {
    pub fn new(store: NotificationsHandle) -> Self {
        Self { store }
    }

    /// Apply one envelope body. Never fails: anything unusable is dropped.
    pub fn dispatch(&self, body: &str) -> RouteOutcome {
        let event = match ServerEvent::parse(body) {
            Ok(event) => event,
            Err(EnvelopeError::UnknownType(kind)) => {
                crate::log_debug!("Ignoring envelope of unknown type {}", kind);
                return RouteOutcome::Ignored;
            }
            Err(e) => {
                crate::log_debug!("Dropping envelope: {}", e);
                return RouteOutcome::Ignored;
            }
        };

        let kind = event.type_name();
        match event {
            ServerEvent::Notification(payload) => {
                let record = payload.into_record(Utc::now());
                let id = record.id.clone();
                if self.store.add(record) {
                    crate::log_info!("New notification {}", id);
                    RouteOutcome::Added
                } else {
                    crate::log_debug!("Notification {} already present", id);
                    RouteOutcome::Duplicate
                }
            }
            ServerEvent::NotificationCount(count) => {
                self.store.set_unread_count(count.value());
                RouteOutcome::CountUpdated
            }
            ServerEvent::ConnectionStatus(data) | ServerEvent::Error(data) => {
                crate::log_debug!("{} envelope: {}", kind, data);
                RouteOutcome::Ignored
            }
        }
    }

    /// Drain `inbound` until every sender is gone.
    pub async fn run(self, mut inbound: UnboundedReceiver<InboundMessage>) {
        while let Some(message) = inbound.next().await {
            let outcome = self.dispatch(&message.body);
            crate::log_debug!("{} -> {:?}", message.destination, outcome);
        }
        crate::log_debug!("Inbound channel closed, router stopping");
    }
}
