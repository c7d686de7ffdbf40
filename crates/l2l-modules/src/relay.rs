//! Event relay: forwards local module events to subscribed peers.

use crate::address::{is_remote_address, local_to_remote};
use crate::services::actions;
use crate::system::ModuleSystem;
use futures::future::join_all;
use l2l_session::Session;
use l2l_types::event::ModuleEvent;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of delivering one event to one subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub peer: String,
    /// The subscriber's answer data, or the failure text.
    pub result: Result<Value, String>,
}

/// Relays the events of one module system.
pub struct EventRelay {
    system: Arc<ModuleSystem>,
    session: Arc<dyn Session>,
    inspect_depth: usize,
    sequence: AtomicU64,
}

impl EventRelay {
    pub fn new(system: Arc<ModuleSystem>, session: Arc<dyn Session>, inspect_depth: usize) -> Self {
        Self {
            system,
            session,
            inspect_depth,
            sequence: AtomicU64::new(0),
        }
    }

    /// Whether `event` originated here. Relayed copies and events about
    /// remote modules came from elsewhere and are not sent back out.
    pub fn should_relay(event: &ModuleEvent) -> bool {
        !event.is_remote_event && !event.subject().is_some_and(is_remote_address)
    }

    /// The copy of `event` sent to subscribers.
    pub fn sendable(&self, event: &ModuleEvent) -> ModuleEvent {
        let session_id = self.session.session_id();
        let base_url = self.system.base_url();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        event.to_remote(session_id, sequence, self.inspect_depth, |address| {
            local_to_remote(base_url, session_id, address)
        })
    }

    /// Deliver `event` to every current subscriber concurrently.
    ///
    /// Completes once every delivery has answered or failed.
    pub async fn dispatch(&self, event: &ModuleEvent) -> Vec<Delivery> {
        let peers = self.system.subscribers().session_ids();
        if peers.is_empty() {
            return Vec::new();
        }
        let sendable = self.sendable(event);
        let data = match serde_json::to_value(&sendable) {
            Ok(data) => data,
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "Cannot serialize module event");
                return Vec::new();
            }
        };
        debug!(
            kind = %sendable.kind,
            sequence = ?sendable.sequence,
            subscribers = peers.len(),
            "Relaying module event"
        );

        let deliveries = peers.into_iter().map(|peer| {
            let data = data.clone();
            async move {
                let result = match self
                    .session
                    .send_to(&peer, actions::ON_MODULE_EVENT, data)
                    .await
                {
                    Ok(answer) => match answer.error_text() {
                        Some(err) => Err(err),
                        None => Ok(answer.data),
                    },
                    Err(e) => Err(e.to_string()),
                };
                if let Err(err) = &result {
                    warn!(peer = %peer, error = %err, "Module event delivery failed");
                }
                Delivery { peer, result }
            }
        });
        join_all(deliveries).await
    }

    /// Listen to the system's events and relay the local ones until the
    /// system's notification stream closes.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.system.subscribe_events();
        tokio::spawn(async move {
            info!(system = %self.system.name(), "Module event relay started");
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !Self::should_relay(&event) {
                            continue;
                        }
                        // One task per event so a slow subscriber cannot
                        // hold back later events.
                        let relay = Arc::clone(&self);
                        tokio::spawn(async move {
                            relay.dispatch(&event).await;
                        });
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Module event relay lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!(system = %self.system.name(), "Module event relay stopped");
        })
    }
}
