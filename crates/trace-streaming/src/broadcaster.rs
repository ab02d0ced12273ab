//! The broadcaster task (spec §4.7 "Fan-out", §9 "event-emitter control
//! flow"): reads one channel of persisted batches and writes many
//! subscriber queues. Serializes each event once per batch, never once per
//! client.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use trace_core::Event;

use crate::client::ClientState;
use crate::messages::ServerMessage;

pub type ClientTable = Arc<DashMap<Uuid, Arc<ClientState>>>;

/// Consumes tee'd batches from the collector until the channel closes
/// (normal shutdown per spec §5 "Cancellation").
pub async fn run(mut batches: mpsc::Receiver<Vec<Event>>, clients: ClientTable) {
    while let Some(batch) = batches.recv().await {
        dispatch_batch(&batch, &clients);
    }
    debug!("broadcaster channel closed, exiting");
}

fn dispatch_batch(batch: &[Event], clients: &ClientTable) {
    for event in batch {
        // Serialized once per event, shared across every interested client.
        let body: Arc<str> = Arc::from(ServerMessage::TraceEvent { data: event.clone() }.to_json());
        for entry in clients.iter() {
            let client = entry.value();
            if client.is_interested(event) {
                client.enqueue_raw(Arc::clone(&body), event.severity());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingConfig;
    use trace_core::{EventMetadata, EventType, Phase};

    fn event(session_id: Uuid) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: 0,
            session_id,
            agent_id: Some("a1".to_string()),
            parent_id: None,
            correlation_id: None,
            event_type: EventType::TaskStart,
            phase: Phase::Start,
            payload: serde_json::Map::new(),
            metadata: EventMetadata::default(),
            performance: None,
        }
    }

    #[test]
    fn dispatch_only_reaches_subscribed_clients() {
        let session = Uuid::new_v4();
        let other_session = Uuid::new_v4();
        let config = StreamingConfig::default();
        let clients: ClientTable = Arc::new(DashMap::new());

        let subscribed = Arc::new(ClientState::new(Uuid::new_v4(), &config, 0));
        subscribed.set_authenticated(true);
        subscribed.with_subscription(|s| {
            s.session_ids.insert(session);
        });
        clients.insert(subscribed.id, Arc::clone(&subscribed));

        let unsubscribed = Arc::new(ClientState::new(Uuid::new_v4(), &config, 0));
        unsubscribed.set_authenticated(true);
        unsubscribed.with_subscription(|s| {
            s.session_ids.insert(other_session);
        });
        clients.insert(unsubscribed.id, Arc::clone(&unsubscribed));

        dispatch_batch(&[event(session)], &clients);

        assert!(subscribed.dequeue().is_some());
        assert!(unsubscribed.dequeue().is_none());
    }
}
