use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::services::redis_manager::RedisManager;
use crate::types::event_types::ExchangeEvent;

/// In-process fan-out of committed state transitions.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExchangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Never blocks. Events published with no subscriber are dropped.
    pub fn publish(&self, event: ExchangeEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.sender.subscribe()
    }
}

pub async fn publish_exchange_event(stream: &str, event: &ExchangeEvent) -> Result<(), String> {
    let redis_manager = match RedisManager::global() {
        Some(rm) => rm,
        None => {
            warn!("Redis manager not initialized, cannot publish exchange event");
            return Err("Redis manager not initialized".into());
        }
    };

    let event_json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize exchange event: {}", e);
            return Err(format!("Failed to serialize event: {}", e));
        }
    };

    match redis_manager.stream_add(stream, &[("data", &event_json)]).await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Failed to publish exchange event to stream: {}", e);
            Err(format!("Failed to publish event: {}", e))
        }
    }
}

/// Copies every bus event onto a Redis stream until the bus closes.
pub fn spawn_event_forwarder(bus: &EventBus, stream: String) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        info!("Forwarding exchange events to stream: {}", stream);
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let _ = publish_exchange_event(&stream, &event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event forwarder lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed, forwarder stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event_types::IntegrityViolationEvent;
    use chrono::Utc;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(ExchangeEvent::IntegrityViolation(IntegrityViolationEvent {
            content_id: 4,
            detail: "holdings exceed supply".into(),
            timestamp: Utc::now(),
        }));

        match rx.recv().await.unwrap() {
            ExchangeEvent::IntegrityViolation(e) => assert_eq!(e.content_id, 4),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ExchangeEvent::IntegrityViolation(IntegrityViolationEvent {
            content_id: 1,
            detail: "x".into(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "integrity_violation");
        assert_eq!(json["content_id"], 1);
    }
}
