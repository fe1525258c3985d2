//! In-process domain event bus.
//!
//! Publishing never blocks: events go onto a broadcast channel and every
//! subscribed handler drains its own receiver on a dedicated task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::MonitorStatus;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MonitorCreated {
        monitor_id: String,
    },
    MonitorUpdated {
        monitor_id: String,
    },
    MonitorDeleted {
        monitor_id: String,
    },
    MonitorStatusChanged {
        monitor_id: String,
        status: MonitorStatus,
        previous: MonitorStatus,
    },
}

impl Event {
    pub fn monitor_id(&self) -> &str {
        match self {
            Event::MonitorCreated { monitor_id }
            | Event::MonitorUpdated { monitor_id }
            | Event::MonitorDeleted { monitor_id }
            | Event::MonitorStatusChanged { monitor_id, .. } => monitor_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::MonitorCreated { .. } => "monitor_created",
            Event::MonitorUpdated { .. } => "monitor_updated",
            Event::MonitorDeleted { .. } => "monitor_deleted",
            Event::MonitorStatusChanged { .. } => "monitor_status_changed",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers will see the event
    pub fn publish(&self, event: Event) -> usize {
        debug!("Publishing {} for monitor {}", event.kind(), event.monitor_id());
        // no subscribers is not an error
        self.tx.send(event).unwrap_or(0)
    }

    /// Raw receiver for callers that want to drive their own loop
    pub fn receiver(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Spawn a dispatcher feeding every event to `handler` until `shutdown`
    pub fn subscribe(
        &self,
        handler: Arc<dyn EventHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => received,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = handler.handle(&event).await {
                            warn!(
                                "Handler {} failed on {} for {}: {:#}",
                                handler.name(),
                                event.kind(),
                                event.monitor_id(),
                                e
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Handler {} lagged, skipped {} events", handler.name(), skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Event dispatcher for {} stopped", handler.name());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().await.push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn subscribed_handler_receives_events_in_order() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let handle = bus.subscribe(recorder.clone(), shutdown.clone());

        assert_eq!(bus.publish(Event::MonitorCreated { monitor_id: "a".into() }), 1);
        bus.publish(Event::MonitorDeleted { monitor_id: "a".into() });

        for _ in 0..50 {
            if recorder.seen.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let seen = recorder.seen.lock().await.clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind(), "monitor_created");
        assert_eq!(seen[1].kind(), "monitor_deleted");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(Event::MonitorUpdated { monitor_id: "a".into() }), 0);
    }

    #[test]
    fn status_event_serializes_with_tag() {
        let event = Event::MonitorStatusChanged {
            monitor_id: "a".into(),
            status: MonitorStatus::Down,
            previous: MonitorStatus::Up,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "monitor_status_changed");
        assert_eq!(event.monitor_id(), "a");
    }
}
