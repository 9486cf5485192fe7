use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::types::{GenerationId, WorkerCommand};
use crate::app::session::RunState;
use crate::core::GenerationStatus;

pub type EventCallback = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// What observers of a [`Session`](crate::app::session::Session) get told
/// after each state change.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: RunState, to: RunState },
    LoadingMessage { message: String },
    ProgressChanged { files: usize, overall: Option<f64> },
    TranscriptChanged { len: usize },
    TextDelta { delta: String },
    StatusChanged { status: GenerationStatus },
    ParaphraseDelta { delta: String },
    GenerationFinished { generation: Option<GenerationId> },
    CommandSent { command: &'static str },
    Error { message: String },
}

impl SessionEvent {
    pub fn command(command: &WorkerCommand) -> Self {
        SessionEvent::CommandSent {
            command: command.name(),
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SessionEvent);
    fn name(&self) -> &str;
}

pub type HandlerId = usize;

#[allow(clippy::type_complexity)]
pub struct EventBus {
    handlers: RwLock<HashMap<HandlerId, (String, Arc<dyn EventHandler>)>>,
    callbacks: RwLock<HashMap<&'static str, Vec<EventCallback>>>,
    next_id: RwLock<HandlerId>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
        }
    }

    pub fn subscribe<H: EventHandler + 'static>(&self, handler: H) -> HandlerId {
        let mut id = self.next_id.write();
        *id += 1;
        let handler_id = *id;
        drop(id);

        let name = handler.name().to_string();
        self.handlers.write().insert(handler_id, (name, Arc::new(handler)));

        handler_id
    }

    /// Registers a callback for one event kind, see [`event_type_name`].
    pub fn subscribe_to(&self, event_type: &'static str, callback: EventCallback) {
        self.callbacks.write().entry(event_type).or_default().push(callback);
    }

    pub fn unsubscribe(&self, handler_id: HandlerId) -> bool {
        self.handlers.write().remove(&handler_id).is_some()
    }

    pub fn publish(&self, event: SessionEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> =
            self.handlers.read().values().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler.handle(&event);
        }

        let event_type = event_type_name(&event);
        if let Some(callbacks) = self.callbacks.read().get(event_type) {
            for callback in callbacks {
                callback(&event);
            }
        }
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
        self.callbacks.write().clear();
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.read().values().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn event_type_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::StateChanged { .. } => "state_changed",
        SessionEvent::LoadingMessage { .. } => "loading_message",
        SessionEvent::ProgressChanged { .. } => "progress_changed",
        SessionEvent::TranscriptChanged { .. } => "transcript_changed",
        SessionEvent::TextDelta { .. } => "text_delta",
        SessionEvent::StatusChanged { .. } => "status_changed",
        SessionEvent::ParaphraseDelta { .. } => "paraphrase_delta",
        SessionEvent::GenerationFinished { .. } => "generation_finished",
        SessionEvent::CommandSent { .. } => "command_sent",
        SessionEvent::Error { .. } => "error",
    }
}

pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Error { message } => tracing::error!(%message, "worker error"),
            SessionEvent::StateChanged { from, to } => tracing::info!(?from, ?to, "run state changed"),
            other => tracing::debug!(event = ?other, "session event"),
        }
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    impl EventHandler for Counter {
        fn handle(&self, _event: &SessionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(Counter(hits.clone()));
        bus.publish(SessionEvent::TranscriptChanged { len: 1 });
        assert!(bus.unsubscribe(id));
        bus.publish(SessionEvent::TranscriptChanged { len: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_typed_callbacks() {
        let bus = EventBus::new();
        let deltas = Arc::new(RwLock::new(String::new()));
        let sink = deltas.clone();
        bus.subscribe_to(
            "text_delta",
            Box::new(move |event: &SessionEvent| {
                if let SessionEvent::TextDelta { delta } = event {
                    sink.write().push_str(delta);
                }
            }),
        );
        bus.publish(SessionEvent::TextDelta { delta: "Hi".to_string() });
        bus.publish(SessionEvent::TranscriptChanged { len: 2 });
        bus.publish(SessionEvent::TextDelta { delta: " there".to_string() });
        assert_eq!(deltas.read().as_str(), "Hi there");
    }
}
