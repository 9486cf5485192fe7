pub mod core;
pub mod app;
pub mod api;
#[cfg(target_arch = "wasm32")]
pub mod wasm;
pub mod envconfig;
pub mod format;
pub mod template;

pub use crate::core::{
    Applied, DispatchGuard, GenerationMetrics, GenerationStatus,
    ProgressItem, ProgressTracker, ProgressUpdate,
    Result, SessionError, Transcript,
};

pub use api::{GenerationId, ImageBlob, Message, ParaphraseStyle, Role, WorkerCommand, WorkerEvent};

pub use app::{
    EventBus, EventHandler, LoggingHandler, SessionEvent,
    Outbox, RunState, Session, SessionSnapshot, WorkerPort,
};

#[cfg(not(target_arch = "wasm32"))]
pub use app::{spawn_worker, ChannelWorker, ScriptedBackend, WorkerBackend};

pub use envconfig::Config;
