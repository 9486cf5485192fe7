pub mod events;
#[cfg(not(target_arch = "wasm32"))]
pub mod runner;
#[cfg(not(target_arch = "wasm32"))]
pub mod scripted;
pub mod session;

pub use events::{EventBus, EventHandler, LoggingHandler, SessionEvent};
#[cfg(not(target_arch = "wasm32"))]
pub use runner::{spawn_worker, ChannelWorker, EventSink, GenerationContext, WorkerBackend, WorkerEvents};
#[cfg(not(target_arch = "wasm32"))]
pub use scripted::{ScriptedBackend, ScriptedFile};
pub use session::{
    DataUrlFactory, Draft, ImageUrlFactory, Outbox, RunState, Session, SessionSnapshot, WorkerPort,
};
