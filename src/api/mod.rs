pub mod types;

pub use types::{GenerationId, ImageBlob, Message, ParaphraseStyle, Role, WorkerCommand, WorkerEvent};
