pub mod dispatch;
pub mod error;
pub mod progress;
pub mod status;
pub mod transcript;

pub use dispatch::DispatchGuard;
pub use error::SessionError;
pub use progress::{ProgressItem, ProgressTracker, ProgressUpdate};
pub use status::{GenerationMetrics, GenerationStatus};
pub use transcript::{Applied, Transcript};

pub type Result<T> = std::result::Result<T, SessionError>;
