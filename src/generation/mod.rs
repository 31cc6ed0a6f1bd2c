//! Image generation sessions and the worker that runs them.

mod comfy;
mod service;
mod sessions;
mod settings;
mod worker;
pub mod workflow;

pub use comfy::ComfyClient;
pub use service::{EventSubscription, ExecutionEvent, GenerationService, OutputDescriptor};
pub use sessions::{ClaimedJob, GenerationSession, GenerationSessions, GenerationStatus};
pub use settings::{GenerationSettings, SettingsUpdate, NO_LORA};
pub use worker::GenerationWorker;
