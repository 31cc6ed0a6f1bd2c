//! iStream: device-format video transcodes driven by user sessions.
//!
//! - [`SessionRegistry`] owns the sessions and their queues
//! - [`TranscodeScheduler`] is the single worker consuming the active session

mod registry;
mod scheduler;
mod session;

pub use registry::{ResetOutcome, SessionRegistry};
pub use scheduler::TranscodeScheduler;
pub use session::{ItemState, SessionKind, SessionSnapshot, TranscodeTask};
