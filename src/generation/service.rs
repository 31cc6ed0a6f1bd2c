//! Boundary to the external image generation service.

use super::settings::GenerationSettings;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One output image as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage area on the service side (`output`, `temp`).
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// Execution notification for a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Sampler step progress.
    Progress { value: u64, max: u64 },
    /// A graph node started executing.
    Executing { node: String },
    /// The job finished; no further events follow.
    Completed,
    /// Anything else on the channel (status broadcasts, other jobs).
    Other,
}

/// Push-style notification stream for one job.
#[async_trait]
pub trait EventSubscription: Send {
    /// Wait for the next event. `Ok(None)` means the channel closed before
    /// the job completed.
    async fn next_event(&mut self) -> Result<Option<ExecutionEvent>>;

    /// Keep the channel alive after a quiet period.
    async fn heartbeat(&mut self) -> Result<()>;
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Queue a job. Returns the service's job id.
    async fn submit(&self, settings: &GenerationSettings) -> Result<String>;

    /// Open the notification channel for `job_id`.
    async fn subscribe(&self, job_id: &str) -> Result<Box<dyn EventSubscription>>;

    async fn fetch_outputs(&self, job_id: &str) -> Result<Vec<OutputDescriptor>>;

    async fn retrieve(&self, output: &OutputDescriptor) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_reads_service_json() {
        let d: OutputDescriptor =
            serde_json::from_str(r#"{"filename": "img_0001.png", "subfolder": "", "type": "output"}"#)
                .unwrap();
        assert_eq!(d.filename, "img_0001.png");
        assert_eq!(d.kind, "output");

        let d: OutputDescriptor = serde_json::from_str(r#"{"filename": "x.png"}"#).unwrap();
        assert_eq!(d.subfolder, "");
        assert_eq!(d.kind, "output");
    }
}
