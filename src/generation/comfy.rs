//! ComfyUI client.
//!
//! Jobs are queued over HTTP and their completion is announced on the
//! WebSocket channel bound to this client's id.

use super::service::{EventSubscription, ExecutionEvent, GenerationService, OutputDescriptor};
use super::settings::GenerationSettings;
use super::workflow::build_prompt;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct QueueResponse {
    prompt_id: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

pub struct ComfyClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl ComfyClient {
    /// `endpoint` is `host:port` of the ComfyUI server.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            client_id: Uuid::new_v4().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.endpoint, path)
    }

    /// Checkpoint names the server offers.
    pub async fn checkpoints(&self) -> Result<Vec<String>> {
        self.input_options("CheckpointLoaderSimple", "ckpt_name").await
    }

    /// Allowed values of a node input, from `/object_info/<class>`.
    pub async fn input_options(&self, class: &str, input: &str) -> Result<Vec<String>> {
        let info: Value = self
            .http
            .get(self.url(&format!("/object_info/{class}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info[class]["input"]["required"][input][0]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn history(&self, job_id: &str) -> Result<Value> {
        let history: Value = self
            .http
            .get(self.url(&format!("/history/{job_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(history[job_id].clone())
    }
}

#[async_trait]
impl GenerationService for ComfyClient {
    async fn submit(&self, settings: &GenerationSettings) -> Result<String> {
        let seed = rand::random::<u32>() as u64;
        let body = json!({
            "prompt": build_prompt(settings, seed),
            "client_id": self.client_id,
        });

        let response: QueueResponse = self
            .http
            .post(self.url("/prompt"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.prompt_id {
            Some(id) => {
                info!(job_id = %id, seed, "Prompt queued");
                Ok(id)
            }
            None => Err(Error::generation(format!(
                "prompt rejected: {}",
                response.error.unwrap_or(Value::Null)
            ))),
        }
    }

    async fn subscribe(&self, job_id: &str) -> Result<Box<dyn EventSubscription>> {
        let url = format!("ws://{}/ws?clientId={}", self.endpoint, self.client_id);
        let (ws, _) = connect_async(url.as_str()).await?;
        debug!(job_id, "Notification channel open");

        // A fast job can finish before the socket connects.
        let finished = !self.history(job_id).await?.is_null();

        Ok(Box::new(ComfySubscription {
            ws,
            job_id: job_id.to_string(),
            finished,
        }))
    }

    async fn fetch_outputs(&self, job_id: &str) -> Result<Vec<OutputDescriptor>> {
        let entry = self.history(job_id).await?;
        if entry.is_null() {
            return Err(Error::generation(format!("no history for job {job_id}")));
        }
        parse_outputs(&entry)
    }

    async fn retrieve(&self, output: &OutputDescriptor) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(self.url("/view"))
            .query(&[
                ("filename", output.filename.as_str()),
                ("subfolder", output.subfolder.as_str()),
                ("type", output.kind.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

struct ComfySubscription {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    job_id: String,
    finished: bool,
}

#[async_trait]
impl EventSubscription for ComfySubscription {
    async fn next_event(&mut self) -> Result<Option<ExecutionEvent>> {
        if self.finished {
            return Ok(Some(ExecutionEvent::Completed));
        }

        let Some(msg) = self.ws.next().await else {
            return Ok(None);
        };
        match msg? {
            msg @ Message::Text(_) => {
                let event = parse_event(msg.to_text()?, &self.job_id)?;
                if event == ExecutionEvent::Completed {
                    self.finished = true;
                }
                Ok(Some(event))
            }
            Message::Close(frame) => {
                debug!(job_id = %self.job_id, ?frame, "Notification channel closed");
                Ok(None)
            }
            // Binary frames carry live previews.
            _ => Ok(Some(ExecutionEvent::Other)),
        }
    }

    async fn heartbeat(&mut self) -> Result<()> {
        trace!(job_id = %self.job_id, "Sending keep-alive ping");
        self.ws.send(Message::Ping(Default::default())).await?;
        Ok(())
    }
}

/// Decode one notification, ignoring events of other jobs.
fn parse_event(text: &str, job_id: &str) -> Result<ExecutionEvent> {
    let message: Value = serde_json::from_str(text)?;
    let data = &message["data"];
    let for_job = data["prompt_id"].as_str() == Some(job_id);

    let event = match message["type"].as_str() {
        Some("executing") if for_job => match data["node"].as_str() {
            Some(node) => ExecutionEvent::Executing {
                node: node.to_string(),
            },
            None => ExecutionEvent::Completed,
        },
        Some("progress") if for_job || data["prompt_id"].is_null() => ExecutionEvent::Progress {
            value: data["value"].as_u64().unwrap_or(0),
            max: data["max"].as_u64().unwrap_or(0),
        },
        Some("execution_error") if for_job => {
            return Err(Error::generation(format!(
                "execution failed in node {}: {}",
                data["node_id"],
                data["exception_message"].as_str().unwrap_or("unknown error")
            )))
        }
        _ => ExecutionEvent::Other,
    };
    Ok(event)
}

/// Collect every image descriptor of a history entry, in node order.
fn parse_outputs(entry: &Value) -> Result<Vec<OutputDescriptor>> {
    let Some(outputs) = entry["outputs"].as_object() else {
        return Ok(Vec::new());
    };

    let mut nodes: Vec<(&String, &Value)> = outputs.iter().collect();
    nodes.sort_by(|a, b| a.0.cmp(b.0));

    let mut images = Vec::new();
    for (_, output) in nodes {
        if let Some(list) = output["images"].as_array() {
            for image in list {
                images.push(serde_json::from_value(image.clone())?);
            }
        }
    }
    Ok(images)
}
