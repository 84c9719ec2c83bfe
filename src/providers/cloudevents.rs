use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::models::PipelineRunEvent;

const PROTOCOL_WEBHOOK: &str = "Webhook";

const EVENT_SPEC_VERSION: &str = "1.0";
const EVENT_SOURCE: &str = "/tekton-notify/pipelinerun";
const EVENT_TYPE: &str = "dev.tekton.pipelinerun.status-changed";
const EVENT_CONTENT_TYPE: &str = "application/json";

/// Generic event-sink adapter: wraps the run snapshot in a CloudEvents
/// 1.0 envelope and posts it to the configured webhook sink.
#[derive(Debug)]
pub struct CloudEventsApp {
    sink_url: String,
    client: Client,
}

/// Structured-mode CloudEvents envelope.
#[derive(Debug, Serialize)]
struct Envelope {
    specversion: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    id: String,
    time: DateTime<Utc>,
    datacontenttype: String,
    data: serde_json::Value,
}

impl Envelope {
    /// Structural check before sending; required context attributes must
    /// be non-empty.
    fn validate(&self) -> Result<(), ProviderError> {
        for (field, value) in [
            ("specversion", &self.specversion),
            ("source", &self.source),
            ("type", &self.event_type),
            ("id", &self.id),
        ] {
            if value.is_empty() {
                return Err(ProviderError::runtime(format!(
                    "validation failed: {} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

impl CloudEventsApp {
    pub fn resolve(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let spec = config
            .spec
            .cloud_events
            .as_ref()
            .ok_or_else(|| ProviderError::invalid_provider_spec("missing value .cloud_events"))?;

        match spec.protocol.as_str() {
            PROTOCOL_WEBHOOK => {
                let webhook = spec.webhook.as_ref().ok_or_else(|| {
                    ProviderError::invalid_provider_spec("missing value .cloud_events.webhook")
                })?;
                Ok(Self {
                    sink_url: webhook.url.clone(),
                    client: Client::new(),
                })
            }
            other => Err(ProviderError::invalid_provider_spec(format!(
                "unknown CloudEvents protocol: {}",
                other
            ))),
        }
    }

    pub async fn notify(&self, event: &PipelineRunEvent) -> Result<(), ProviderError> {
        let envelope = to_envelope(event)?;
        debug!(id = %envelope.id, sink = %self.sink_url, "sending event");

        let response = self
            .client
            .post(&self.sink_url)
            .header("content-type", "application/cloudevents+json")
            .json(&envelope)
            .send()
            .await
            .map_err(|e| ProviderError::runtime(format!("failed to send: {}", e)))?;

        // Anything but a 2xx is a NACK from the sink.
        if !response.status().is_success() {
            return Err(ProviderError::runtime(format!(
                "failed to send, sink returned {}",
                response.status()
            )));
        }

        info!(id = %envelope.id, run = %event.qualified_name(), "event delivered");
        Ok(())
    }
}

fn to_envelope(event: &PipelineRunEvent) -> Result<Envelope, ProviderError> {
    let data = serde_json::to_value(event)
        .map_err(|e| ProviderError::runtime(format!("failed to encode event data: {}", e)))?;
    let envelope = Envelope {
        specversion: EVENT_SPEC_VERSION.to_string(),
        source: EVENT_SOURCE.to_string(),
        event_type: EVENT_TYPE.to_string(),
        id: Uuid::new_v4().to_string(),
        time: Utc::now(),
        datacontenttype: EVENT_CONTENT_TYPE.to_string(),
        data,
    };
    envelope.validate()?;
    Ok(envelope)
}
