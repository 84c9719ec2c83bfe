use chrono::Duration;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ProviderConfig, SlackChannel};
use crate::errors::ProviderError;
use crate::models::{PipelineRunEvent, TerminalStatus, ANNOTATION_DASHBOARD_BASE_URL};
use crate::providers::{dashboard_pipeline_run_url, fetch_secret_key};
use crate::secrets::{SecretBytes, SecretLookup};

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const SECRET_KEY_ACCESS_TOKEN: &str = "access-token";

const SLACK_COLOR_GOOD: &str = "#2EB886";
const SLACK_COLOR_WARNING: &str = "#DAA038";
const SLACK_COLOR_DANGER: &str = "#A30100";

/// Chat adapter: posts one message per configured channel via the
/// bearer-token message API. Stops at the first failing channel.
#[derive(Debug)]
pub struct SlackApp {
    access_token: SecretBytes,
    channels: Vec<SlackChannel>,
    api_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest {
    channel: String,
    fallback: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Attachment {
    color: String,
    blocks: Vec<Block>,
}

#[derive(Debug, Serialize)]
struct Block {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<BlockText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elements: Option<Vec<BlockText>>,
}

#[derive(Debug, Serialize)]
struct BlockText {
    #[serde(rename = "type")]
    text_type: String,
    text: String,
}

/// Only `ok` and `error` matter here; the `channel`/`ts` echo fields of
/// the message API are ignored on decode.
#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackApp {
    pub async fn resolve(
        config: &ProviderConfig,
        secrets: &dyn SecretLookup,
    ) -> Result<Self, ProviderError> {
        let spec = config
            .spec
            .slack_app
            .as_ref()
            .ok_or_else(|| ProviderError::invalid_provider_spec("missing value .slack_app"))?;

        let secret_ref = spec.access_token.secret_ref.as_ref().ok_or_else(|| {
            ProviderError::invalid_provider_spec("missing valid values in .access_token")
        })?;
        let token = fetch_secret_key(
            secrets,
            &config.namespace,
            &secret_ref.name,
            SECRET_KEY_ACCESS_TOKEN,
        )
        .await?;

        Ok(Self {
            access_token: token,
            channels: spec.channels.clone(),
            api_url: SLACK_POST_MESSAGE_URL.to_string(),
            client: Client::new(),
        })
    }

    /// Redirect the message API, for tests against a local server.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub async fn notify(&self, event: &PipelineRunEvent) -> Result<(), ProviderError> {
        let Some(condition) = &event.condition else {
            debug!(run = %event.qualified_name(), "run has no condition yet, skipped");
            return Ok(());
        };
        if condition.status == TerminalStatus::Unknown {
            debug!(run = %event.qualified_name(), "run is not finished yet, skipped");
            return Ok(());
        }

        for channel in &self.channels {
            let channel = resolve_channel(channel)?;
            let payload = build_message(event, channel.clone());
            debug!(channel = %channel, "posting run status to Slack");

            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(self.access_token.reveal_string())
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    ProviderError::runtime(format!("failed to post Slack message: {}", e))
                })?;

            let response: PostMessageResponse = response.json().await.map_err(|e| {
                ProviderError::runtime(format!("failed to decode Slack response: {}", e))
            })?;

            if !response.ok {
                let reason = response.error.unwrap_or_default();
                return Err(ProviderError::runtime(format!(
                    "got an error from Slack: {}",
                    reason
                )));
            }

            info!(channel = %channel, run = %event.qualified_name(), "posted Slack message");
        }
        Ok(())
    }
}

fn resolve_channel(channel: &SlackChannel) -> Result<String, ProviderError> {
    if let Some(id) = &channel.id {
        return Ok(id.clone());
    }
    if let Some(name) = &channel.name {
        return Ok(name.clone());
    }
    Err(ProviderError::invalid_provider_spec(
        "Slack channel id or name is required",
    ))
}

fn build_message(event: &PipelineRunEvent, channel: String) -> PostMessageRequest {
    let (status, reason, message) = match &event.condition {
        Some(c) => (c.status, c.reason.as_str(), c.message.as_str()),
        None => (TerminalStatus::Unknown, "", ""),
    };
    let qualified = event.qualified_name();

    let duration = match (event.start_time, event.completion_time) {
        (Some(start), Some(end)) => end - start,
        _ => Duration::zero(),
    };
    let mut context = format_duration(duration);
    if let Some(base) = event.annotation(ANNOTATION_DASHBOARD_BASE_URL) {
        let url = dashboard_pipeline_run_url(base, &event.namespace, &event.name);
        context.push_str(&format!(" | <{}|open dashboard>", url));
    }

    PostMessageRequest {
        channel,
        fallback: format!("{}: {}", reason, qualified),
        attachments: vec![Attachment {
            color: status_color(status).to_string(),
            blocks: vec![
                Block {
                    block_type: "section".to_string(),
                    text: Some(BlockText {
                        text_type: "mrkdwn".to_string(),
                        text: format!("*{}*", qualified),
                    }),
                    elements: None,
                },
                Block {
                    block_type: "section".to_string(),
                    text: Some(BlockText {
                        text_type: "plain_text".to_string(),
                        text: format!("{}: {}", reason, message),
                    }),
                    elements: None,
                },
                Block {
                    block_type: "context".to_string(),
                    text: None,
                    elements: Some(vec![BlockText {
                        text_type: "mrkdwn".to_string(),
                        text: context,
                    }]),
                },
            ],
        }],
    }
}

fn status_color(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::Succeeded => SLACK_COLOR_GOOD,
        TerminalStatus::Failed => SLACK_COLOR_DANGER,
        TerminalStatus::Unknown => SLACK_COLOR_WARNING,
    }
}

/// Compact duration rendering: `1h3m5s`, `3m5s`, `5s`. Lower units are
/// always printed once a higher unit appears.
fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
