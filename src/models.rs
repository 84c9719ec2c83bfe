use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

/// Annotation carrying a caller-supplied correlation id for commit statuses.
pub const ANNOTATION_CONTEXT_ID: &str = "notifications.tekton.dev/context-id";
/// Annotation carrying the dashboard base URL for chat links.
pub const ANNOTATION_DASHBOARD_BASE_URL: &str = "notifications.tekton.dev/dashboard-base-url";
/// Commit-status routing annotations.
pub const ANNOTATION_GITHUB_OWNER: &str = "notifications.tekton.dev/github-owner";
pub const ANNOTATION_GITHUB_REPO: &str = "notifications.tekton.dev/github-repo";
pub const ANNOTATION_GITHUB_SHA: &str = "notifications.tekton.dev/github-sha";
/// Dispatcher-owned annotation recording the last dispatched status.
pub const ANNOTATION_LAST_STATUS: &str = "notifications.tekton.dev/last-status";

/// Tri-state outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    /// Not finished yet.
    Unknown,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed,
}

impl TerminalStatus {
    /// Stable string form used for the recorded-status annotation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Unknown => "Unknown",
            TerminalStatus::Succeeded => "Succeeded",
            TerminalStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal condition observed on a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCondition {
    pub status: TerminalStatus,
    /// Short reason code, e.g. "Succeeded" or "CouldntGetTask".
    #[serde(default)]
    pub reason: String,
    /// Free-text message.
    #[serde(default)]
    pub message: String,
}

/// Immutable snapshot of a pipeline run at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunEvent {
    pub namespace: String,
    pub name: String,
    /// Absent while the run has produced no condition at all.
    #[serde(default)]
    pub condition: Option<RunCondition>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    /// String-keyed side channel: correlation id, commit routing,
    /// dashboard base URL, recorded status.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Name of the referenced pipeline, if any. Fallback correlation id.
    #[serde(default)]
    pub pipeline_ref: Option<String>,
}

impl PipelineRunEvent {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// `name.namespace` identifier used in chat messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }
}

/// Per-binding dispatch result. Logged, never persisted.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub binding: String,
    /// Provider type tag, once known.
    pub provider: Option<String>,
    pub error: Option<ProviderError>,
}

impl DeliveryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
