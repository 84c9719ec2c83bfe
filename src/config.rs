use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Provider type tags, matched exhaustively by the resolver.
pub const PROVIDER_TYPE_GITHUB_APP: &str = "GitHubApp";
pub const PROVIDER_TYPE_SLACK_APP: &str = "SlackApp";
pub const PROVIDER_TYPE_CLOUD_EVENTS: &str = "CloudEvents";

/// Reference to another object by name, in the referrer's namespace.
/// Used for both secret and provider references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
}

/// A field sourced from a secret store entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretKeySource {
    pub secret_ref: Option<ObjectRef>,
}

/// GitHub App provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubAppSpec {
    pub app_id: u64,
    pub private_key: SecretKeySource,
    /// Enterprise API base URL. Redirects the whole credential exchange.
    pub base_url: Option<String>,
}

impl Default for GitHubAppSpec {
    fn default() -> Self {
        Self {
            app_id: 0,
            private_key: SecretKeySource::default(),
            base_url: None,
        }
    }
}

/// One Slack destination, by id or name. Id wins when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackChannel {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Slack App provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackAppSpec {
    pub access_token: SecretKeySource,
    pub channels: Vec<SlackChannel>,
}

/// CloudEvents webhook sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSpec {
    pub url: String,
}

/// CloudEvents provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudEventsSpec {
    /// Protocol tag; only "Webhook" is supported.
    pub protocol: String,
    pub webhook: Option<WebhookSpec>,
}

/// Kind-specific provider settings, selected by `provider_type`.
///
/// Exactly one sub-spec is expected to be populated; the resolver rejects
/// configs whose tag names an absent sub-spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSpec {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub github_app: Option<GitHubAppSpec>,
    pub slack_app: Option<SlackAppSpec>,
    pub cloud_events: Option<CloudEventsSpec>,
}

/// A named, namespaced provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub namespace: String,
    pub spec: ProviderSpec,
}

/// Reserved filter rules on a binding. Declared but inert: selection
/// treats every rule as always-match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    pub run_kind: Option<String>,
    pub label_selector: Option<HashMap<String, String>>,
}

/// Declared intent to notify via a named provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationBinding {
    pub name: String,
    pub namespace: String,
    pub provider_ref: ObjectRef,
    /// User-set gate; suspended bindings are never dispatched.
    pub suspend: bool,
    /// Derived from the binding's own reconciliation, read as-is here.
    pub ready: bool,
    pub filter: Option<FilterRules>,
}

impl Default for NotificationBinding {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: "default".to_string(),
            provider_ref: ObjectRef {
                name: String::new(),
            },
            suspend: false,
            ready: true,
            filter: None,
        }
    }
}

/// Local notifier manifest: providers, bindings and inline secrets.
///
/// Stands in for the cluster control plane when dispatching from the CLI.
/// Inline secret values are for local testing only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierManifest {
    pub providers: Vec<ProviderConfig>,
    pub bindings: Vec<NotificationBinding>,
    /// Secret name -> key -> value (UTF-8).
    pub secrets: HashMap<String, HashMap<String, String>>,
}

impl NotifierManifest {
    /// Load a manifest from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;

        let manifest: NotifierManifest = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse manifest file: {}", path.display()))?;

        info!(
            path = %path.display(),
            providers = manifest.providers.len(),
            bindings = manifest.bindings.len(),
            "Loaded notifier manifest"
        );

        Ok(manifest)
    }
}
