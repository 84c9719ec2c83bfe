pub mod cloudevents;
pub mod github;
pub mod slack;

pub use cloudevents::CloudEventsApp;
pub use github::GitHubApp;
pub use slack::SlackApp;

use crate::config::{
    ProviderConfig, PROVIDER_TYPE_CLOUD_EVENTS, PROVIDER_TYPE_GITHUB_APP, PROVIDER_TYPE_SLACK_APP,
};
use crate::errors::ProviderError;
use crate::models::PipelineRunEvent;
use crate::secrets::{SecretBytes, SecretLookup};

/// A resolved provider backend. Closed set: adding a kind means adding a
/// variant and satisfying the exhaustive matches below.
#[derive(Debug)]
pub enum Adapter {
    GitHub(GitHubApp),
    Slack(SlackApp),
    CloudEvents(CloudEventsApp),
}

impl Adapter {
    /// Deliver one notification for the event. Safe to call once per
    /// dispatch; adapters hold no cross-call state.
    pub async fn notify(&self, event: &PipelineRunEvent) -> Result<(), ProviderError> {
        match self {
            Adapter::GitHub(app) => app.notify(event).await,
            Adapter::Slack(app) => app.notify(event).await,
            Adapter::CloudEvents(app) => app.notify(event).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Adapter::GitHub(_) => PROVIDER_TYPE_GITHUB_APP,
            Adapter::Slack(_) => PROVIDER_TYPE_SLACK_APP,
            Adapter::CloudEvents(_) => PROVIDER_TYPE_CLOUD_EVENTS,
        }
    }
}

/// Construct the adapter declared by a provider config.
///
/// Pure apart from secret lookups: validates the sub-spec, fetches the
/// required secret material, performs no notification I/O.
pub async fn resolve(
    config: &ProviderConfig,
    secrets: &dyn SecretLookup,
) -> Result<Adapter, ProviderError> {
    match config.spec.provider_type.as_str() {
        PROVIDER_TYPE_GITHUB_APP => GitHubApp::resolve(config, secrets).await.map(Adapter::GitHub),
        PROVIDER_TYPE_SLACK_APP => SlackApp::resolve(config, secrets).await.map(Adapter::Slack),
        PROVIDER_TYPE_CLOUD_EVENTS => CloudEventsApp::resolve(config).map(Adapter::CloudEvents),
        other => Err(ProviderError::invalid_provider_spec(format!(
            "unknown provider type: {}",
            other
        ))),
    }
}

/// Fetch one key of a referenced secret, classifying every absence as
/// `NotFoundPrivateKey`.
pub(crate) async fn fetch_secret_key(
    secrets: &dyn SecretLookup,
    namespace: &str,
    secret_name: &str,
    key: &str,
) -> Result<SecretBytes, ProviderError> {
    let data = secrets
        .get_secret(namespace, secret_name)
        .await
        .map_err(|e| {
            ProviderError::not_found_private_key(format!("failed to get secret: {}", e))
        })?
        .ok_or_else(|| {
            ProviderError::not_found_private_key(format!("secret {} not found", secret_name))
        })?;
    match data.get(key) {
        Some(value) => Ok(SecretBytes::new(value.clone())),
        None => Err(ProviderError::not_found_private_key(format!(
            "missing key {} in secret {}",
            key, secret_name
        ))),
    }
}

/// Dashboard deep link for a run, tolerating a trailing slash on the base.
pub(crate) fn dashboard_pipeline_run_url(base: &str, namespace: &str, name: &str) -> String {
    format!(
        "{}/#/namespaces/{}/pipelineruns/{}",
        base.trim_end_matches('/'),
        namespace,
        name
    )
}
