use jsonwebtoken::EncodingKey;
use octocrab::models::AppId;
use octocrab::Octocrab;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::models::{
    PipelineRunEvent, TerminalStatus, ANNOTATION_CONTEXT_ID, ANNOTATION_GITHUB_OWNER,
    ANNOTATION_GITHUB_REPO, ANNOTATION_GITHUB_SHA,
};
use crate::providers::fetch_secret_key;
use crate::secrets::{SecretBytes, SecretLookup};

const SECRET_KEY_PRIVATE_KEY: &str = "private-key.pem";

/// Commit-status adapter: authenticates as a GitHub App, exchanges the
/// app credential for an installation-scoped one, and creates a commit
/// status on the revision named by the run's routing annotations.
#[derive(Debug)]
pub struct GitHubApp {
    app_id: u64,
    private_key: SecretBytes,
    base_url: Option<String>,
}

/// Status payload for `POST /repos/{owner}/{repo}/statuses/{sha}`.
/// `description` is capped at 140 characters by the API; truncation is
/// the caller's concern.
#[derive(Debug, Serialize)]
struct CommitStatusRequest {
    state: String,
    target_url: String,
    description: String,
    context: String,
}

impl GitHubApp {
    pub async fn resolve(
        config: &ProviderConfig,
        secrets: &dyn SecretLookup,
    ) -> Result<Self, ProviderError> {
        let spec = config
            .spec
            .github_app
            .as_ref()
            .ok_or_else(|| ProviderError::invalid_provider_spec("missing value .github_app"))?;

        let secret_ref = spec.private_key.secret_ref.as_ref().ok_or_else(|| {
            ProviderError::invalid_provider_spec("missing valid values in .private_key")
        })?;
        let key = fetch_secret_key(
            secrets,
            &config.namespace,
            &secret_ref.name,
            SECRET_KEY_PRIVATE_KEY,
        )
        .await?;

        Ok(Self {
            app_id: spec.app_id,
            private_key: key,
            base_url: spec.base_url.clone(),
        })
    }

    pub async fn notify(&self, event: &PipelineRunEvent) -> Result<(), ProviderError> {
        let context_id = event
            .annotation(ANNOTATION_CONTEXT_ID)
            .or(event.pipeline_ref.as_deref())
            .ok_or_else(|| ProviderError::failed_validation("context id is not found"))?;

        let owner = event.annotation(ANNOTATION_GITHUB_OWNER);
        let repo = event.annotation(ANNOTATION_GITHUB_REPO);
        let revision = event.annotation(ANNOTATION_GITHUB_SHA);
        let (Some(owner), Some(repo), Some(revision)) = (owner, repo, revision) else {
            return Err(ProviderError::failed_validation(format!(
                "required annotations: {}={} {}={} {}={}",
                ANNOTATION_GITHUB_OWNER,
                owner.unwrap_or_default(),
                ANNOTATION_GITHUB_REPO,
                repo.unwrap_or_default(),
                ANNOTATION_GITHUB_SHA,
                revision.unwrap_or_default(),
            )));
        };

        let Some(condition) = &event.condition else {
            debug!(run = %event.qualified_name(), "run has no condition yet, skipped");
            return Ok(());
        };

        let status = CommitStatusRequest {
            state: commit_state(condition.status).to_string(),
            // Reserved for dashboard linking.
            target_url: String::new(),
            description: condition.reason.clone(),
            context: format!("tekton: {}", context_id),
        };

        let client = self.installation_client(owner, repo).await?;
        let route = format!("/repos/{}/{}/statuses/{}", owner, repo, revision);
        let _: serde_json::Value = client.post(route, Some(&status)).await.map_err(|e| {
            ProviderError::runtime(format!("failed to set GitHub commit status: {}", e))
        })?;

        info!(
            run = %event.qualified_name(),
            owner,
            repo,
            revision,
            state = %status.state,
            "set commit status"
        );
        Ok(())
    }

    /// Two-step credential exchange: app JWT, repository installation
    /// lookup, installation-scoped client.
    async fn installation_client(&self, owner: &str, repo: &str) -> Result<Octocrab, ProviderError> {
        let key = EncodingKey::from_rsa_pem(self.private_key.reveal()).map_err(|e| {
            ProviderError::runtime(format!("failed to read GitHub App private key: {}", e))
        })?;

        let mut builder = Octocrab::builder().app(AppId(self.app_id), key);
        if let Some(base) = &self.base_url {
            builder = builder.base_uri(base).map_err(|e| {
                ProviderError::runtime(format!("invalid GitHub base URL {}: {}", base, e))
            })?;
        }
        let app_client = builder.build().map_err(|e| {
            ProviderError::runtime(format!("failed to build GitHub App client: {}", e))
        })?;

        let installation = app_client
            .apps()
            .get_repository_installation(owner, repo)
            .await
            .map_err(|e| {
                ProviderError::runtime(format!("failed to get GitHub App installation: {}", e))
            })?;

        app_client.installation(installation.id).map_err(|e| {
            ProviderError::runtime(format!("failed to scope client to installation: {}", e))
        })
    }
}

/// Commit-status state for a terminal condition. The API also knows a
/// `failure` state; it has no counterpart among the typed conditions.
fn commit_state(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::Unknown => "pending",
        TerminalStatus::Succeeded => "success",
        TerminalStatus::Failed => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GitHubAppSpec, ProviderSpec, SecretKeySource, ObjectRef};
    use crate::errors::ErrorCode;
    use crate::models::RunCondition;
    use crate::providers::testing::FakeSecrets;
    use std::collections::HashMap;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            name: "gh".to_string(),
            namespace: "ci".to_string(),
            spec: ProviderSpec {
                provider_type: "GitHubApp".to_string(),
                github_app: Some(GitHubAppSpec {
                    app_id: 4242,
                    private_key: SecretKeySource {
                        secret_ref: Some(ObjectRef {
                            name: "gh-key".to_string(),
                        }),
                    },
                    base_url: None,
                }),
                ..Default::default()
            },
        }
    }

    fn routed_event() -> PipelineRunEvent {
        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_CONTEXT_ID.to_string(), "build-42".to_string());
        annotations.insert(ANNOTATION_GITHUB_OWNER.to_string(), "octocat".to_string());
        annotations.insert(ANNOTATION_GITHUB_REPO.to_string(), "hello".to_string());
        annotations.insert(ANNOTATION_GITHUB_SHA.to_string(), "abc123".to_string());
        PipelineRunEvent {
            namespace: "bar".to_string(),
            name: "foo".to_string(),
            condition: Some(RunCondition {
                status: TerminalStatus::Succeeded,
                reason: "Succeeded".to_string(),
                message: String::new(),
            }),
            start_time: None,
            completion_time: None,
            annotations,
            pipeline_ref: None,
        }
    }

    async fn resolved() -> GitHubApp {
        let secrets = FakeSecrets::with("gh-key", SECRET_KEY_PRIVATE_KEY, b"not-a-real-pem");
        GitHubApp::resolve(&provider(), &secrets).await.unwrap()
    }

    #[tokio::test]
    async fn test_resolve_missing_sub_spec() {
        let mut config = provider();
        config.spec.github_app = None;
        let err = GitHubApp::resolve(&config, &FakeSecrets::empty()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidProviderSpec);
    }

    #[tokio::test]
    async fn test_resolve_missing_secret_ref() {
        let mut config = provider();
        config.spec.github_app.as_mut().unwrap().private_key = SecretKeySource::default();
        let err = GitHubApp::resolve(&config, &FakeSecrets::empty()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidProviderSpec);
    }

    #[tokio::test]
    async fn test_resolve_missing_secret() {
        let err = GitHubApp::resolve(&provider(), &FakeSecrets::empty())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFoundPrivateKey);
    }

    #[tokio::test]
    async fn test_resolve_missing_key_in_secret() {
        let secrets = FakeSecrets::with("gh-key", "wrong-key", b"pem");
        let err = GitHubApp::resolve(&provider(), &secrets).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFoundPrivateKey);
    }

    #[test]
    fn test_commit_state_mapping() {
        assert_eq!(commit_state(TerminalStatus::Unknown), "pending");
        assert_eq!(commit_state(TerminalStatus::Succeeded), "success");
        assert_eq!(commit_state(TerminalStatus::Failed), "error");
    }

    #[tokio::test]
    async fn test_notify_missing_correlation_id() {
        let app = resolved().await;
        let mut event = routed_event();
        event.annotations.remove(ANNOTATION_CONTEXT_ID);
        event.pipeline_ref = None;

        let err = app.notify(&event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedValidation);
    }

    #[tokio::test]
    async fn test_notify_falls_back_to_pipeline_ref() {
        let app = resolved().await;
        let mut event = routed_event();
        event.annotations.remove(ANNOTATION_CONTEXT_ID);
        event.annotations.remove(ANNOTATION_GITHUB_SHA);
        event.pipeline_ref = Some("build-and-test".to_string());

        // Correlation id comes from the pipeline ref, so validation moves
        // on and trips over the missing revision instead.
        let err = app.notify(&event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedValidation);
        assert!(err.message.contains("required annotations"));
    }

    #[tokio::test]
    async fn test_notify_missing_revision_annotation() {
        let app = resolved().await;
        let mut event = routed_event();
        event.annotations.remove(ANNOTATION_GITHUB_SHA);

        let err = app.notify(&event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedValidation);
    }

    #[tokio::test]
    async fn test_notify_delivery_failure_is_runtime_error() {
        // Validation passes on a fully-routed event; the credential
        // exchange then rejects the bogus key material.
        let app = resolved().await;
        let event = routed_event();

        let err = app.notify(&event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RuntimeError);
        assert!(err.message.contains("private key"));
    }

    #[tokio::test]
    async fn test_notify_without_condition_is_noop() {
        let app = resolved().await;
        let mut event = routed_event();
        event.condition = None;

        app.notify(&event).await.unwrap();
    }
}
