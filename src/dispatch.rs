use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::config::NotificationBinding;
use crate::errors::ProviderError;
use crate::models::{DeliveryOutcome, PipelineRunEvent, TerminalStatus, ANNOTATION_LAST_STATUS};
use crate::providers;

/// True iff the current terminal status was not yet dispatched: no
/// recorded value, or a different one.
pub fn should_dispatch(current: TerminalStatus, recorded: Option<&str>) -> bool {
    match recorded {
        None => true,
        Some(r) => r.is_empty() || r != current.as_str(),
    }
}

/// Keep bindings that are ready and not suspended. The reserved filter
/// rules are not evaluated; they always match.
pub fn select_bindings(bindings: Vec<NotificationBinding>) -> Vec<NotificationBinding> {
    bindings
        .into_iter()
        .filter(|b| !b.suspend && b.ready)
        .collect()
}

/// Drives one dispatch round per triggering event: detect the change,
/// persist the recorded status, then deliver through every selected
/// binding. One binding's failure never aborts the loop.
pub struct Dispatcher<C> {
    cluster: C,
}

impl<C: Cluster> Dispatcher<C> {
    pub fn new(cluster: C) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Run the dispatch state machine for one observed run snapshot.
    ///
    /// Returns the per-binding outcomes of the round; an empty list means
    /// no dispatch was due or no bindings matched. Errors are store
    /// failures only (listing, recorded-status write conflicts) and are
    /// the outer loop's to retry.
    pub async fn dispatch(&self, run: &PipelineRunEvent) -> Result<Vec<DeliveryOutcome>> {
        let Some(condition) = &run.condition else {
            debug!(run = %run.qualified_name(), "run has no condition, ignored");
            return Ok(Vec::new());
        };
        let current = condition.status;

        let recorded = run.annotation(ANNOTATION_LAST_STATUS);
        if !should_dispatch(current, recorded) {
            debug!(run = %run.qualified_name(), status = %current, "status unchanged, skipped");
            return Ok(Vec::new());
        }
        info!(
            run = %run.qualified_name(),
            status = %current,
            last = recorded.unwrap_or(""),
            "run status changed"
        );

        // Write-then-deliver: a crash after this point re-delivers
        // nothing on retry rather than storming.
        self.cluster
            .record_last_status(&run.namespace, &run.name, current.as_str())
            .await
            .context("Failed to record last dispatched status")?;

        let bindings = self
            .cluster
            .list_bindings(&run.namespace)
            .await
            .context("Failed to list notification bindings")?;
        let candidates = select_bindings(bindings);
        if candidates.is_empty() {
            info!(run = %run.qualified_name(), "no matching notification bindings");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(candidates.len());
        for binding in &candidates {
            let outcome = self.deliver(binding, run).await;
            match &outcome.error {
                None => info!(binding = %outcome.binding, provider = ?outcome.provider, "notified"),
                Some(err) => {
                    warn!(binding = %outcome.binding, error = %err, "failed to notify")
                }
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn deliver(&self, binding: &NotificationBinding, run: &PipelineRunEvent) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome {
            binding: binding.name.clone(),
            provider: None,
            error: None,
        };

        let config = match self
            .cluster
            .get_provider(&binding.namespace, &binding.provider_ref.name)
            .await
        {
            Ok(Some(config)) => config,
            Ok(None) => {
                outcome.error = Some(ProviderError::invalid_provider_spec(format!(
                    "provider {} not found",
                    binding.provider_ref.name
                )));
                return outcome;
            }
            Err(e) => {
                outcome.error = Some(ProviderError::runtime(format!(
                    "failed to get provider {}: {}",
                    binding.provider_ref.name, e
                )));
                return outcome;
            }
        };
        outcome.provider = Some(config.spec.provider_type.clone());

        let adapter = match providers::resolve(&config, &self.cluster).await {
            Ok(adapter) => adapter,
            Err(e) => {
                outcome.error = Some(e);
                return outcome;
            }
        };

        if let Err(e) = adapter.notify(run).await {
            outcome.error = Some(e);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::config::{
        CloudEventsSpec, ProviderConfig, ProviderSpec, ObjectRef, WebhookSpec,
    };
    use crate::errors::ErrorCode;
    use crate::models::RunCondition;
    use std::collections::HashMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_should_dispatch_truth_table() {
        let cases = [
            (TerminalStatus::Succeeded, None, true),
            (TerminalStatus::Succeeded, Some(""), true),
            (TerminalStatus::Succeeded, Some("Unknown"), true),
            (TerminalStatus::Succeeded, Some("Succeeded"), false),
            (TerminalStatus::Failed, Some("Succeeded"), true),
            (TerminalStatus::Failed, Some("Failed"), false),
            (TerminalStatus::Unknown, None, true),
            (TerminalStatus::Unknown, Some("Unknown"), false),
        ];
        for (current, recorded, expected) in cases {
            assert_eq!(
                should_dispatch(current, recorded),
                expected,
                "current={:?} recorded={:?}",
                current,
                recorded
            );
            // Idempotent: the same inputs yield the same decision.
            assert_eq!(should_dispatch(current, recorded), expected);
        }
    }

    #[test]
    fn test_select_bindings_filters_suspended_and_not_ready() {
        let make = |name: &str, suspend: bool, ready: bool| NotificationBinding {
            name: name.to_string(),
            suspend,
            ready,
            provider_ref: ObjectRef {
                name: "p".to_string(),
            },
            ..Default::default()
        };

        let selected = select_bindings(vec![
            make("active", false, true),
            make("suspended", true, true),
            make("not-ready", false, false),
        ]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "active");
    }

    fn webhook_provider(name: &str, url: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            namespace: "ci".to_string(),
            spec: ProviderSpec {
                provider_type: "CloudEvents".to_string(),
                cloud_events: Some(CloudEventsSpec {
                    protocol: "Webhook".to_string(),
                    webhook: Some(WebhookSpec {
                        url: url.to_string(),
                    }),
                }),
                ..Default::default()
            },
        }
    }

    fn binding(name: &str, provider: &str) -> NotificationBinding {
        NotificationBinding {
            name: name.to_string(),
            namespace: "ci".to_string(),
            provider_ref: ObjectRef {
                name: provider.to_string(),
            },
            ..Default::default()
        }
    }

    fn event(status: TerminalStatus, recorded: Option<&str>) -> PipelineRunEvent {
        let mut annotations = HashMap::new();
        if let Some(recorded) = recorded {
            annotations.insert(ANNOTATION_LAST_STATUS.to_string(), recorded.to_string());
        }
        PipelineRunEvent {
            namespace: "ci".to_string(),
            name: "run-1".to_string(),
            condition: Some(RunCondition {
                status,
                reason: status.as_str().to_string(),
                message: String::new(),
            }),
            start_time: None,
            completion_time: None,
            annotations,
            pipeline_ref: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_on_first_terminal_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = LocalCluster::new(
            vec![binding("notify", "sink")],
            vec![webhook_provider("sink", &server.uri())],
            HashMap::new(),
        );
        let dispatcher = Dispatcher::new(cluster);

        let outcomes = dispatcher
            .dispatch(&event(TerminalStatus::Succeeded, None))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].succeeded());

        let recorded = dispatcher.cluster().recorded_statuses();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, "Succeeded");
    }

    #[tokio::test]
    async fn test_dispatch_skipped_when_status_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cluster = LocalCluster::new(
            vec![binding("notify", "sink")],
            vec![webhook_provider("sink", &server.uri())],
            HashMap::new(),
        );
        let dispatcher = Dispatcher::new(cluster);

        let outcomes = dispatcher
            .dispatch(&event(TerminalStatus::Succeeded, Some("Succeeded")))
            .await
            .unwrap();

        assert!(outcomes.is_empty());
        assert!(dispatcher.cluster().recorded_statuses().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_ignores_run_without_condition() {
        let cluster = LocalCluster::new(Vec::new(), Vec::new(), HashMap::new());
        let dispatcher = Dispatcher::new(cluster);

        let mut run = event(TerminalStatus::Succeeded, None);
        run.condition = None;

        let outcomes = dispatcher.dispatch(&run).await.unwrap();
        assert!(outcomes.is_empty());
        assert!(dispatcher.cluster().recorded_statuses().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_records_status_even_without_bindings() {
        let cluster = LocalCluster::new(Vec::new(), Vec::new(), HashMap::new());
        let dispatcher = Dispatcher::new(cluster);

        let outcomes = dispatcher
            .dispatch(&event(TerminalStatus::Failed, Some("Unknown")))
            .await
            .unwrap();

        assert!(outcomes.is_empty());
        let recorded = dispatcher.cluster().recorded_statuses();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, "Failed");
    }

    #[tokio::test]
    async fn test_one_binding_failure_does_not_stop_the_loop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        // First binding points at a provider that does not exist.
        let cluster = LocalCluster::new(
            vec![binding("broken", "missing"), binding("working", "sink")],
            vec![webhook_provider("sink", &server.uri())],
            HashMap::new(),
        );
        let dispatcher = Dispatcher::new(cluster);

        let outcomes = dispatcher
            .dispatch(&event(TerminalStatus::Succeeded, None))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[0].error.as_ref().unwrap().code,
            ErrorCode::InvalidProviderSpec
        );
        assert!(outcomes[1].succeeded());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_an_outcome_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cluster = LocalCluster::new(
            vec![binding("notify", "sink")],
            vec![webhook_provider("sink", &server.uri())],
            HashMap::new(),
        );
        let dispatcher = Dispatcher::new(cluster);

        let outcomes = dispatcher
            .dispatch(&event(TerminalStatus::Failed, None))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].error.as_ref().unwrap().code,
            ErrorCode::RuntimeError
        );
        assert_eq!(outcomes[0].provider.as_deref(), Some("CloudEvents"));
    }
}
