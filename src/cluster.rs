use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{NotificationBinding, NotifierManifest, ProviderConfig};
use crate::secrets::{SecretData, SecretLookup};

/// Narrow interface over the external object store.
///
/// The dispatch core reads bindings and provider configs, looks up
/// secrets, and writes exactly one annotation back per triggering event.
/// Conflicting writers are serialized by the store; a conflict surfaces
/// here as an error and is reported upward, not resolved.
#[async_trait]
pub trait Cluster: SecretLookup {
    async fn list_bindings(&self, namespace: &str) -> Result<Vec<NotificationBinding>>;

    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<ProviderConfig>>;

    /// Persist the recorded-status annotation on the run resource.
    async fn record_last_status(&self, namespace: &str, name: &str, status: &str) -> Result<()>;
}

/// In-memory control plane backed by a loaded manifest.
///
/// Serves the CLI's one-shot dispatch and the orchestrator tests; the
/// recorded status lands in memory and is written back by the caller.
pub struct LocalCluster {
    bindings: Vec<NotificationBinding>,
    providers: Vec<ProviderConfig>,
    secrets: HashMap<String, SecretData>,
    recorded: Mutex<Vec<RecordedStatus>>,
}

/// One recorded-status write captured by [`LocalCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatus {
    pub namespace: String,
    pub name: String,
    pub status: String,
}

impl LocalCluster {
    pub fn new(
        bindings: Vec<NotificationBinding>,
        providers: Vec<ProviderConfig>,
        secrets: HashMap<String, SecretData>,
    ) -> Self {
        Self {
            bindings,
            providers,
            secrets,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn from_manifest(manifest: NotifierManifest) -> Self {
        let secrets = manifest
            .secrets
            .into_iter()
            .map(|(name, data)| {
                let data = data
                    .into_iter()
                    .map(|(k, v)| (k, v.into_bytes()))
                    .collect::<SecretData>();
                (name, data)
            })
            .collect();
        Self::new(manifest.bindings, manifest.providers, secrets)
    }

    /// Status writes captured so far, oldest first.
    pub fn recorded_statuses(&self) -> Vec<RecordedStatus> {
        self.recorded.lock().expect("recorded lock poisoned").clone()
    }
}

#[async_trait]
impl SecretLookup for LocalCluster {
    async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Option<SecretData>> {
        Ok(self.secrets.get(name).cloned())
    }
}

#[async_trait]
impl Cluster for LocalCluster {
    async fn list_bindings(&self, namespace: &str) -> Result<Vec<NotificationBinding>> {
        Ok(self
            .bindings
            .iter()
            .filter(|b| b.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<ProviderConfig>> {
        Ok(self
            .providers
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned())
    }

    async fn record_last_status(&self, namespace: &str, name: &str, status: &str) -> Result<()> {
        self.recorded
            .lock()
            .expect("recorded lock poisoned")
            .push(RecordedStatus {
                namespace: namespace.to_string(),
                name: name.to_string(),
                status: status.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectRef;

    fn binding(name: &str, namespace: &str) -> NotificationBinding {
        NotificationBinding {
            name: name.to_string(),
            namespace: namespace.to_string(),
            provider_ref: ObjectRef {
                name: "p".to_string(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_bindings_scoped_to_namespace() {
        let cluster = LocalCluster::new(
            vec![binding("a", "ci"), binding("b", "other")],
            Vec::new(),
            HashMap::new(),
        );

        let bindings = cluster.list_bindings("ci").await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name, "a");
    }

    #[tokio::test]
    async fn test_record_last_status_captured() {
        let cluster = LocalCluster::new(Vec::new(), Vec::new(), HashMap::new());
        cluster.record_last_status("ci", "run-1", "Succeeded").await.unwrap();

        let recorded = cluster.recorded_statuses();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, "Succeeded");
    }

    #[tokio::test]
    async fn test_get_secret_missing_is_none() {
        let cluster = LocalCluster::new(Vec::new(), Vec::new(), HashMap::new());
        assert!(cluster.get_secret("ci", "nope").await.unwrap().is_none());
    }
}
