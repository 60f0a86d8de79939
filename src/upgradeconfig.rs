//! Access to the singleton `UpgradeConfig` record.

use async_trait::async_trait;
use kube::Api;
use kube::api::{ListParams, Patch, PatchParams};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::UpgradeConfig;
use crate::error::MuoError;

/// Fetches and persists the cluster's `UpgradeConfig`.
///
/// Callers re-fetch on every reconciliation; the record is never cached.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpgradeConfigManager: Send + Sync {
    /// Fetch the single `UpgradeConfig` for this cluster.
    async fn get(&self) -> Result<UpgradeConfig, MuoError>;

    /// Persist the status subresource of `uc`.
    ///
    /// Rejected with [`MuoError::Conflict`] if `uc` is stale.
    async fn update_status(&self, uc: &UpgradeConfig) -> Result<(), MuoError>;
}

/// `UpgradeConfigManager` backed by the Kubernetes API.
pub struct KubeUpgradeConfigManager {
    api: Api<UpgradeConfig>,
    namespace: String,
}

impl KubeUpgradeConfigManager {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl UpgradeConfigManager for KubeUpgradeConfigManager {
    async fn get(&self) -> Result<UpgradeConfig, MuoError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|e| MuoError::kube("upgradeconfigs", e))?;

        select_single(list.items, &self.namespace)
    }

    async fn update_status(&self, uc: &UpgradeConfig) -> Result<(), MuoError> {
        let name = uc.name_or_unknown();
        debug!(upgrade_config = name, "Updating UpgradeConfig status");

        let patch = status_patch(uc);
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| MuoError::kube(&format!("upgradeconfig/{name}"), e))?;
        Ok(())
    }
}

/// Build a merge patch for the status subresource.
///
/// Carrying `metadata.resourceVersion` makes the API server reject the write
/// with 409 when the object changed since `uc` was read.
fn status_patch(uc: &UpgradeConfig) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": uc.metadata.resource_version },
        "status": uc.status,
    })
}

fn select_single(mut items: Vec<UpgradeConfig>, namespace: &str) -> Result<UpgradeConfig, MuoError> {
    match items.len() {
        0 => Err(MuoError::UpgradeConfigNotFound(namespace.to_string())),
        1 => Ok(items.remove(0)),
        count => Err(MuoError::MultipleUpgradeConfigs {
            namespace: namespace.to_string(),
            count,
        }),
    }
}
