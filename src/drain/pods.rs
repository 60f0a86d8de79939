//! Pod and PodDisruptionBudget access used by drain mechanisms.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::Api;
use kube::api::{DeleteParams, ListParams};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::MuoError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Pods scheduled on the named node, across all namespaces.
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, MuoError>;

    /// All PodDisruptionBudgets in the cluster.
    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>, MuoError>;

    /// Delete a pod. `force` skips the termination grace period.
    async fn delete_pod(&self, namespace: &str, name: &str, force: bool) -> Result<(), MuoError>;
}

/// `PodClient` backed by the Kubernetes API.
pub struct KubePodClient {
    client: kube::Client,
}

impl KubePodClient {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, MuoError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
            .await
            .map_err(|e| MuoError::kube("pods", e))?;
        debug!(node = node_name, count = list.items.len(), "Listed node pods");
        Ok(list.items)
    }

    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>, MuoError> {
        let pdbs: Api<PodDisruptionBudget> = Api::all(self.client.clone());
        let list = pdbs
            .list(&ListParams::default())
            .await
            .map_err(|e| MuoError::kube("poddisruptionbudgets", e))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, force: bool) -> Result<(), MuoError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = if force {
            DeleteParams {
                grace_period_seconds: Some(0),
                ..Default::default()
            }
        } else {
            DeleteParams::default()
        };

        match pods.delete(name, &params).await {
            Ok(_) => Ok(()),
            // Already gone counts as deleted.
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(MuoError::kube(&format!("pod/{namespace}/{name}"), e)),
        }
    }
}

/// `namespace/name` of a pod for logging and result messages.
pub fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or("unknown")
    )
}
