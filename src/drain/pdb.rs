//! Removal of pods held on a node by PodDisruptionBudgets.
//!
//! Eviction respects PDBs, so a PDB that allows zero disruptions keeps its
//! pods on a cordoned node forever. Once the expected drain time has passed,
//! such pods are deleted directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use tracing::{debug, info};

use super::pods::{PodClient, pod_key};
use super::{DrainStrategy, DrainStrategyResult};
use crate::error::MuoError;

const NAME: &str = "pdb-pod-removal";

pub struct PdbPodRemoval {
    pods: Arc<dyn PodClient>,
}

impl PdbPodRemoval {
    pub fn new(pods: Arc<dyn PodClient>) -> Self {
        Self { pods }
    }
}

#[async_trait]
impl DrainStrategy for PdbPodRemoval {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn execute(&self, node_name: &str) -> Result<DrainStrategyResult, MuoError> {
        let pdbs = self.pods.list_pdbs().await?;
        let blocking: Vec<&PodDisruptionBudget> = pdbs.iter().filter(|p| is_blocking(p)).collect();
        debug!(node = node_name, total = pdbs.len(), blocking = blocking.len(), "PDB scan");

        if blocking.is_empty() {
            return Ok(DrainStrategyResult {
                strategy: NAME.to_string(),
                message: "no blocking PodDisruptionBudgets".to_string(),
                error: None,
            });
        }

        let node_pods = self.pods.list_node_pods(node_name).await?;
        let targets: Vec<&Pod> = node_pods
            .iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .filter(|pod| blocking.iter().any(|pdb| covers(pdb, pod)))
            .collect();

        for pod in &targets {
            let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            self.pods.delete_pod(namespace, name, false).await?;
            info!(node = node_name, pod = %pod_key(pod), "Deleted pod protected by blocking PDB");
        }

        Ok(DrainStrategyResult {
            strategy: NAME.to_string(),
            message: format!("deleted {} pod(s) protected by blocking PDBs", targets.len()),
            error: None,
        })
    }
}

/// A PDB blocks drain when it protects active pods but allows zero disruptions.
fn is_blocking(pdb: &PodDisruptionBudget) -> bool {
    pdb.status
        .as_ref()
        .is_some_and(|s| s.disruptions_allowed == 0 && s.expected_pods > 0)
}

/// Whether `pdb` selects `pod` (same namespace, matching selector).
fn covers(pdb: &PodDisruptionBudget, pod: &Pod) -> bool {
    if pdb.metadata.namespace != pod.metadata.namespace {
        return false;
    }
    let Some(selector) = pdb.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
        return false;
    };
    let empty = BTreeMap::new();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    selector_matches(selector, labels)
}

fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_match = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v));

    let expressions_match = selector.match_expressions.iter().flatten().all(|req| {
        let values = req.values.as_deref().unwrap_or_default();
        match req.operator.as_str() {
            "In" => labels.get(&req.key).is_some_and(|v| values.contains(v)),
            "NotIn" => labels.get(&req.key).is_none_or(|v| !values.contains(v)),
            "Exists" => labels.contains_key(&req.key),
            "DoesNotExist" => !labels.contains_key(&req.key),
            _ => false,
        }
    });

    labels_match && expressions_match
}
