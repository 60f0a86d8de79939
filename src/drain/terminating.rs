//! Force removal of pods stuck in Terminating on a cordoned node.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::pods::{PodClient, pod_key};
use super::{DrainStrategy, DrainStrategyResult};
use crate::error::MuoError;

const NAME: &str = "stuck-terminating-pod-removal";

pub struct StuckTerminatingPodRemoval {
    pods: Arc<dyn PodClient>,
}

impl StuckTerminatingPodRemoval {
    pub fn new(pods: Arc<dyn PodClient>) -> Self {
        Self { pods }
    }
}

#[async_trait]
impl DrainStrategy for StuckTerminatingPodRemoval {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn execute(&self, node_name: &str) -> Result<DrainStrategyResult, MuoError> {
        let node_pods = self.pods.list_node_pods(node_name).await?;
        let mut removed = 0usize;

        for pod in node_pods.iter().filter(|p| p.metadata.deletion_timestamp.is_some()) {
            let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            self.pods.delete_pod(namespace, name, true).await?;
            info!(node = node_name, pod = %pod_key(pod), "Force deleted terminating pod");
            removed += 1;
        }

        Ok(DrainStrategyResult {
            strategy: NAME.to_string(),
            message: format!("force deleted {removed} terminating pod(s)"),
            error: None,
        })
    }
}
