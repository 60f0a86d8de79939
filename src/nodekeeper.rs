//! Node keeper: per-node drain supervision while the worker pool upgrades.
//!
//! Each reconciliation re-reads the `UpgradeConfig`, gates on the upgrade
//! phase and the worker pool rollout, and then either clears the drain failure
//! flag (node uncordoned) or runs the drain strategy and records whether the
//! node has missed its drain deadline (node cordoned). Status is written only
//! when `nodeDrain` actually changes, so repeated observations of the same
//! state produce no extra writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::configmanager::{ConfigManager, ConfigValidator};
use crate::crd::{NodeDrainStatus, UpgradePhase};
use crate::drain::{self, NodeDrain, NodeDrainStrategyBuilder};
use crate::error::MuoError;
use crate::machinery::Machinery;
use crate::telemetry::metrics::Metrics;
use crate::upgradeconfig::UpgradeConfigManager;

/// Machine pool whose rollout gates node draining.
pub const WORKER_POOL: &str = "worker";

/// Fetches nodes by name.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch a node. A missing node is [`MuoError::NodeNotFound`].
    async fn get_node(&self, name: &str) -> Result<Node, MuoError>;
}

pub struct KubeNodeClient {
    api: Api<Node>,
}

impl KubeNodeClient {
    pub fn new(client: kube::Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn get_node(&self, name: &str) -> Result<Node, MuoError> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| MuoError::kube(&format!("node/{name}"), e))?
            .ok_or_else(|| MuoError::NodeNotFound(name.to_string()))
    }
}

/// Node keeper section of the operator configuration.
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeKeeperConfig {
    pub node_drain: NodeDrain,
}

impl ConfigValidator for NodeKeeperConfig {
    fn validate(&self) -> Result<(), MuoError> {
        self.node_drain.validate()
    }
}

/// Per-node drain reconciler.
pub struct NodeKeeper {
    upgrade_configs: Arc<dyn UpgradeConfigManager>,
    machinery: Arc<dyn Machinery>,
    nodes: Arc<dyn NodeClient>,
    config: ConfigManager,
    drain_builder: Arc<dyn NodeDrainStrategyBuilder>,
    metrics: Arc<Metrics>,
}

impl NodeKeeper {
    pub fn new(
        upgrade_configs: Arc<dyn UpgradeConfigManager>,
        machinery: Arc<dyn Machinery>,
        nodes: Arc<dyn NodeClient>,
        config: ConfigManager,
        drain_builder: Arc<dyn NodeDrainStrategyBuilder>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            upgrade_configs,
            machinery,
            nodes,
            config,
            drain_builder,
            metrics,
        }
    }

    /// Reconcile one node.
    ///
    /// Returns the delay after which the node should be checked again, or
    /// `None` when only a new event should trigger the next check.
    #[instrument(skip(self), fields(node = node_name))]
    pub async fn reconcile(&self, node_name: &str) -> Result<Option<Duration>, MuoError> {
        let mut uc = self.upgrade_configs.get().await?;

        let phase = uc.phase();
        if phase != UpgradePhase::Upgrading {
            debug!(%phase, "Cluster is not upgrading, skipping node");
            return Ok(None);
        }

        if !self.machinery.is_upgrading(WORKER_POOL).await?.is_upgrading {
            debug!(pool = WORKER_POOL, "Machine pool is not upgrading, skipping node");
            return Ok(None);
        }

        let node = self.nodes.get_node(node_name).await?;
        let cordon = self.machinery.is_node_cordoned(&node);
        let status = uc.status.get_or_insert_default();

        if !cordon.is_cordoned {
            // Only the flag is reset; the name keeps pointing at the last node drained.
            if status.node_drain.failed {
                status.node_drain.failed = false;
                self.upgrade_configs.update_status(&uc).await?;
                info!("Node is uncordoned, cleared drain failure");
            }
            self.metrics.set_node_drain_failed(node_name, false);
            return Ok(None);
        }

        let Some(cordoned_at) = cordon.added_at else {
            warn!("Node is cordoned but has no cordon timestamp yet, checking later");
            return Ok(Some(drain::POLL_INTERVAL));
        };

        let config: NodeKeeperConfig = self.config.populate().await?;
        let strategy = self
            .drain_builder
            .new_node_drain_strategy(&node, &config.node_drain, cordoned_at)?;
        let results = strategy.execute().await?;
        let has_failed = strategy.has_failed(&results).await?;

        let observed = NodeDrainStatus {
            failed: has_failed,
            name: node_name.to_string(),
        };
        if status.node_drain != observed {
            status.node_drain = observed;
            self.upgrade_configs.update_status(&uc).await?;
            info!(failed = has_failed, "Recorded node drain status");
        }
        self.metrics.set_node_drain_failed(node_name, has_failed);

        if has_failed {
            warn!(
                cordoned_at = %cordoned_at,
                timeout_minutes = config.node_drain.timeout,
                "Node drain exceeded its time budget"
            );
            return Ok(None);
        }

        let requeue = drain::next_check(cordoned_at, &config.node_drain, Utc::now());
        debug!(requeue_secs = requeue.as_secs(), "Node still draining");
        Ok(Some(requeue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configmanager::MockConfigSource;
    use crate::crd::spec::tests::make_upgrade_config;
    use crate::crd::{UpgradeConfig, UpgradeHistory};
    use crate::drain::pods::MockPodClient;
    use crate::drain::{
        DrainStrategyResult, MockNodeDrainStrategy, MockNodeDrainStrategyBuilder, OsdDrainStrategyBuilder,
    };
    use crate::machinery::tests::make_node;
    use crate::machinery::{CordonedResult, MockMachinery, UpgradingResult};
    use crate::upgradeconfig::MockUpgradeConfigManager;
    use chrono::DateTime;
    use prometheus_client::registry::Registry;

    const NODE: &str = "test-node-1";
    const CONFIG_YAML: &str = "nodeDrain:\n  timeOut: 5\n  expectedNodeDrainTime: 8\n";

    fn upgrading_uc() -> UpgradeConfig {
        make_upgrade_config("4.4.4", vec![UpgradeHistory::new("4.4.4", UpgradePhase::Upgrading)])
    }

    fn with_drain(mut uc: UpgradeConfig, failed: bool, name: &str) -> UpgradeConfig {
        uc.status.get_or_insert_default().node_drain = NodeDrainStatus {
            failed,
            name: name.to_string(),
        };
        uc
    }

    fn ucm_returning(uc: UpgradeConfig) -> MockUpgradeConfigManager {
        let mut ucm = MockUpgradeConfigManager::new();
        ucm.expect_get().returning(move || Ok(uc.clone()));
        ucm
    }

    fn machinery(upgrading: bool, cordon: CordonedResult) -> MockMachinery {
        let mut m = MockMachinery::new();
        m.expect_is_upgrading()
            .withf(|pool| pool == WORKER_POOL)
            .returning(move |_| Ok(UpgradingResult { is_upgrading: upgrading }));
        m.expect_is_node_cordoned().returning(move |_| cordon.clone());
        m
    }

    fn cordoned_minutes_ago(minutes: i64) -> CordonedResult {
        CordonedResult {
            is_cordoned: true,
            added_at: Some(Utc::now() - chrono::Duration::minutes(minutes)),
        }
    }

    fn uncordoned() -> CordonedResult {
        CordonedResult {
            is_cordoned: false,
            added_at: None,
        }
    }

    fn nodes_returning_node() -> MockNodeClient {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_get_node()
            .withf(|name| name == NODE)
            .returning(|name| Ok(make_node(name, true, None)));
        nodes
    }

    fn config_source(raw: &'static str) -> ConfigManager {
        let mut source = MockConfigSource::new();
        source.expect_fetch().returning(move || Ok(raw.to_string()));
        ConfigManager::new(Arc::new(source))
    }

    fn builder_with(has_failed: bool) -> MockNodeDrainStrategyBuilder {
        let mut builder = MockNodeDrainStrategyBuilder::new();
        builder
            .expect_new_node_drain_strategy()
            .withf(|node, cfg, _| node.metadata.name.as_deref() == Some(NODE) && cfg.timeout == 5)
            .times(1)
            .returning(move |_, _, _| {
                let mut strategy = MockNodeDrainStrategy::new();
                strategy.expect_execute().times(1).returning(|| {
                    Ok(vec![DrainStrategyResult {
                        strategy: "pdb-pod-removal".to_string(),
                        message: "no blocking PodDisruptionBudgets".to_string(),
                        error: None,
                    }])
                });
                strategy
                    .expect_has_failed()
                    .times(1)
                    .returning(move |_| Ok(has_failed));
                Ok(Box::new(strategy))
            });
        builder
    }

    fn keeper(
        ucm: MockUpgradeConfigManager,
        machinery: MockMachinery,
        nodes: MockNodeClient,
        config: ConfigManager,
        builder: Arc<dyn NodeDrainStrategyBuilder>,
    ) -> (NodeKeeper, Registry) {
        let mut registry = Registry::default();
        let metrics = Arc::new(Metrics::new(&mut registry));
        let keeper = NodeKeeper::new(
            Arc::new(ucm),
            Arc::new(machinery),
            Arc::new(nodes),
            config,
            builder,
            metrics,
        );
        (keeper, registry)
    }

    fn encoded(registry: &Registry) -> String {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, registry).unwrap();
        buf
    }

    #[tokio::test]
    async fn test_skips_node_when_not_upgrading_phase() {
        let uc = make_upgrade_config("4.4.4", vec![UpgradeHistory::new("4.4.4", UpgradePhase::Pending)]);
        let mut m = MockMachinery::new();
        m.expect_is_upgrading().never();
        let mut nodes = MockNodeClient::new();
        nodes.expect_get_node().never();

        let (keeper, _) = keeper(
            ucm_returning(uc),
            m,
            nodes,
            config_source(CONFIG_YAML),
            Arc::new(MockNodeDrainStrategyBuilder::new()),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_skips_node_for_every_non_upgrading_phase() {
        for phase in [UpgradePhase::Pending, UpgradePhase::Upgraded, UpgradePhase::Failed] {
            let uc = make_upgrade_config("4.4.4", vec![UpgradeHistory::new("4.4.4", phase)]);
            let mut nodes = MockNodeClient::new();
            nodes.expect_get_node().never();
            let mut ucm = ucm_returning(uc);
            ucm.expect_update_status().never();

            let (keeper, _) = keeper(
                ucm,
                MockMachinery::new(),
                nodes,
                config_source(CONFIG_YAML),
                Arc::new(MockNodeDrainStrategyBuilder::new()),
            );
            assert_eq!(keeper.reconcile(NODE).await.unwrap(), None, "phase {phase}");
        }
    }

    #[tokio::test]
    async fn test_skips_node_when_pool_not_upgrading() {
        let mut nodes = MockNodeClient::new();
        nodes.expect_get_node().never();

        let (keeper, _) = keeper(
            ucm_returning(upgrading_uc()),
            machinery(false, uncordoned()),
            nodes,
            config_source(CONFIG_YAML),
            Arc::new(MockNodeDrainStrategyBuilder::new()),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_surfaces_record_fetch_error() {
        let mut ucm = MockUpgradeConfigManager::new();
        ucm.expect_get()
            .returning(|| Err(MuoError::UpgradeConfigNotFound("muo".to_string())));
        let mut m = MockMachinery::new();
        m.expect_is_upgrading().never();

        let (keeper, _) = keeper(
            ucm,
            m,
            MockNodeClient::new(),
            config_source(CONFIG_YAML),
            Arc::new(MockNodeDrainStrategyBuilder::new()),
        );
        let err = keeper.reconcile(NODE).await.unwrap_err();
        assert!(matches!(err, MuoError::UpgradeConfigNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_node_is_an_error() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_get_node()
            .returning(|name| Err(MuoError::NodeNotFound(name.to_string())));
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status().never();

        let (keeper, _) = keeper(
            ucm,
            machinery(true, uncordoned()),
            nodes,
            config_source(CONFIG_YAML),
            Arc::new(MockNodeDrainStrategyBuilder::new()),
        );
        let err = keeper.reconcile(NODE).await.unwrap_err();
        assert!(matches!(err, MuoError::NodeNotFound(n) if n == NODE));
    }

    #[tokio::test]
    async fn test_cordoned_past_timeout_records_failure_without_requeue() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status()
            .withf(|uc| {
                uc.status.as_ref().unwrap().node_drain
                    == NodeDrainStatus {
                        failed: true,
                        name: NODE.to_string(),
                    }
            })
            .times(1)
            .returning(|_| Ok(()));

        let (keeper, registry) = keeper(
            ucm,
            machinery(true, cordoned_minutes_ago(10)),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder_with(true)),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
        assert!(encoded(&registry).contains(r#"muo_node_drain_timeout{node_name="test-node-1"} 1"#));
    }

    #[tokio::test]
    async fn test_already_failed_node_is_not_rewritten() {
        let mut ucm = ucm_returning(with_drain(upgrading_uc(), true, NODE));
        ucm.expect_update_status().never();

        let (keeper, _) = keeper(
            ucm,
            machinery(true, cordoned_minutes_ago(10)),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder_with(true)),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cordoned_within_budget_requeues() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status()
            .withf(|uc| {
                let drain = &uc.status.as_ref().unwrap().node_drain;
                !drain.failed && drain.name == NODE
            })
            .times(1)
            .returning(|_| Ok(()));

        let (keeper, _) = keeper(
            ucm,
            machinery(true, cordoned_minutes_ago(1)),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder_with(false)),
        );
        let requeue = keeper.reconcile(NODE).await.unwrap().unwrap();
        assert!(requeue >= drain::MIN_REQUEUE && requeue <= drain::POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_uncordoned_node_clears_failure() {
        let mut ucm = ucm_returning(with_drain(upgrading_uc(), true, "other-node"));
        ucm.expect_update_status()
            .withf(|uc| {
                uc.status.as_ref().unwrap().node_drain
                    == NodeDrainStatus {
                        failed: false,
                        name: "other-node".to_string(),
                    }
            })
            .times(1)
            .returning(|_| Ok(()));
        let mut builder = MockNodeDrainStrategyBuilder::new();
        builder.expect_new_node_drain_strategy().never();

        let (keeper, _) = keeper(
            ucm,
            machinery(true, uncordoned()),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_uncordoned_node_without_failure_writes_nothing() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status().never();

        let (keeper, _) = keeper(
            ucm,
            machinery(true, uncordoned()),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(MockNodeDrainStrategyBuilder::new()),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cordoned_without_timestamp_polls_later() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status().never();
        let mut builder = MockNodeDrainStrategyBuilder::new();
        builder.expect_new_node_drain_strategy().never();

        let (keeper, _) = keeper(
            ucm,
            machinery(
                true,
                CordonedResult {
                    is_cordoned: true,
                    added_at: None,
                },
            ),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), Some(drain::POLL_INTERVAL));
    }

    #[tokio::test]
    async fn test_invalid_config_aborts_before_status_write() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status().never();
        let mut builder = MockNodeDrainStrategyBuilder::new();
        builder.expect_new_node_drain_strategy().never();

        let (keeper, _) = keeper(
            ucm,
            machinery(true, cordoned_minutes_ago(10)),
            nodes_returning_node(),
            config_source("nodeDrain:\n  timeOut: 0\n  expectedNodeDrainTime: 8\n"),
            Arc::new(builder),
        );
        let err = keeper.reconcile(NODE).await.unwrap_err();
        assert!(matches!(err, MuoError::Config(_)));
    }

    #[tokio::test]
    async fn test_strategy_error_aborts_before_status_write() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status().never();
        let mut builder = MockNodeDrainStrategyBuilder::new();
        builder.expect_new_node_drain_strategy().returning(|_, _, _| {
            let mut strategy = MockNodeDrainStrategy::new();
            strategy
                .expect_execute()
                .returning(|| Err(MuoError::KubernetesApi("pods: connection reset".to_string())));
            strategy.expect_has_failed().never();
            Ok(Box::new(strategy))
        });

        let (keeper, _) = keeper(
            ucm,
            machinery(true, cordoned_minutes_ago(10)),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder),
        );
        assert!(keeper.reconcile(NODE).await.is_err());
    }

    #[tokio::test]
    async fn test_status_conflict_is_surfaced() {
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status()
            .returning(|_| Err(MuoError::Conflict("upgradeconfig/osd-upgrade-config".to_string())));

        let (keeper, _) = keeper(
            ucm,
            machinery(true, cordoned_minutes_ago(10)),
            nodes_returning_node(),
            config_source(CONFIG_YAML),
            Arc::new(builder_with(true)),
        );
        let err = keeper.reconcile(NODE).await.unwrap_err();
        assert!(matches!(err, MuoError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_real_strategy_within_budget_escalates_nothing() {
        let mut pods = MockPodClient::new();
        pods.expect_list_pdbs().never();
        pods.expect_list_node_pods().never();
        let mut ucm = ucm_returning(upgrading_uc());
        ucm.expect_update_status().times(1).returning(|_| Ok(()));

        let at = DateTime::from_timestamp(Utc::now().timestamp() - 120, 0).unwrap();
        let mut m = MockMachinery::new();
        m.expect_is_upgrading()
            .returning(|_| Ok(UpgradingResult { is_upgrading: true }));
        m.expect_is_node_cordoned()
            .returning(crate::machinery::cordon_state);
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_get_node()
            .returning(move |name| Ok(make_node(name, true, Some(at))));

        let (keeper, _) = keeper(
            ucm,
            m,
            nodes,
            config_source("nodeDrain:\n  timeOut: 45\n  expectedNodeDrainTime: 8\n"),
            Arc::new(OsdDrainStrategyBuilder::new(Arc::new(pods))),
        );
        assert_eq!(keeper.reconcile(NODE).await.unwrap(), Some(drain::POLL_INTERVAL));
    }
}
