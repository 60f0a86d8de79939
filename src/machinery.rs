//! Machine pool and node cordon state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Api;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::MuoError;

/// Taint the node lifecycle controller adds to cordoned nodes.
const UNSCHEDULABLE_TAINT: &str = "node.kubernetes.io/unschedulable";

/// Whether a machine pool is rolling out new machine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradingResult {
    pub is_upgrading: bool,
}

/// Cordon state of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CordonedResult {
    pub is_cordoned: bool,
    /// When the node was cordoned, if known.
    pub added_at: Option<DateTime<Utc>>,
}

/// Answers questions about machine pool upgrades and node cordons.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Machinery: Send + Sync {
    /// Is the named machine pool currently upgrading?
    async fn is_upgrading(&self, pool: &str) -> Result<UpgradingResult, MuoError>;

    /// Is `node` cordoned, and since when?
    fn is_node_cordoned(&self, node: &Node) -> CordonedResult;
}

/// `Machinery` backed by `MachineConfigPool` objects.
pub struct KubeMachinery {
    client: kube::Client,
}

impl KubeMachinery {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Machinery for KubeMachinery {
    async fn is_upgrading(&self, pool: &str) -> Result<UpgradingResult, MuoError> {
        let gvk = GroupVersionKind::gvk("machineconfiguration.openshift.io", "v1", "MachineConfigPool");
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let mcp = api
            .get(pool)
            .await
            .map_err(|e| MuoError::kube(&format!("machineconfigpool/{pool}"), e))?;

        let status = mcp.data.get("status");
        let machine_count = status.and_then(|s| s.get("machineCount")).and_then(serde_json::Value::as_i64);
        let updated_count = status
            .and_then(|s| s.get("updatedMachineCount"))
            .and_then(serde_json::Value::as_i64);
        debug!(pool, ?machine_count, ?updated_count, "MachineConfigPool counts");

        Ok(UpgradingResult {
            is_upgrading: machine_count != updated_count,
        })
    }

    fn is_node_cordoned(&self, node: &Node) -> CordonedResult {
        cordon_state(node)
    }
}

/// Cordon state from `spec.unschedulable` and the unschedulable taint's `timeAdded`.
pub fn cordon_state(node: &Node) -> CordonedResult {
    let Some(spec) = node.spec.as_ref() else {
        return CordonedResult {
            is_cordoned: false,
            added_at: None,
        };
    };

    if !spec.unschedulable.unwrap_or(false) {
        return CordonedResult {
            is_cordoned: false,
            added_at: None,
        };
    }

    let added_at = spec
        .taints
        .iter()
        .flatten()
        .find(|t| t.key == UNSCHEDULABLE_TAINT)
        .and_then(|t| t.time_added.as_ref())
        .and_then(to_chrono);

    CordonedResult {
        is_cordoned: true,
        added_at,
    }
}

/// Convert an API server timestamp to a chrono `DateTime`.
pub fn to_chrono(time: &Time) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(time.0.subsec_nanosecond()).ok()?;
    DateTime::from_timestamp(time.0.as_second(), nanos)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeSpec, Taint};
    use k8s_openapi::jiff::Timestamp;

    /// Build a node, optionally cordoned at `added_at`.
    pub(crate) fn make_node(name: &str, unschedulable: bool, added_at: Option<DateTime<Utc>>) -> Node {
        let taints = added_at.map(|at| {
            vec![Taint {
                key: UNSCHEDULABLE_TAINT.to_string(),
                effect: "NoSchedule".to_string(),
                time_added: Some(Time(Timestamp::from_second(at.timestamp()).unwrap())),
                value: None,
            }]
        });
        Node {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(unschedulable),
                taints,
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_cordon_state_schedulable() {
        let node = make_node("worker-1", false, None);
        let state = cordon_state(&node);
        assert!(!state.is_cordoned);
        assert!(state.added_at.is_none());
    }

    #[test]
    fn test_cordon_state_cordoned_with_taint() {
        let at = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        let node = make_node("worker-1", true, Some(at));
        let state = cordon_state(&node);
        assert!(state.is_cordoned);
        assert_eq!(state.added_at, Some(at));
    }

    #[test]
    fn test_cordon_state_cordoned_without_taint() {
        let node = make_node("worker-1", true, None);
        let state = cordon_state(&node);
        assert!(state.is_cordoned);
        assert!(state.added_at.is_none());
    }

    #[test]
    fn test_cordon_state_without_spec() {
        let node = Node::default();
        assert!(!cordon_state(&node).is_cordoned);
    }

    #[test]
    fn test_cordon_state_ignores_other_taints() {
        let mut node = make_node("worker-1", true, None);
        node.spec.as_mut().unwrap().taints = Some(vec![Taint {
            key: "node.kubernetes.io/not-ready".to_string(),
            effect: "NoExecute".to_string(),
            time_added: Some(Time(Timestamp::from_second(1_600_000_000).unwrap())),
            value: None,
        }]);
        let state = cordon_state(&node);
        assert!(state.is_cordoned);
        assert!(state.added_at.is_none());
    }
}
