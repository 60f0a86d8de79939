//! Prometheus metrics for the muo operator.
//!
//! One [`Metrics`] sink is created at startup and handed to every component
//! that reports; nothing registers into a global registry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub controller: String,
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ControllerLabels {
    pub controller: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeLabels {
    pub node_name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NotificationLabels {
    pub upgradeconfig_name: String,
    pub event: String,
    pub version: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpgradeConfigLabels {
    pub upgradeconfig_name: String,
}

/// All Prometheus metrics for the operator.
pub struct Metrics {
    pub reconcile_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<ControllerLabels, Histogram>,
    pub node_drain_timeout: Family<NodeLabels, Gauge>,
    pub upgrade_notification: Family<NotificationLabels, Gauge>,
    pub upgradeconfig_synced: Family<UpgradeConfigLabels, Gauge>,
}

const RECONCILE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let reconcile_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "muo_reconcile",
            "Total number of reconcile calls",
            reconcile_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ControllerLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(RECONCILE_BUCKETS.iter().copied())
            });
        registry.register(
            "muo_reconcile_duration_seconds",
            "Duration of reconcile calls in seconds",
            reconcile_duration_seconds.clone(),
        );

        let node_drain_timeout = Family::<NodeLabels, Gauge>::default();
        registry.register(
            "muo_node_drain_timeout",
            "Node cannot be drained successfully in time (1=failed)",
            node_drain_timeout.clone(),
        );

        let upgrade_notification = Family::<NotificationLabels, Gauge>::default();
        registry.register(
            "muo_upgrade_notification",
            "Notification event delivered for an upgrade state (1=sent)",
            upgrade_notification.clone(),
        );

        let upgradeconfig_synced = Family::<UpgradeConfigLabels, Gauge>::default();
        registry.register(
            "muo_upgradeconfig_synced",
            "UpgradeConfig was read successfully on the last sync (1=synced)",
            upgradeconfig_synced.clone(),
        );

        Self {
            reconcile_total,
            reconcile_duration_seconds,
            node_drain_timeout,
            upgrade_notification,
            upgradeconfig_synced,
        }
    }

    /// Count a reconcile call and observe its duration.
    pub fn observe_reconcile(&self, controller: &str, result: &str, elapsed: Duration) {
        self.reconcile_total
            .get_or_create(&ReconcileLabels {
                controller: controller.to_string(),
                result: result.to_string(),
            })
            .inc();
        self.reconcile_duration_seconds
            .get_or_create(&ControllerLabels {
                controller: controller.to_string(),
            })
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_node_drain_failed(&self, node_name: &str, failed: bool) {
        self.node_drain_timeout
            .get_or_create(&NodeLabels {
                node_name: node_name.to_string(),
            })
            .set(i64::from(failed));
    }

    pub fn set_notification_sent(&self, upgradeconfig_name: &str, event: &str, version: &str) {
        self.upgrade_notification
            .get_or_create(&NotificationLabels {
                upgradeconfig_name: upgradeconfig_name.to_string(),
                event: event.to_string(),
                version: version.to_string(),
            })
            .set(1);
    }

    pub fn set_upgradeconfig_synced(&self, upgradeconfig_name: &str, synced: bool) {
        self.upgradeconfig_synced
            .get_or_create(&UpgradeConfigLabels {
                upgradeconfig_name: upgradeconfig_name.to_string(),
            })
            .set(i64::from(synced));
    }
}

/// Axum handler that encodes the registry as OpenMetrics text.
pub async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buf = String::new();
    if encode(&mut buf, &registry).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }
    (StatusCode::OK, buf)
}
