//! Node controller: runs the node keeper for every node event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, warn};

use super::{requeue_action, result_label, retry_after, with_deadline};
use crate::error::MuoError;
use crate::nodekeeper::NodeKeeper;
use crate::telemetry::metrics::Metrics;

const CONTROLLER: &str = "nodekeeper";

/// Shared context for the node controller.
pub struct Context {
    pub keeper: NodeKeeper,
    pub metrics: Arc<Metrics>,
    pub reconcile_timeout: Duration,
}

pub async fn reconcile(node: Arc<Node>, ctx: Arc<Context>) -> Result<Action, MuoError> {
    let name = node.name_any();
    let start = Instant::now();

    let result = with_deadline(ctx.reconcile_timeout, ctx.keeper.reconcile(&name)).await;
    ctx.metrics
        .observe_reconcile(CONTROLLER, result_label(&result), start.elapsed());

    let requeue = result?;
    debug!(node = %name, ?requeue, "Node reconciled");
    Ok(requeue_action(requeue))
}

pub fn error_policy(node: Arc<Node>, err: &MuoError, _ctx: Arc<Context>) -> Action {
    let name = node.name_any();
    let retry = retry_after(err);
    if err.is_transient() {
        warn!(node = %name, error = %err, retry_secs = retry.as_secs(), "Transient node reconcile error");
    } else {
        error!(node = %name, error = %err, retry_secs = retry.as_secs(), "Node reconcile failed");
    }
    Action::requeue(retry)
}
