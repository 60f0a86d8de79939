//! UpgradeConfig controller: dispatches lifecycle notifications.
//!
//! Phases are owned elsewhere; this controller only maps the observed phase to
//! a lifecycle state and hands it to the [`EventManager`], which drops states
//! that were already delivered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use tracing::{debug, error, warn};

use super::{result_label, retry_after, with_deadline};
use crate::alerts::AlertReporter;
use crate::crd::{UpgradeConfig, UpgradePhase};
use crate::error::MuoError;
use crate::eventmanager::EventManager;
use crate::notify::NotifyState;
use crate::telemetry::metrics::Metrics;

const CONTROLLER: &str = "notification";

/// Shared context for the UpgradeConfig controller.
pub struct Context {
    pub events: EventManager,
    pub reporter: Arc<dyn AlertReporter>,
    pub metrics: Arc<Metrics>,
    pub reconcile_timeout: Duration,
}

/// Lifecycle state to announce for `phase`, if any.
pub const fn state_for_phase(phase: UpgradePhase) -> Option<NotifyState> {
    match phase {
        UpgradePhase::Pending => None,
        UpgradePhase::Upgrading => Some(NotifyState::Started),
        UpgradePhase::Upgraded => Some(NotifyState::Completed),
        UpgradePhase::Failed => Some(NotifyState::Failed),
    }
}

pub async fn reconcile(uc: Arc<UpgradeConfig>, ctx: Arc<Context>) -> Result<Action, MuoError> {
    let name = uc.name_or_unknown();
    let start = Instant::now();

    let result = dispatch(&uc, &ctx).await;
    ctx.metrics
        .observe_reconcile(CONTROLLER, result_label(&result), start.elapsed());

    match &result {
        Ok(()) => ctx.reporter.update_synced_gauge(name),
        Err(MuoError::UpgradeConfigNotFound(_) | MuoError::MultipleUpgradeConfigs { .. }) => {
            ctx.reporter.reset_synced_gauge(name);
        }
        Err(_) => {}
    }

    result.map(|()| Action::await_change())
}

async fn dispatch(uc: &UpgradeConfig, ctx: &Context) -> Result<(), MuoError> {
    let phase = uc.phase();
    let Some(state) = state_for_phase(phase) else {
        debug!(upgrade_config = uc.name_or_unknown(), %phase, "No notification for phase");
        return Ok(());
    };
    with_deadline(ctx.reconcile_timeout, ctx.events.notify(state)).await
}

pub fn error_policy(uc: Arc<UpgradeConfig>, err: &MuoError, _ctx: Arc<Context>) -> Action {
    let name = uc.name_or_unknown();
    let retry = retry_after(err);
    if err.is_transient() {
        warn!(upgrade_config = name, error = %err, retry_secs = retry.as_secs(), "Transient notification error");
    } else {
        error!(upgrade_config = name, error = %err, retry_secs = retry.as_secs(), "Notification reconcile failed");
    }
    Action::requeue(retry)
}
