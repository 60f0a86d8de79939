//! Exactly-once delivery of upgrade lifecycle notifications.
//!
//! Reconciliation is level-triggered, so the same lifecycle state is observed
//! many times. The outcome of the last delivery is persisted in
//! `status.notificationEvent` and a state already delivered successfully is
//! never sent again. A failed delivery leaves `sent=false`, so the next call
//! retries it.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::crd::NotificationEventStatus;
use crate::error::MuoError;
use crate::notify::{Notifier, NotifyState};
use crate::telemetry::metrics::Metrics;
use crate::upgradeconfig::UpgradeConfigManager;

pub struct EventManager {
    upgrade_configs: Arc<dyn UpgradeConfigManager>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl EventManager {
    pub fn new(
        upgrade_configs: Arc<dyn UpgradeConfigManager>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            upgrade_configs,
            notifier,
            metrics,
        }
    }

    /// Notify `state` unless it was already delivered.
    ///
    /// A notifier error is returned to the caller after the failure has been
    /// recorded in the `UpgradeConfig` status.
    #[instrument(skip(self), fields(%state))]
    pub async fn notify(&self, state: NotifyState) -> Result<(), MuoError> {
        let mut uc = self.upgrade_configs.get().await?;

        let event = uc
            .status
            .as_ref()
            .map(|s| &s.notification_event)
            .cloned()
            .unwrap_or_default();
        if event.sent && event.state == state.as_str() {
            debug!("Notification already sent");
            return Ok(());
        }

        let delivery = self.notifier.notify_state(state, &uc).await;

        let name = uc.name_or_unknown().to_string();
        let version = uc.spec.desired.version.clone();
        let status = uc.status.get_or_insert_default();

        match delivery {
            Ok(()) => {
                status.notification_event = NotificationEventStatus {
                    sent: true,
                    failed: false,
                    state: state.to_string(),
                };
                self.upgrade_configs.update_status(&uc).await?;
                self.metrics.set_notification_sent(&name, state.as_str(), &version);
                info!(upgrade_config = %name, %version, "Notification sent");
                Ok(())
            }
            Err(e) => {
                status.notification_event = NotificationEventStatus {
                    sent: false,
                    failed: true,
                    state: state.to_string(),
                };
                if let Err(persist) = self.upgrade_configs.update_status(&uc).await {
                    warn!(upgrade_config = %name, error = %persist, "Failed to record notification failure");
                }
                Err(e)
            }
        }
    }
}
