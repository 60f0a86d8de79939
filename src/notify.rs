//! Notifiers for upgrade lifecycle states.

pub mod slack;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

#[cfg(test)]
use mockall::automock;

pub use slack::{SlackMessage, SlackNotifier};

use crate::crd::UpgradeConfig;
use crate::error::MuoError;

/// Upgrade lifecycle state eligible for a one-time notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyState {
    Started,
    Completed,
    Failed,
}

impl NotifyState {
    /// Identifier persisted in `status.notificationEvent.state`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NotifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivers a lifecycle notification to an external channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_state(&self, state: NotifyState, uc: &UpgradeConfig) -> Result<(), MuoError>;
}

/// Records notifications in the operator log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_state(&self, state: NotifyState, uc: &UpgradeConfig) -> Result<(), MuoError> {
        let message = build_message(state, uc);
        info!(
            upgrade_config = uc.name_or_unknown(),
            %state,
            version = %uc.spec.desired.version,
            header = %message.header,
            "Upgrade notification"
        );
        Ok(())
    }
}

/// Slack notifier when a webhook URL is set, log notifier otherwise.
pub fn build_notifier(slack_webhook_url: Option<&str>) -> Arc<dyn Notifier> {
    match slack_webhook_url.filter(|url| !url.is_empty()) {
        Some(url) => {
            info!("Slack notifications enabled");
            Arc::new(SlackNotifier::new(url.to_string()))
        }
        None => {
            info!("No Slack webhook configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// Build the notification message for `state`.
pub fn build_message(state: NotifyState, uc: &UpgradeConfig) -> SlackMessage {
    let header = match state {
        NotifyState::Started => "Cluster Upgrade Started",
        NotifyState::Completed => "Cluster Upgrade Completed",
        NotifyState::Failed => "Cluster Upgrade Failed",
    };

    let mut fields = vec![
        ("Version".to_string(), uc.spec.desired.version.clone()),
        ("Scheduled At".to_string(), uc.spec.upgrade_at.clone()),
    ];
    if !uc.spec.desired.channel.is_empty() {
        fields.push(("Channel".to_string(), uc.spec.desired.channel.clone()));
    }

    let history = uc
        .status
        .as_ref()
        .and_then(|s| s.history.iter().find(|h| h.version == uc.spec.desired.version));
    if let Some(entry) = history
        && let (Some(start), Some(end)) = (entry.start_time, entry.complete_time)
    {
        let secs = (end - start).num_seconds().unsigned_abs();
        fields.push(("Duration".to_string(), format!("{}m {}s", secs / 60, secs % 60)));
    }

    if let Some(drain) = uc.status.as_ref().map(|s| &s.node_drain).filter(|d| d.failed) {
        fields.push(("Drain Failed Node".to_string(), drain.name.clone()));
    }

    SlackMessage {
        header: header.to_string(),
        fields,
        context: format!("Sent by muo via UpgradeConfig/{}", uc.name_or_unknown()),
    }
}
