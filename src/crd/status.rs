//! `UpgradeConfig` status types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::UpgradePhase;

/// Per-version upgrade history entry. Append-only, owned by phase logic.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHistory {
    pub version: String,
    pub phase: UpgradePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
}

impl UpgradeHistory {
    #[cfg(test)]
    pub fn new(version: impl Into<String>, phase: UpgradePhase) -> Self {
        Self {
            version: version.into(),
            phase,
            start_time: None,
            complete_time: None,
        }
    }
}

/// Node drain outcome. Written only by the node keeper.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrainStatus {
    /// True once a cordoned node has exceeded its drain time budget.
    #[serde(default)]
    pub failed: bool,

    /// Name of the node the outcome applies to.
    #[serde(default)]
    pub name: String,
}

/// Outcome of the last notification attempt. Written only by the event manager.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEventStatus {
    #[serde(default)]
    pub sent: bool,

    #[serde(default)]
    pub failed: bool,

    /// Lifecycle state the `sent`/`failed` flags apply to.
    #[serde(default)]
    pub state: String,
}

/// `UpgradeConfig` status defines the observed state of the upgrade.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfigStatus {
    /// Upgrade history, most recent first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<UpgradeHistory>,

    #[serde(default)]
    pub node_drain: NodeDrainStatus,

    #[serde(default)]
    pub notification_event: NotificationEventStatus,
}
