//! `UpgradeConfig` spec types.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::UpgradeConfigStatus;
use super::types::UpgradePhase;

/// `UpgradeConfig` spec describes the desired upgrade of a managed cluster.
///
/// Exactly one `UpgradeConfig` exists per cluster, in the operator namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "upgrade.managed.openshift.io",
    version = "v1alpha1",
    kind = "UpgradeConfig",
    namespaced,
    status = "UpgradeConfigStatus",
    shortname = "upgrade",
    printcolumn = r#"{"name":"DESIRED","type":"string","jsonPath":".spec.desired.version"}"#,
    printcolumn = r#"{"name":"PHASE","type":"string","jsonPath":".status.history[0].phase"}"#,
    printcolumn = r#"{"name":"UPGRADE AT","type":"string","jsonPath":".spec.upgradeAt"}"#,
    printcolumn = r#"{"name":"DRAIN FAILED","type":"boolean","jsonPath":".status.nodeDrain.failed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfigSpec {
    /// Target release of the upgrade.
    pub desired: Update,

    /// Start of the upgrade window (RFC 3339).
    pub upgrade_at: String,
}

/// Desired release.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    /// Target version (e.g., "4.4.4").
    pub version: String,

    /// Release channel (e.g., "stable-4.4").
    #[serde(default)]
    pub channel: String,
}

impl UpgradeConfig {
    /// Current phase: the phase recorded in history for the desired version.
    ///
    /// A record with no history entry for the desired version is `Pending`.
    pub fn phase(&self) -> UpgradePhase {
        self.status
            .as_ref()
            .and_then(|s| s.history.iter().find(|h| h.version == self.spec.desired.version))
            .map(|h| h.phase)
            .unwrap_or_default()
    }

    /// Name of the record, or "unknown" if unset.
    pub fn name_or_unknown(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::UpgradeHistory;

    /// `UpgradeConfig` for version `version` with the given history.
    pub(crate) fn make_upgrade_config(version: &str, history: Vec<UpgradeHistory>) -> UpgradeConfig {
        let mut uc = UpgradeConfig::new(
            "osd-upgrade-config",
            UpgradeConfigSpec {
                desired: Update {
                    version: version.to_string(),
                    channel: "stable-4.4".to_string(),
                },
                upgrade_at: "2020-06-20T00:00:00Z".to_string(),
            },
        );
        uc.status = Some(UpgradeConfigStatus {
            history,
            ..Default::default()
        });
        uc
    }

    #[test]
    fn test_phase_from_matching_history() {
        let uc = make_upgrade_config(
            "4.4.4",
            vec![
                UpgradeHistory::new("4.4.4", UpgradePhase::Upgrading),
                UpgradeHistory::new("4.3.0", UpgradePhase::Upgraded),
            ],
        );
        assert_eq!(uc.phase(), UpgradePhase::Upgrading);
    }

    #[test]
    fn test_phase_ignores_other_versions() {
        let uc = make_upgrade_config("4.4.4", vec![UpgradeHistory::new("4.3.0", UpgradePhase::Upgraded)]);
        assert_eq!(uc.phase(), UpgradePhase::Pending);
    }

    #[test]
    fn test_phase_without_status_is_pending() {
        let mut uc = make_upgrade_config("4.4.4", vec![]);
        uc.status = None;
        assert_eq!(uc.phase(), UpgradePhase::Pending);
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let json = r#"{"desired":{"version":"4.4.4","channel":"fast-4.4"},"upgradeAt":"2020-06-20T00:00:00Z"}"#;
        let spec: UpgradeConfigSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.desired.version, "4.4.4");
        assert_eq!(spec.desired.channel, "fast-4.4");
        assert_eq!(spec.upgrade_at, "2020-06-20T00:00:00Z");
    }
}
