//! Enum types for upgrade phases.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase of a cluster upgrade, owned by the phase-transition logic.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum UpgradePhase {
    #[default]
    Pending,
    Upgrading,
    Upgraded,
    Failed,
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Upgraded => write!(f, "Upgraded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
